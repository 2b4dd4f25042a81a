//! Host filesystem store used in place of the SD card.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use washwatch_core::{KeyValueStore, StoreError};

/// One file per key under a state directory.
///
/// Writes go to `<key>.tmp` and are renamed over `<key>.bin`, so a crash
/// mid-write leaves either the old record or the new one.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str, extension: &str) -> Option<PathBuf> {
        let valid = !key.is_empty()
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        valid.then(|| self.dir.join(format!("{key}.{extension}")))
    }
}

impl KeyValueStore for FileStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            warn!("Cannot create state directory {}: {}", self.dir.display(), e);
            StoreError::Unavailable("state directory cannot be created")
        })?;
        let metadata = fs::metadata(&self.dir).map_err(|e| {
            warn!("Cannot inspect state directory {}: {}", self.dir.display(), e);
            StoreError::Unavailable("state directory cannot be inspected")
        })?;
        if metadata.permissions().readonly() {
            warn!("State directory {} is read-only", self.dir.display());
            return Err(StoreError::Unavailable("state directory is read-only"));
        }
        debug!("Using state directory {}", self.dir.display());
        Ok(())
    }

    fn read(&mut self, key: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key, "bin")?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} not present", path.display());
                None
            }
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let (Some(path), Some(tmp)) = (self.path_for(key, "bin"), self.path_for(key, "tmp")) else {
            return Err(StoreError::InvalidKey("keys are alphanumeric, '_' or '-'"));
        };
        fs::write(&tmp, value)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                warn!("Failed to write {}: {}", path.display(), e);
                StoreError::Io("state file write failed")
            })
    }
}
