use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;

use embedded_sdmmc::{BlockDevice, Mode, SdCard, TimeSource, VolumeIdx, VolumeManager};
use log::{debug, warn};

use super::{KeyValueStore, StoreError};

/// Largest record the store will read back
const MAX_RECORD_LEN: u32 = 512;

/// Store on an SPI-attached SD card, as wired on the device.
pub type SpiSdCardStore<S, D, T> = SdCardStore<SdCard<S, D>, T>;

/// FAT-formatted block device as a key-value store.
///
/// Each key maps to one 8.3 file in the root directory (`ledger` ->
/// `LEDGER.BIN`). A write truncates the file and rewrites the whole record,
/// which the CRC framing in [`super`] turns into an all-or-nothing update.
///
/// These operations are blocking; they run inside the single driver loop
/// between measurement windows.
pub struct SdCardStore<B, T>
where
    B: BlockDevice,
    T: TimeSource,
{
    volume_mgr: VolumeManager<B, T, 4, 4, 1>,
}

impl<B, T> SdCardStore<B, T>
where
    B: BlockDevice,
    T: TimeSource,
{
    pub fn new(block_device: B, ts: T) -> Self {
        let volume_mgr = VolumeManager::new(block_device, ts);

        Self { volume_mgr }
    }

    fn write_file(&self, file_name: &str, data: &[u8]) -> Result<(), embedded_sdmmc::Error<B::Error>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(file_name, Mode::ReadWriteCreateOrTruncate)?;

        file.write(data)?;

        // Closing flushes the directory entry; do it explicitly to see errors.
        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn read_file(&self, file_name: &str) -> Result<Vec<u8>, embedded_sdmmc::Error<B::Error>> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;
        let file = root_dir.open_file_in_dir(file_name, Mode::ReadOnly)?;

        let len = file.length().min(MAX_RECORD_LEN) as usize;
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = file.read(&mut buffer[filled..])?;
            if n == 0 {
                break; // EOF
            }
            filled += n;
        }
        buffer.truncate(filled);

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(buffer)
    }
}

/// Map a store key to its 8.3 file name.
fn file_name_for(key: &str) -> Option<heapless::String<12>> {
    if key.is_empty() || key.len() > 8 || !key.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    let mut name = heapless::String::new();
    for c in key.chars() {
        name.write_char(c.to_ascii_uppercase()).ok()?;
    }
    name.write_str(".BIN").ok()?;
    Some(name)
}

impl<B, T> KeyValueStore for SdCardStore<B, T>
where
    B: BlockDevice,
    T: TimeSource,
{
    fn begin(&mut self) -> Result<(), StoreError> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0)).map_err(|e| {
            warn!("SD card volume 0 unavailable: {:?}", e);
            StoreError::Unavailable("cannot open SD card volume 0")
        })?;
        volume0.close().map_err(|e| {
            warn!("SD card volume 0 failed to close: {:?}", e);
            StoreError::Unavailable("cannot close SD card volume 0")
        })?;
        Ok(())
    }

    fn read(&mut self, key: &str) -> Option<Vec<u8>> {
        let file_name = file_name_for(key)?;
        match self.read_file(&file_name) {
            Ok(bytes) => Some(bytes),
            Err(embedded_sdmmc::Error::NotFound) => {
                debug!("{} not present on SD card", file_name);
                None
            }
            Err(e) => {
                warn!("Failed to read {} from SD card: {:?}", file_name, e);
                None
            }
        }
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let file_name = file_name_for(key).ok_or(StoreError::InvalidKey("not an 8.3 base name"))?;
        self.write_file(&file_name, value).map_err(|e| {
            warn!("Failed to write {} to SD card: {:?}", file_name, e);
            StoreError::Io("SD card write failed")
        })
    }
}
