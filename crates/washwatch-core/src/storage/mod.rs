//! Durable state
//!
//! The monitor persists exactly two records: the usage ledger and the session
//! counter. Both go through the [`KeyValueStore`] collaborator, which owns the
//! medium (flash partition, SD card, a directory on a desktop host); this
//! module owns the record schema and framing.
//!
//! Each record is framed as postcard bytes followed by a CRC-32 of those
//! bytes. A frame is always written whole, so after a power loss the store
//! holds either the previous frame or the new one; anything else fails the
//! CRC and is treated as corrupt.

pub mod ledger;
pub mod memory;
pub mod sd_card;

pub use ledger::{SessionCounter, UsageLedger, UsageLedgerRecord};
pub use memory::MemoryStore;
pub use sd_card::{SdCardStore, SpiSdCardStore};

use alloc::vec::Vec;

use crc::{CRC_32_ISCSI, Crc};
use serde::{Serialize, de::DeserializeOwned};
use thiserror_no_std::Error;

/// Key of the usage ledger record
pub const LEDGER_KEY: &str = "ledger";
/// Key of the session counter record
pub const SESSION_KEY: &str = "session";

const RECORD_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage medium unavailable: {0}")]
    Unavailable(&'static str),
    #[error("key {0:?} cannot be stored on this medium")]
    InvalidKey(&'static str),
    #[error("storage I/O failed: {0}")]
    Io(&'static str),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("record could not be encoded")]
    Encode,
    #[error("record is corrupt or truncated")]
    Corrupt,
}

/// Persistent key-value store collaborator.
pub trait KeyValueStore {
    /// Check that the medium is present and usable.
    ///
    /// Called once at boot; failing here is fatal for the monitor.
    fn begin(&mut self) -> Result<(), StoreError>;

    /// Read the last complete value written under `key`.
    fn read(&mut self, key: &str) -> Option<Vec<u8>>;

    /// Replace the value under `key` with `value` in full.
    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &mut T {
    fn begin(&mut self) -> Result<(), StoreError> {
        (**self).begin()
    }

    fn read(&mut self, key: &str) -> Option<Vec<u8>> {
        (**self).read(key)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        (**self).write(key, value)
    }
}

/// Encode a record into a self-checking frame.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, RecordError> {
    postcard::to_allocvec_crc32(record, RECORD_CRC.digest()).map_err(|_| RecordError::Encode)
}

/// Decode a frame produced by [`encode_record`].
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RecordError> {
    postcard::from_bytes_crc32(bytes, RECORD_CRC.digest()).map_err(|_| RecordError::Corrupt)
}

/// Load a record, falling back to its default when missing or corrupt.
pub(crate) fn load_or_default<T, S>(store: &mut S, key: &str) -> T
where
    T: DeserializeOwned + Default,
    S: KeyValueStore + ?Sized,
{
    let Some(bytes) = store.read(key) else {
        log::info!("No {} record stored, starting from zero", key);
        return T::default();
    };

    match decode_record(&bytes) {
        Ok(record) => record,
        Err(e) => {
            log::warn!("Discarding {} record ({} bytes): {}", key, bytes.len(), e);
            T::default()
        }
    }
}

/// Encode and write a record. Failures are returned for the caller to log.
pub(crate) fn store_record<T, S>(store: &mut S, key: &str, record: &T) -> Result<(), StoreError>
where
    T: Serialize,
    S: KeyValueStore + ?Sized,
{
    let bytes = encode_record(record).map_err(|_| StoreError::Io("record encoding failed"))?;
    store.write(key, &bytes)
}
