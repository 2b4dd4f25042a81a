//! Usage ledger and session counter
//!
//! Both records are tiny and rewritten whole. The ledger is written on every
//! active tick that advances the cycle clock, the session counter once per
//! cycle start. They are not written transactionally together: the counter
//! is persisted first, so after a crash a session number may be skipped but
//! never reused.

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::{KeyValueStore, LEDGER_KEY, SESSION_KEY, load_or_default, store_record};

/// Durable usage accounting, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageLedgerRecord {
    /// Cycle-elapsed time already folded into `cumulative_seconds`
    pub last_update_seconds: u64,
    /// Total operating time over the lifetime of the store
    pub cumulative_seconds: u64,
}

pub struct UsageLedger {
    record: UsageLedgerRecord,
}

impl UsageLedger {
    /// Read the ledger once at startup.
    ///
    /// A missing or corrupt record yields `{0, 0}`: losing history is
    /// preferred over refusing to run.
    pub fn load<S: KeyValueStore + ?Sized>(store: &mut S) -> Self {
        let record: UsageLedgerRecord = load_or_default(store, LEDGER_KEY);
        info!(
            "Usage ledger loaded: {} s cumulative, last update at {} s",
            record.cumulative_seconds, record.last_update_seconds
        );
        Self { record }
    }

    pub fn record(&self) -> UsageLedgerRecord {
        self.record
    }

    pub fn cumulative_seconds(&self) -> u64 {
        self.record.cumulative_seconds
    }

    /// Rewind the per-cycle reference so a new session counts from zero.
    pub fn start_cycle<S: KeyValueStore + ?Sized>(&mut self, store: &mut S) {
        self.record.last_update_seconds = 0;
        self.persist(store);
    }

    /// Fold the time since the previous tick into the cumulative total.
    ///
    /// Returns the number of seconds added. Re-applying an elapsed value that
    /// has already been counted adds nothing, which makes resuming from the
    /// stored record after a restart idempotent.
    pub fn on_tick<S: KeyValueStore + ?Sized>(
        &mut self,
        store: &mut S,
        elapsed_seconds: u64,
    ) -> u64 {
        let delta = elapsed_seconds.saturating_sub(self.record.last_update_seconds);
        self.record.cumulative_seconds = self.record.cumulative_seconds.saturating_add(delta);
        self.record.last_update_seconds = elapsed_seconds;

        if delta > 0 {
            self.persist(store);
        }
        delta
    }

    fn persist<S: KeyValueStore + ?Sized>(&self, store: &mut S) {
        match store_record(store, LEDGER_KEY, &self.record) {
            Ok(()) => debug!(
                "Ledger saved: {} s cumulative",
                self.record.cumulative_seconds
            ),
            Err(e) => error!("Failed to save usage ledger: {}", e),
        }
    }
}

/// Durable, monotonically increasing session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionCounter {
    pub session_id: u32,
}

impl SessionCounter {
    pub fn load<S: KeyValueStore + ?Sized>(store: &mut S) -> Self {
        let counter: SessionCounter = load_or_default(store, SESSION_KEY);
        info!("Session counter loaded at {}", counter.session_id);
        counter
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Allocate the next session and persist it before returning.
    pub fn next<S: KeyValueStore + ?Sized>(&mut self, store: &mut S) -> u32 {
        if self.session_id == u32::MAX {
            warn!("Session counter exhausted, reusing session {}", self.session_id);
        }
        self.session_id = self.session_id.saturating_add(1);
        if let Err(e) = store_record(store, SESSION_KEY, &*self) {
            error!("Failed to save session counter {}: {}", self.session_id, e);
        }
        self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, decode_record, encode_record};

    #[test]
    fn test_record_round_trip_is_exact() {
        let record = UsageLedgerRecord {
            last_update_seconds: u64::MAX - 1,
            cumulative_seconds: 0x0123_4567_89ab_cdef,
        };
        let bytes = encode_record(&record).unwrap();
        assert_eq!(decode_record::<UsageLedgerRecord>(&bytes), Ok(record));
    }

    #[test]
    fn test_missing_ledger_starts_at_zero() {
        let mut store = MemoryStore::new();
        let ledger = UsageLedger::load(&mut store);
        assert_eq!(ledger.record(), UsageLedgerRecord::default());
    }

    #[test]
    fn test_corrupt_ledger_resets_to_zero() {
        let mut store = MemoryStore::new();
        store.insert_raw(LEDGER_KEY, &[1, 2, 3]);
        let ledger = UsageLedger::load(&mut store);
        assert_eq!(ledger.record(), UsageLedgerRecord::default());
    }

    #[test]
    fn test_ticks_accumulate_deltas() {
        let mut store = MemoryStore::new();
        let mut ledger = UsageLedger::load(&mut store);

        ledger.start_cycle(&mut store);
        assert_eq!(ledger.on_tick(&mut store, 1), 1);
        assert_eq!(ledger.on_tick(&mut store, 2), 1);
        assert_eq!(ledger.on_tick(&mut store, 5), 3);
        assert_eq!(ledger.cumulative_seconds(), 5);

        // Same elapsed again: nothing to add, nothing to write.
        let writes = store.writes();
        assert_eq!(ledger.on_tick(&mut store, 5), 0);
        assert_eq!(store.writes(), writes);
    }

    #[test]
    fn test_new_cycle_counts_from_zero() {
        let mut store = MemoryStore::new();
        let mut ledger = UsageLedger::load(&mut store);
        ledger.on_tick(&mut store, 30);

        ledger.start_cycle(&mut store);
        assert_eq!(ledger.record().last_update_seconds, 0);
        assert_eq!(ledger.on_tick(&mut store, 4), 4);
        assert_eq!(ledger.cumulative_seconds(), 34);
    }

    #[test]
    fn test_restart_resumes_without_double_counting() {
        let mut store = MemoryStore::new();
        let mut ledger = UsageLedger::load(&mut store);
        ledger.on_tick(&mut store, 1);
        ledger.on_tick(&mut store, 2);

        let mut ledger = UsageLedger::load(&mut store);
        assert_eq!(ledger.record().last_update_seconds, 2);
        ledger.on_tick(&mut store, 2);
        ledger.on_tick(&mut store, 3);
        assert_eq!(ledger.cumulative_seconds(), 3);
    }

    #[test]
    fn test_write_failure_keeps_counting_in_memory() {
        let mut store = MemoryStore::new();
        let mut ledger = UsageLedger::load(&mut store);
        store.fail_writes(true);
        assert_eq!(ledger.on_tick(&mut store, 7), 7);
        assert_eq!(ledger.cumulative_seconds(), 7);
        assert!(store.get(LEDGER_KEY).is_none());
    }

    #[test]
    fn test_session_counter_survives_restart() {
        let mut store = MemoryStore::new();
        let mut counter = SessionCounter::load(&mut store);
        assert_eq!(counter.next(&mut store), 1);
        assert_eq!(counter.next(&mut store), 2);

        let mut counter = SessionCounter::load(&mut store);
        assert_eq!(counter.session_id(), 2);
        assert_eq!(counter.next(&mut store), 3);
    }

    #[test]
    fn test_session_counter_saturates_at_max() {
        let mut store = MemoryStore::new();
        let mut counter = SessionCounter {
            session_id: u32::MAX - 1,
        };
        assert_eq!(counter.next(&mut store), u32::MAX);
        assert_eq!(counter.next(&mut store), u32::MAX);

        let counter = SessionCounter::load(&mut store);
        assert_eq!(counter.session_id(), u32::MAX);
    }
}
