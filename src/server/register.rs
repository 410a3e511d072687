//! Per-replica keyed register store with timestamp discipline.

use std::collections::HashMap;

use crate::utils::{Timestamp, WallClock};

/// One stored register entry: a value and the timestamp it was written at.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RegisterEntry {
    /// Stored value bytes.
    pub value: Vec<u8>,

    /// Timestamp the value was written with.
    pub ts: Timestamp,
}

/// The keyed register store held by every replica, together with the
/// replica's local timestamp generator. Owned exclusively by the replica's
/// event loop task, which serializes all accesses.
pub(crate) struct RegisterStore {
    /// Key -> register entry mapping.
    entries: HashMap<String, RegisterEntry>,

    /// Replica-local monotone timestamp generator.
    clock: WallClock,
}

impl RegisterStore {
    /// Creates an empty register store.
    pub(crate) fn new() -> Self {
        RegisterStore {
            entries: HashMap::new(),
            clock: WallClock::new(),
        }
    }

    /// Reads the entry stored for `key`. An absent key reads as the empty
    /// value at timestamp 0; reads of absent keys are still successful.
    pub(crate) fn read(&self, key: &str) -> RegisterEntry {
        self.entries.get(key).cloned().unwrap_or(RegisterEntry {
            value: Vec::new(),
            ts: 0,
        })
    }

    /// Applies a write of `value` to `key`. The stored timestamp is the max
    /// of the client's timestamp and a freshly generated local one, so
    /// timestamps keep increasing even when a client sends an old one.
    /// Writes are accepted unconditionally; winner selection happens on the
    /// client side through quorum intersection.
    pub(crate) fn apply(
        &mut self,
        key: &str,
        value: Vec<u8>,
        client_ts: Timestamp,
    ) -> Timestamp {
        let final_ts = client_ts.max(self.clock.generate());
        self.entries
            .insert(key.into(), RegisterEntry { value, ts: final_ts });
        final_ts
    }
}
