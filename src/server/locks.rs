//! Per-key lock table with timeout-based reclamation, used by the blocking
//! protocol replicas.

use std::collections::HashMap;

use crate::client::ClientId;

use tokio::time::{Duration, Instant};

/// One held lock: its owner and when it was granted.
#[derive(Debug, Clone)]
struct LockHold {
    /// Owning client's ID.
    owner: ClientId,

    /// Instant the lock was granted at.
    acquired_at: Instant,
}

/// Per-key lock table. At most one owner per key at a time; an owner that
/// holds a lock past the timeout is considered forfeit and loses it to the
/// next acquirer. There is no background sweep; eviction happens only when
/// a later acquire arrives.
pub(crate) struct LockTable {
    /// Key -> current lock hold.
    holds: HashMap<String, LockHold>,

    /// How long a lock is honored before it may be reclaimed.
    timeout: Duration,
}

impl LockTable {
    /// Creates an empty lock table with the given reclamation timeout.
    pub(crate) fn new(timeout: Duration) -> Self {
        LockTable {
            holds: HashMap::new(),
            timeout,
        }
    }

    /// Attempts to acquire the lock for `key` on behalf of `client`.
    /// Granted when the key is unlocked, already owned by `client`
    /// (idempotent re-grant), or held past the timeout (evict-and-regrant).
    /// Never blocks; denial is immediate.
    pub(crate) fn acquire(&mut self, key: &str, client: ClientId) -> bool {
        match self.holds.get(key) {
            None => {
                self.holds.insert(
                    key.into(),
                    LockHold {
                        owner: client,
                        acquired_at: Instant::now(),
                    },
                );
                true
            }
            Some(hold) if hold.acquired_at.elapsed() > self.timeout => {
                // previous owner presumed crashed; steal the lock
                self.holds.insert(
                    key.into(),
                    LockHold {
                        owner: client,
                        acquired_at: Instant::now(),
                    },
                );
                true
            }
            Some(hold) => hold.owner == client,
        }
    }

    /// Releases the lock for `key` iff it is currently owned by `client`.
    /// Returns whether a release happened.
    pub(crate) fn release(&mut self, key: &str, client: ClientId) -> bool {
        match self.holds.get(key) {
            Some(hold) if hold.owner == client => {
                self.holds.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether `client` currently owns the lock for `key`.
    pub(crate) fn owns(&self, key: &str, client: ClientId) -> bool {
        matches!(self.holds.get(key), Some(hold) if hold.owner == client)
    }
}

#[cfg(test)]
mod locks_tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let mut table = LockTable::new(Duration::from_secs(30));
        assert!(table.acquire("k", 1));
        assert!(table.owns("k", 1));
        assert!(!table.owns("k", 2));
        assert!(table.release("k", 1));
        assert!(!table.owns("k", 1));
    }

    #[test]
    fn mutual_exclusion() {
        let mut table = LockTable::new(Duration::from_secs(30));
        assert!(table.acquire("k", 1));
        assert!(!table.acquire("k", 2));
        // an unrelated key is free
        assert!(table.acquire("j", 2));
    }

    #[test]
    fn reentrant_regrant() {
        let mut table = LockTable::new(Duration::from_secs(30));
        assert!(table.acquire("k", 1));
        assert!(table.acquire("k", 1));
        assert!(table.release("k", 1));
        // a single release suffices; re-grants do not stack
        assert!(!table.release("k", 1));
    }

    #[test]
    fn release_by_non_owner_refused() {
        let mut table = LockTable::new(Duration::from_secs(30));
        assert!(table.acquire("k", 1));
        assert!(!table.release("k", 2));
        assert!(table.owns("k", 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_eviction() {
        let mut table = LockTable::new(Duration::from_millis(50));
        assert!(table.acquire("k", 1));
        assert!(!table.acquire("k", 2));

        tokio::time::sleep(Duration::from_millis(80)).await;
        // owner 1 is past the timeout; 2 steals the lock
        assert!(table.acquire("k", 2));
        assert!(table.owns("k", 2));
        assert!(!table.owns("k", 1));
        // the forfeited owner can no longer release
        assert!(!table.release("k", 1));
    }
}
