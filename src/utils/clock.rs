//! Logical timestamp generators used by replicas and clients.
//!
//! Timestamps are 64-bit signed logical clock values seeded from wall-clock
//! milliseconds; larger wins, and 0 means "no value written yet". Both
//! generators here are lock-free so concurrent RPC handlers and concurrent
//! client operations can stamp without serializing on a mutex.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logical timestamp type carried in all wire messages and register entries.
pub type Timestamp = i64;

/// Current wall-clock time as milliseconds since the Unix epoch. Clamps to 0
/// if the system clock reads before the epoch.
pub fn wall_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Server-side timestamp generator: strictly monotonic within one process
/// even if the wall clock stalls or jumps backwards. Advances to the current
/// wall-clock millisecond when that is ahead, and by one tick otherwise.
#[derive(Debug)]
pub struct WallClock {
    /// Last generated timestamp.
    last: AtomicI64,
}

impl WallClock {
    /// Creates a new generator starting from the zero timestamp.
    pub fn new() -> Self {
        WallClock {
            last: AtomicI64::new(0),
        }
    }

    /// Generates the next timestamp, strictly greater than all previously
    /// generated ones.
    pub fn generate(&self) -> Timestamp {
        let now = wall_ms();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(if now > last { now } else { last + 1 })
            })
            .unwrap_or(0); // closure always returns Some
        if now > prev {
            now
        } else {
            prev + 1
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-side logical clock, seeded from wall-clock milliseconds at
/// construction. Raised on every timestamp observed from a server reply and
/// strictly incremented on every issuance, so every issued timestamp is
/// greater than everything this client has issued or observed before.
#[derive(Debug)]
pub struct LogicalClock {
    /// Current clock value.
    clock: AtomicI64,
}

impl LogicalClock {
    /// Creates a new logical clock seeded from the wall clock.
    pub fn new() -> Self {
        LogicalClock {
            clock: AtomicI64::new(wall_ms()),
        }
    }

    /// Returns the current clock value without mutating it.
    pub fn peek(&self) -> Timestamp {
        self.clock.load(Ordering::Acquire)
    }

    /// Raises the clock to `observed` if that is ahead, then advances it by
    /// one tick.
    pub fn raise(&self, observed: Timestamp) {
        let _ = self.clock.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |clock| {
                let base = if observed > clock { observed } else { clock };
                Some(base + 1)
            },
        );
    }

    /// Issues a fresh timestamp strictly greater than the current clock
    /// value, raising the clock past it in the same step.
    pub fn issue(&self) -> Timestamp {
        let prev = self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |clock| {
                Some(clock + 2)
            })
            .unwrap_or(0); // closure always returns Some
        prev + 1
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod clock_tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wall_clock_strictly_monotone() {
        let clock = WallClock::new();
        let mut last = 0;
        for _ in 0..1000 {
            let ts = clock.generate();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn wall_clock_unique_across_threads() {
        let clock = Arc::new(WallClock::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                (0..500).map(|_| clock.generate()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for ts in handle.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {}", ts);
            }
        }
    }

    #[test]
    fn logical_clock_issue_ahead_of_peek() {
        let clock = LogicalClock::new();
        let before = clock.peek();
        let issued = clock.issue();
        assert!(issued > before);
        assert!(clock.peek() > issued);
    }

    #[test]
    fn logical_clock_raise_behavior() {
        let clock = LogicalClock::new();
        let base = clock.peek();
        // raising to something behind still ticks forward by one
        clock.raise(base - 100);
        assert_eq!(clock.peek(), base + 1);
        // raising to something ahead jumps there, plus one tick
        clock.raise(base + 1000);
        assert_eq!(clock.peek(), base + 1001);
    }

    #[test]
    fn logical_clock_issued_strictly_increasing() {
        let clock = Arc::new(LogicalClock::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                (0..500).map(|_| clock.issue()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            let issued = handle.join().unwrap();
            // strictly increasing within a thread
            assert!(issued.windows(2).all(|w| w[0] < w[1]));
            // unique across threads
            for ts in issued {
                assert!(seen.insert(ts), "duplicate timestamp {}", ts);
            }
        }
    }
}
