//! Deadline tracking for client-side quorum phases.

use tokio::time::{self, Duration, Instant};

/// Expiry tracker for the protocol engines' reply-collection phases.
///
/// Each client engine carries one of these, sized once from its
/// `rpc_timeout_ms` setting. `restart()` arms it at the start of a quorum
/// phase (or of one serial RPC in the lock protocol); `expired()` is then
/// raced against reply arrival in a `tokio::select!` loop. A phase that
/// finishes early needs no cancellation: the next phase simply arms a new
/// expiry.
#[derive(Debug)]
pub(crate) struct OpDeadline {
    /// Per-phase deadline duration.
    timeout: Duration,

    /// Expiry instant of the phase in progress.
    expiry: Instant,
}

impl OpDeadline {
    /// Creates a deadline tracker with the given per-phase duration, armed
    /// from now.
    pub(crate) fn new(timeout: Duration) -> Self {
        OpDeadline {
            timeout,
            expiry: Instant::now() + timeout,
        }
    }

    /// Arms the deadline for a new phase starting now.
    pub(crate) fn restart(&mut self) {
        self.expiry = Instant::now() + self.timeout;
    }

    /// Completes once the armed deadline has passed; immediately if it
    /// already has. Intended as a `tokio::select!` branch: a fresh call per
    /// loop iteration keeps observing the same expiry until `restart()`.
    pub(crate) async fn expired(&self) {
        time::sleep_until(self.expiry).await;
    }
}

#[cfg(test)]
mod deadline_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn expires_no_earlier_than_timeout() {
        let deadline = OpDeadline::new(Duration::from_millis(50));
        let start = Instant::now();
        deadline.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn restart_rearms_for_next_phase() {
        let mut deadline = OpDeadline::new(Duration::from_millis(20));
        deadline.expired().await;

        let rearmed = Instant::now();
        deadline.restart();
        deadline.expired().await;
        assert!(rearmed.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn past_expiry_completes_immediately() {
        let deadline = OpDeadline::new(Duration::from_millis(10));
        time::sleep(Duration::from_millis(30)).await;
        // already past; repeated waits return right away without re-arming
        deadline.expired().await;
        deadline.expired().await;
    }
}
