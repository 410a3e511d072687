//! Closed-loop client-side driver: one outstanding operation at a time,
//! with per-operation latency measurement.

use tokio::time::{Duration, Instant};

use replikv::{
    ClientId, GenericEndpoint, ReadOutcome, ReplikvError, Timestamp,
    WriteOutcome,
};

/// Reply to one driver operation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum DriverReply {
    /// Operation achieved its quorum. `value` is set for reads.
    Success {
        value: Option<Vec<u8>>,
        ts: Timestamp,
        latency: Duration,
    },

    /// Operation failed its quorum (replicas down, locks denied, or
    /// deadline exceeded).
    Failed,
}

/// Closed-loop driver struct.
pub struct DriverClosedLoop {
    /// Protocol-specific client endpoint.
    endpoint: Box<dyn GenericEndpoint + Send>,
}

impl DriverClosedLoop {
    /// Creates a new closed-loop driver.
    pub fn new(endpoint: Box<dyn GenericEndpoint + Send>) -> Self {
        DriverClosedLoop { endpoint }
    }

    /// Establishes connections with the replica set.
    pub async fn connect(&mut self) -> Result<(), ReplikvError> {
        self.endpoint.connect().await
    }

    /// Sends leave notifications and drops the connections.
    pub async fn leave(&mut self) -> Result<(), ReplikvError> {
        self.endpoint.leave().await
    }

    /// Performs a read and waits for its outcome.
    pub async fn read(
        &mut self,
        key: &str,
    ) -> Result<DriverReply, ReplikvError> {
        let issue_ts = Instant::now();
        match self.endpoint.read(key).await? {
            ReadOutcome::Value { value, ts } => Ok(DriverReply::Success {
                value: Some(value),
                ts,
                latency: Instant::now().duration_since(issue_ts),
            }),
            ReadOutcome::QuorumFailed => Ok(DriverReply::Failed),
        }
    }

    /// Performs a write and waits for its outcome.
    pub async fn write(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<DriverReply, ReplikvError> {
        let issue_ts = Instant::now();
        match self.endpoint.write(key, value).await? {
            WriteOutcome::Committed { ts } => Ok(DriverReply::Success {
                value: None,
                ts,
                latency: Instant::now().duration_since(issue_ts),
            }),
            WriteOutcome::QuorumFailed => Ok(DriverReply::Failed),
        }
    }

    /// Current value of the endpoint's logical clock.
    #[allow(dead_code)]
    pub fn current_ts(&self) -> Timestamp {
        self.endpoint.current_ts()
    }

    /// Gets my client ID.
    #[allow(dead_code)]
    pub fn id(&self) -> ClientId {
        self.endpoint.id()
    }
}
