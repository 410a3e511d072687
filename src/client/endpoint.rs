//! Generic client trait implemented by both protocol-specific client
//! engines, plus the operation outcome types they return.

use crate::utils::{ReplikvError, Timestamp};

use async_trait::async_trait;

/// Client stub ID type.
pub type ClientId = u64;

/// Outcome of a client-side read operation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ReadOutcome {
    /// Quorum achieved; the register's value and its timestamp. A key never
    /// written reads as the empty value at timestamp 0.
    Value { value: Vec<u8>, ts: Timestamp },

    /// Not enough successful replies within the deadline.
    QuorumFailed,
}

/// Outcome of a client-side write operation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum WriteOutcome {
    /// Quorum achieved; the timestamp the write was issued at.
    Committed { ts: Timestamp },

    /// Not enough successful acknowledgements within the deadline.
    QuorumFailed,
}

/// Client trait implemented by both protocol client engines. Quorum failure
/// is reported as a value, not an error: `Err` means the operation could not
/// even be attempted (endpoint not connected, invalid setup).
#[async_trait]
pub trait GenericEndpoint {
    /// Establishes connections to the replica set.
    async fn connect(&mut self) -> Result<(), ReplikvError>;

    /// Sends leave notifications and drops the replica connections.
    async fn leave(&mut self) -> Result<(), ReplikvError>;

    /// Performs one linearizable read of `key`.
    async fn read(&mut self, key: &str) -> Result<ReadOutcome, ReplikvError>;

    /// Performs one linearizable write of `value` to `key`.
    async fn write(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<WriteOutcome, ReplikvError>;

    /// Current value of this client's logical clock.
    fn current_ts(&self) -> Timestamp;

    /// Gets my client ID.
    fn id(&self) -> ClientId;
}
