//! Generic replica trait to be implemented by all protocol-specific server
//! replica structs.

use crate::utils::ReplikvError;

use async_trait::async_trait;

use tokio::sync::watch;

/// Server replica ID type.
pub type ReplicaId = u8;

/// Replica trait to be implemented by both protocol server structs.
#[async_trait]
pub trait GenericReplica {
    /// Main event loop logic of running this replica. Returns after a
    /// termination signal arrives through `rx_term`.
    async fn run(
        &mut self,
        rx_term: watch::Receiver<bool>,
    ) -> Result<(), ReplikvError>;

    /// Gets my replica ID.
    fn id(&self) -> ReplicaId;
}
