//! Register protocol: ABD wait-free quorum register.
//!
//! Replicas accept unconditional reads and timestamped writes; clients do a
//! one-phase quorum write and a two-phase quorum read (query → write-back of
//! the maximum-timestamp value), which makes reads and writes linearizable
//! whenever `R + W > N` without any replica-side coordination.

mod quorum;
mod request;

use crate::client::{
    ClientId, GenericEndpoint, ReadOutcome, ServerPool, WriteOutcome,
};
use crate::server::{ExternalApi, GenericReplica, RegisterStore, ReplicaId, RequestId};
use crate::utils::{
    ClusterConfig, LogicalClock, OpDeadline, ReplikvError, Timestamp,
};

use std::net::SocketAddr;

use async_trait::async_trait;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfigAbd {
    /// Capacity of the incoming request channel.
    pub chan_req_cap: usize,

    /// Capacity of each per-client reply channel.
    pub chan_reply_cap: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for ReplicaConfigAbd {
    fn default() -> Self {
        ReplicaConfigAbd {
            chan_req_cap: 4096,
            chan_reply_cap: 128,
        }
    }
}

/// ABD server replica module.
pub(crate) struct AbdReplica {
    /// Replica ID in cluster.
    id: ReplicaId,

    /// ExternalApi module.
    external_api: ExternalApi,

    /// Keyed register store with the local timestamp generator. Owned by
    /// this event loop task, which is the replica's serialization point.
    register: RegisterStore,
}

impl AbdReplica {
    /// Creates a new ABD replica and sets up its client-facing API.
    pub(crate) async fn new_and_setup(
        id: ReplicaId,
        api_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, ReplikvError> {
        let config = parsed_config!(config_str => ReplicaConfigAbd;
                                    chan_req_cap, chan_reply_cap)?;

        let external_api = ExternalApi::new_and_setup(
            id,
            api_addr,
            config.chan_req_cap,
            config.chan_reply_cap,
        )
        .await?;

        Ok(AbdReplica {
            id,
            external_api,
            register: RegisterStore::new(),
        })
    }
}

#[async_trait]
impl GenericReplica for AbdReplica {
    async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), ReplikvError> {
        // main event loop
        loop {
            tokio::select! {
                // client request
                req = self.external_api.recv_req() => {
                    let (client, req) = match req {
                        Ok(pair) => pair,
                        Err(e) => {
                            pf_error!(self.id; "error getting req: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.handle_req(client, req).await {
                        pf_error!(self.id; "error handling req: {}", e);
                    }
                },

                // receiving termination signal
                _ = rx_term.changed() => {
                    pf_warn!(self.id; "server caught termination signal");
                    break;
                }
            }
        }

        self.external_api.shutdown().await
    }

    fn id(&self) -> ReplicaId {
        self.id
    }
}

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfigAbd {
    /// Per-RPC deadline in millisecs.
    pub rpc_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfigAbd {
    fn default() -> Self {
        ClientConfigAbd {
            rpc_timeout_ms: 5000,
        }
    }
}

/// ABD client-side engine.
pub(crate) struct AbdClient {
    /// Client ID.
    id: ClientId,

    /// Immutable snapshot of the cluster configuration.
    cluster: ClusterConfig,

    /// Client logical clock.
    clock: LogicalClock,

    /// Pooled connections to the replica set; `None` until `connect()`.
    pool: Option<ServerPool>,

    /// Per-phase reply deadline, sized from the configured RPC timeout.
    deadline: OpDeadline,

    /// Next request ID, monotonically increasing.
    next_req: RequestId,
}

impl AbdClient {
    /// Creates a new ABD client engine over the given cluster snapshot.
    pub(crate) async fn new_and_setup(
        id: ClientId,
        cluster: ClusterConfig,
        config_str: Option<&str>,
    ) -> Result<Self, ReplikvError> {
        let config = parsed_config!(config_str => ClientConfigAbd;
                                    rpc_timeout_ms)?;
        if config.rpc_timeout_ms == 0 {
            return logged_err!(id; "invalid config.rpc_timeout_ms '{}'",
                                   config.rpc_timeout_ms);
        }

        Ok(AbdClient {
            id,
            cluster,
            clock: LogicalClock::new(),
            pool: None,
            deadline: OpDeadline::new(Duration::from_millis(
                config.rpc_timeout_ms,
            )),
            next_req: 0,
        })
    }
}

#[async_trait]
impl GenericEndpoint for AbdClient {
    async fn connect(&mut self) -> Result<(), ReplikvError> {
        // disallow reconnection without leaving
        if self.pool.is_some() {
            return logged_err!(self.id; "reconnecting without leaving");
        }

        let pool =
            ServerPool::new_and_connect(self.id, &self.cluster.addr_map()?)
                .await?;
        pf_info!(self.id; "connected to {} of {} replicas",
                          pool.conns(), self.cluster.population());
        self.pool = Some(pool);
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), ReplikvError> {
        if let Some(mut pool) = self.pool.take() {
            pool.leave().await;
        }
        Ok(())
    }

    async fn read(&mut self, key: &str) -> Result<ReadOutcome, ReplikvError> {
        self.quorum_read(key).await
    }

    async fn write(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<WriteOutcome, ReplikvError> {
        self.quorum_write(key, value).await
    }

    fn current_ts(&self) -> Timestamp {
        self.clock.peek()
    }

    fn id(&self) -> ClientId {
        self.id
    }
}
