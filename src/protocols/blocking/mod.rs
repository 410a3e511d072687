//! Register protocol: lock-based blocking register.
//!
//! Replicas keep the same keyed register store as ABD plus a per-key lock
//! table. Clients take a lock quorum before reading or writing, so exclusive
//! access replaces ABD's write-back phase; a crashed client's locks become
//! reclaimable after the server-side lock timeout.

mod locking;
mod request;

use std::net::SocketAddr;

use crate::client::{
    ClientId, GenericEndpoint, ReadOutcome, ServerPool, WriteOutcome,
};
use crate::server::{
    ExternalApi, GenericReplica, LockTable, RegisterStore, ReplicaId, RequestId,
};
use crate::utils::{
    ClusterConfig, LogicalClock, OpDeadline, ReplikvError, Timestamp,
};

use async_trait::async_trait;

use serde::Deserialize;

use tokio::sync::watch;
use tokio::time::Duration;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplicaConfigBlocking {
    /// Capacity of the incoming request channel.
    pub chan_req_cap: usize,

    /// Capacity of each per-client reply channel.
    pub chan_reply_cap: usize,

    /// How long an unreleased lock is honored before it may be reclaimed,
    /// in millisecs.
    pub lock_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ReplicaConfigBlocking {
    fn default() -> Self {
        ReplicaConfigBlocking {
            chan_req_cap: 4096,
            chan_reply_cap: 128,
            lock_timeout_ms: 30_000,
        }
    }
}

/// Blocking server replica module.
pub(crate) struct BlockingReplica {
    /// Replica ID in cluster.
    id: ReplicaId,

    /// ExternalApi module.
    external_api: ExternalApi,

    /// Keyed register store with the local timestamp generator.
    register: RegisterStore,

    /// Per-key lock table. Shares the event loop task with `register`, so
    /// lock checks and store updates are atomic with respect to each other.
    locks: LockTable,
}

impl BlockingReplica {
    /// Creates a new blocking replica and sets up its client-facing API.
    pub(crate) async fn new_and_setup(
        id: ReplicaId,
        api_addr: SocketAddr,
        config_str: Option<&str>,
    ) -> Result<Self, ReplikvError> {
        let config = parsed_config!(config_str => ReplicaConfigBlocking;
                                    chan_req_cap, chan_reply_cap,
                                    lock_timeout_ms)?;
        if config.lock_timeout_ms == 0 {
            return logged_err!(id; "invalid config.lock_timeout_ms '{}'",
                                   config.lock_timeout_ms);
        }

        let external_api = ExternalApi::new_and_setup(
            id,
            api_addr,
            config.chan_req_cap,
            config.chan_reply_cap,
        )
        .await?;

        Ok(BlockingReplica {
            id,
            external_api,
            register: RegisterStore::new(),
            locks: LockTable::new(Duration::from_millis(config.lock_timeout_ms)),
        })
    }
}

#[async_trait]
impl GenericReplica for BlockingReplica {
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
pub struct ClientConfigBlocking {
    /// Per-RPC deadline in millisecs. The original left its lock-protocol
    /// RPCs unbounded; here they get the same deadline as ABD's.
    pub rpc_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ClientConfigBlocking {
    fn default() -> Self {
        ClientConfigBlocking {
            rpc_timeout_ms: 5000,
        }
    }
}

/// Blocking client-side engine.
pub(crate) struct BlockingClient {
    /// Client ID, also the lock owner identity at every replica.
    id: ClientId,

    /// Immutable snapshot of the cluster configuration.
    cluster: ClusterConfig,

    /// Client logical clock.
    clock: LogicalClock,

    /// Pooled connections to the replica set; `None` until `connect()`.
    pool: Option<ServerPool>,

    /// Per-RPC reply deadline, sized from the configured RPC timeout.
    deadline: OpDeadline,

    /// Next request ID, monotonically increasing.
    next_req: RequestId,
}

impl BlockingClient {
    /// Creates a new blocking client engine over the given cluster snapshot.
    pub(crate) async fn new_and_setup(
        id: ClientId,
        cluster: ClusterConfig,
        config_str: Option<&str>,
    ) -> Result<Self, ReplikvError> {
        let config = parsed_config!(config_str => ClientConfigBlocking;
                                    rpc_timeout_ms)?;
        if config.rpc_timeout_ms == 0 {
            return logged_err!(id; "invalid config.rpc_timeout_ms '{}'",
                                   config.rpc_timeout_ms);
        }

        Ok(BlockingClient {
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
impl GenericEndpoint for BlockingClient {
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
        self.locked_read(key).await
    }

    async fn write(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<WriteOutcome, ReplikvError> {
        self.locked_write(key, value).await
    }

    fn current_ts(&self) -> Timestamp {
        self.clock.peek()
    }

    fn id(&self) -> ClientId {
        self.id
    }
}

#[cfg(test)]
mod blocking_tests {
    use super::*;
    use crate::server::{ApiReply, ApiRequest};
    use crate::utils::ServerInfo;
    use crate::RegProtocol;
    use std::collections::HashMap;

    /// Spawns a 3-replica blocking cluster with a short lock timeout.
    /// Returns the cluster config and the replicas' termination senders.
    async fn setup_cluster(
        port_base: u16,
        lock_timeout_ms: u64,
    ) -> Result<(ClusterConfig, Vec<watch::Sender<bool>>), ReplikvError> {
        let mut servers = vec![];
        let mut terms = vec![];
        for id in 0..3u8 {
            let port = port_base + id as u16;
            let addr: SocketAddr = format!("127.0.0.1:{}", port).parse()?;
            let config_str = format!("lock_timeout_ms = {}", lock_timeout_ms);
            let mut replica =
                BlockingReplica::new_and_setup(id, addr, Some(&config_str))
                    .await?;
            let (tx_term, rx_term) = watch::channel(false);
            tokio::spawn(async move { replica.run(rx_term).await });
            terms.push(tx_term);
            servers.push(ServerInfo {
                id,
                host: "127.0.0.1".into(),
                port,
            });
        }
        let cluster = ClusterConfig {
            servers,
            protocol: RegProtocol::Blocking,
            read_quorum: 2,
            write_quorum: 2,
            num_replicas: 3,
        };
        Ok((cluster, terms))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn write_then_read() -> Result<(), ReplikvError> {
        let (cluster, terms) = setup_cluster(54740, 30_000).await?;

        let mut endpoint =
            BlockingClient::new_and_setup(1, cluster, None).await?;
        endpoint.connect().await?;
        assert!(matches!(
            endpoint.write("k", b"v".to_vec()).await?,
            WriteOutcome::Committed { .. }
        ));
        match endpoint.read("k").await? {
            ReadOutcome::Value { value, ts } => {
                assert_eq!(value, b"v".to_vec());
                assert!(ts > 0);
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        endpoint.leave().await?;

        for term in terms {
            term.send(true)?;
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn lock_timeout_recovery() -> Result<(), ReplikvError> {
        let (cluster, terms) = setup_cluster(54750, 2000).await?;
        let addrs = cluster.addr_map()?;

        // client 11 grabs the lock for "k" at all replicas, then vanishes
        // without releasing (simulated crash)
        let mut pool = ServerPool::new_and_connect(11, &addrs).await?;
        pool.bcast(ApiRequest::Lock {
            id: 0,
            key: "k".into(),
            client: 11,
        })
        .await;
        for _ in 0..3 {
            let (_, reply) = pool.recv_reply().await;
            assert!(matches!(
                reply,
                ApiReply::Lock { granted: true, .. }
            ));
        }
        drop(pool);

        // client 22 cannot write while the crashed client's locks are fresh
        let mut endpoint =
            BlockingClient::new_and_setup(22, cluster, None).await?;
        endpoint.connect().await?;
        assert_eq!(
            endpoint.write("k", b"v2".to_vec()).await?,
            WriteOutcome::QuorumFailed
        );

        // once past the lock timeout, the locks are reclaimable and the
        // write goes through end-to-end
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(matches!(
            endpoint.write("k", b"v2".to_vec()).await?,
            WriteOutcome::Committed { .. }
        ));
        match endpoint.read("k").await? {
            ReadOutcome::Value { value, .. } => {
                assert_eq!(value, b"v2".to_vec())
            }
            outcome => panic!("unexpected outcome {:?}", outcome),
        }
        endpoint.leave().await?;

        for term in terms {
            term.send(true)?;
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn contended_writers_exclude() -> Result<(), ReplikvError> {
        let (cluster, terms) = setup_cluster(54760, 30_000).await?;
        let addrs = cluster.addr_map()?;

        // a rival client holds the lock at one replica; with N=3 and W=2
        // the writer can still assemble a lock quorum from the other two
        let mut pool = ServerPool::new_and_connect(33, &addrs).await?;
        pool.send_to(
            0,
            ApiRequest::Lock {
                id: 0,
                key: "k".into(),
                client: 33,
            },
        )
        .await;
        let (_, reply) = pool.recv_reply().await;
        assert!(matches!(reply, ApiReply::Lock { granted: true, .. }));

        let mut endpoint =
            BlockingClient::new_and_setup(44, cluster, None).await?;
        endpoint.connect().await?;
        assert!(matches!(
            endpoint.write("k", b"w".to_vec()).await?,
            WriteOutcome::Committed { .. }
        ));
        endpoint.leave().await?;
        drop(pool);

        for term in terms {
            term.send(true)?;
        }
        Ok(())
    }
}
