//! Client-side replica connection pool: one long-lived messenger task per
//! replica connection, per-replica request senders, and one merged reply
//! channel. Connections are established once per client and reused across
//! operations (including the ABD read's write-back phase).

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::client::{ClientApiStub, ClientId, ClientRecvStub, ClientSendStub};
use crate::server::{ApiReply, ApiRequest, ReplicaId};
use crate::utils::{OpDeadline, ReplikvError};

use tokio::sync::mpsc;
use tokio::time::Duration;

/// Capacity of each per-replica request channel.
const CHAN_SEND_CAP: usize = 64;

/// Capacity of the merged reply channel.
const CHAN_RECV_CAP: usize = 1024;

/// How long `leave()` waits for leave acknowledgements before giving up.
const LEAVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Pool of framed connections to the replica set.
pub(crate) struct ServerPool {
    /// My client ID.
    me: ClientId,

    /// Map from replica ID -> request sender to its messenger task. A
    /// replica that could not be connected has no entry; a replica whose
    /// connection died has a closed entry. Either way it simply never
    /// replies, and engines only ever count replies.
    tx_sends: HashMap<ReplicaId, mpsc::Sender<ApiRequest>>,

    /// Merged reply channel receiver.
    rx_recv: mpsc::Receiver<(ReplicaId, ApiReply)>,

    /// Clone of the merged reply sender, kept so the channel never closes
    /// and `recv_reply()` blocks (rather than erroring) when all messengers
    /// are gone; deadlines are the engines' responsibility.
    _tx_recv: mpsc::Sender<(ReplicaId, ApiReply)>,
}

impl ServerPool {
    /// Connects to every replica in the address map and spawns one
    /// messenger task per successful connection. Unreachable replicas are
    /// logged and skipped; quorum logic decides later whether enough of the
    /// cluster is alive.
    pub(crate) async fn new_and_connect(
        me: ClientId,
        addrs: &HashMap<ReplicaId, SocketAddr>,
    ) -> Result<Self, ReplikvError> {
        let (tx_recv, rx_recv) = mpsc::channel(CHAN_RECV_CAP);
        let mut tx_sends = HashMap::new();

        for (&replica, &addr) in addrs {
            match ClientApiStub::new_by_connect(me, addr).await {
                Ok((send_stub, recv_stub)) => {
                    let (tx_send, rx_send) = mpsc::channel(CHAN_SEND_CAP);
                    tokio::spawn(Self::messenger_task(
                        me,
                        replica,
                        send_stub,
                        recv_stub,
                        rx_send,
                        tx_recv.clone(),
                    ));
                    tx_sends.insert(replica, tx_send);
                }
                Err(e) => {
                    pf_warn!(me; "failed to connect to replica {}: {}", replica, e);
                }
            }
        }
        pf_debug!(me; "connected to {} of {} replicas", tx_sends.len(), addrs.len());

        Ok(ServerPool {
            me,
            tx_sends,
            rx_recv,
            _tx_recv: tx_recv,
        })
    }

    /// Number of replicas this pool holds a (possibly dead) connection to.
    pub(crate) fn conns(&self) -> usize {
        self.tx_sends.len()
    }

    /// Hands a request to one replica's messenger task. Returns whether the
    /// hand-off succeeded; a dead connection is logged and counted as a
    /// failed replica, never an error.
    pub(crate) async fn send_to(
        &mut self,
        replica: ReplicaId,
        req: ApiRequest,
    ) -> bool {
        match self.tx_sends.get(&replica) {
            Some(tx_send) => match tx_send.send(req).await {
                Ok(()) => true,
                Err(_) => {
                    pf_debug!(self.me; "replica {} connection is gone", replica);
                    false
                }
            },
            None => {
                pf_debug!(self.me; "replica {} was never connected", replica);
                false
            }
        }
    }

    /// Broadcasts a request to all replica connections, cloning it per
    /// replica. Returns the number of successful hand-offs.
    pub(crate) async fn bcast(&mut self, req: ApiRequest) -> usize {
        let replicas: Vec<ReplicaId> = self.tx_sends.keys().copied().collect();
        let mut handed = 0;
        for replica in replicas {
            if self.send_to(replica, req.clone()).await {
                handed += 1;
            }
        }
        handed
    }

    /// Waits for the next reply from any replica. Never errors out; when no
    /// replica will ever reply again this pends forever, and the caller's
    /// deadline timer decides.
    pub(crate) async fn recv_reply(&mut self) -> (ReplicaId, ApiReply) {
        loop {
            if let Some((replica, reply)) = self.rx_recv.recv().await {
                return (replica, reply);
            }
            // unreachable while `_tx_recv` is held, but be safe
        }
    }

    /// Sends leave notifications to all connected replicas and waits
    /// briefly for their acknowledgements.
    pub(crate) async fn leave(&mut self) {
        let mut awaiting = self.bcast(ApiRequest::Leave).await;

        let deadline = OpDeadline::new(LEAVE_TIMEOUT);
        while awaiting > 0 {
            tokio::select! {
                () = deadline.expired() => {
                    pf_debug!(self.me; "gave up on {} leave acks", awaiting);
                    break;
                }

                (replica, reply) = self.recv_reply() => {
                    if let ApiReply::Leave = reply {
                        pf_trace!(self.me; "left replica {}", replica);
                        awaiting -= 1;
                    }
                    // stale replies of finished operations are dropped here
                }
            }
        }

        self.tx_sends.clear();
    }
}

// ServerPool messenger task implementation
impl ServerPool {
    /// Per-replica messenger task function: forwards requests from the
    /// pool's send channel onto the wire, and replies from the wire into
    /// the merged reply channel.
    async fn messenger_task(
        me: ClientId,
        replica: ReplicaId,
        mut send_stub: ClientSendStub,
        mut recv_stub: ClientRecvStub,
        mut rx_send: mpsc::Receiver<ApiRequest>,
        tx_recv: mpsc::Sender<(ReplicaId, ApiReply)>,
    ) {
        pf_debug!(me; "messenger task for replica {} spawned", replica);

        loop {
            tokio::select! {
                // request to put on the wire
                req = rx_send.recv() => {
                    match req {
                        Some(req) => {
                            let sent = match send_stub.send_req(Some(&req)) {
                                Ok(true) => Ok(()),
                                Ok(false) => send_stub.flush_req().await,
                                Err(e) => Err(e),
                            };
                            if let Err(e) = sent {
                                pf_debug!(me; "error sending to replica {}: {}", replica, e);
                                break;
                            }
                        },
                        // pool dropped; stop
                        None => break,
                    }
                },

                // reply arriving from the wire
                reply = recv_stub.recv_reply() => {
                    match reply {
                        Ok(reply) => {
                            if tx_recv.send((replica, reply)).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => {
                            pf_debug!(me; "connection to replica {} lost: {}", replica, e);
                            break;
                        }
                    }
                },
            }
        }

        pf_debug!(me; "messenger task for replica {} exitted", replica);
    }
}
