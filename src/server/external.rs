//! Server external API module: wire message types and the client-facing
//! TCP endpoint shared by both protocol replicas.

use std::net::SocketAddr;

use crate::client::ClientId;
use crate::server::ReplicaId;
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_bind_with_retry, ReplikvError,
    Timestamp,
};

use bytes::BytesMut;

use serde::{Deserialize, Serialize};

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// External API request ID type, used to correlate replies with requests
/// over the pooled per-replica connections.
pub type RequestId = u64;

/// Request received from a client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Unconditional register read (ABD).
    Read {
        id: RequestId,
        key: String,
        ts: Timestamp,
    },

    /// Unconditional write-with-timestamp (ABD and ABD write-back).
    Write {
        id: RequestId,
        key: String,
        value: Vec<u8>,
        ts: Timestamp,
    },

    /// Per-key lock acquisition (blocking).
    Lock {
        id: RequestId,
        key: String,
        client: ClientId,
    },

    /// Per-key lock release (blocking).
    Unlock {
        id: RequestId,
        key: String,
        client: ClientId,
    },

    /// Owner-checked register read (blocking).
    LockedRead {
        id: RequestId,
        key: String,
        client: ClientId,
    },

    /// Owner-checked write-with-timestamp (blocking).
    LockedWrite {
        id: RequestId,
        key: String,
        value: Vec<u8>,
        ts: Timestamp,
        client: ClientId,
    },

    /// Client leave notification.
    Leave,
}

/// Reply sent back to a client.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiReply {
    /// Register read result; serves both `Read` and `LockedRead`.
    Read {
        id: RequestId,
        value: Vec<u8>,
        ts: Timestamp,
        success: bool,
    },

    /// Write acknowledgement; serves both `Write` and `LockedWrite`.
    Write {
        id: RequestId,
        ts: Timestamp,
        success: bool,
    },

    /// Lock acquisition result.
    Lock {
        id: RequestId,
        granted: bool,
        ts: Timestamp,
    },

    /// Lock release result.
    Unlock { id: RequestId, success: bool },

    /// Leave acknowledgement.
    Leave,
}

impl ApiReply {
    /// The request ID this reply correlates to, if any.
    pub fn req_id(&self) -> Option<RequestId> {
        match self {
            ApiReply::Read { id, .. }
            | ApiReply::Write { id, .. }
            | ApiReply::Lock { id, .. }
            | ApiReply::Unlock { id, .. } => Some(*id),
            ApiReply::Leave => None,
        }
    }
}

/// The client-facing external API module. Owns the acceptor task; each
/// accepted client connection gets a servant task that forwards requests
/// into the shared req channel and writes back replies from its per-client
/// reply channel.
pub(crate) struct ExternalApi {
    /// My replica ID.
    me: ReplicaId,

    /// Receiver side of the req channel.
    rx_req: mpsc::Receiver<(ClientId, ApiRequest)>,

    /// Map from client ID -> sender side of its reply channel, shared with
    /// the client acceptor task.
    tx_replies: flashmap::ReadHandle<ClientId, mpsc::Sender<ApiReply>>,

    /// Termination signal sender to the acceptor and servant tasks.
    tx_term: watch::Sender<bool>,

    /// Join handle of the client acceptor task.
    acceptor_handle: Option<JoinHandle<()>>,
}

// ExternalApi public API implementation
impl ExternalApi {
    /// Creates a new external API module, binds the client-facing TCP
    /// listener, and spawns the acceptor task. Returns an error if binding
    /// fails, so a server whose port is taken exits instead of serving.
    pub(crate) async fn new_and_setup(
        me: ReplicaId,
        api_addr: SocketAddr,
        chan_req_cap: usize,
        chan_reply_cap: usize,
    ) -> Result<Self, ReplikvError> {
        if chan_req_cap == 0 {
            return logged_err!(me; "invalid chan_req_cap {}", chan_req_cap);
        }
        if chan_reply_cap == 0 {
            return logged_err!(
                me;
                "invalid chan_reply_cap {}",
                chan_reply_cap
            );
        }

        let listener = tcp_bind_with_retry(api_addr, 0).await?;
        pf_info!(me; "api listener bound to '{}'", api_addr);

        let (tx_req, rx_req) = mpsc::channel(chan_req_cap);
        let (tx_replies_write, tx_replies_read) =
            flashmap::new::<ClientId, mpsc::Sender<ApiReply>>();
        let (tx_term, rx_term) = watch::channel(false);

        let acceptor_handle = tokio::spawn(Self::acceptor_task(
            me,
            listener,
            tx_req,
            chan_reply_cap,
            tx_replies_write,
            rx_term,
        ));

        Ok(ExternalApi {
            me,
            rx_req,
            tx_replies: tx_replies_read,
            tx_term,
            acceptor_handle: Some(acceptor_handle),
        })
    }

    /// Waits for the next client request from the shared req channel.
    pub(crate) async fn recv_req(
        &mut self,
    ) -> Result<(ClientId, ApiRequest), ReplikvError> {
        match self.rx_req.recv().await {
            Some((client, req)) => Ok((client, req)),
            None => logged_err!(self.me; "req channel has been closed"),
        }
    }

    /// Sends a reply back to a client through its reply channel.
    pub(crate) async fn send_reply(
        &mut self,
        reply: ApiReply,
        client: ClientId,
    ) -> Result<(), ReplikvError> {
        // clone the sender out of the guard so no map guard is held across
        // the await point
        let tx_reply = {
            let guard = self.tx_replies.guard();
            guard.get(&client).cloned()
        };
        match tx_reply {
            Some(tx_reply) => {
                tx_reply.send(reply).await?;
                Ok(())
            }
            None => {
                logged_err!(
                    self.me;
                    "client ID {} not found among active clients",
                    client
                )
            }
        }
    }

    /// Signals all acceptor/servant tasks to terminate and waits for the
    /// acceptor to exit, closing the listener socket.
    pub(crate) async fn shutdown(&mut self) -> Result<(), ReplikvError> {
        self.tx_term.send(true)?;
        if let Some(handle) = self.acceptor_handle.take() {
            handle.await.map_err(ReplikvError::msg)?;
        }
        Ok(())
    }
}

// ExternalApi acceptor task implementation
impl ExternalApi {
    /// Client acceptor task function.
    async fn acceptor_task(
        me: ReplicaId,
        listener: TcpListener,
        tx_req: mpsc::Sender<(ClientId, ApiRequest)>,
        chan_reply_cap: usize,
        mut tx_replies: flashmap::WriteHandle<ClientId, mpsc::Sender<ApiReply>>,
        mut rx_term: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "acceptor task spawned");

        // notifications of exitted servant tasks, for registry cleanup
        let (tx_exit, mut rx_exit) = mpsc::unbounded_channel();

        loop {
            tokio::select! {
                // new client connection
                accepted = listener.accept() => {
                    let mut stream = match accepted {
                        Ok((stream, _addr)) => stream,
                        Err(e) => {
                            pf_warn!(me; "error accepting client: {}", e);
                            continue;
                        }
                    };

                    // receive the client ID handshake
                    let id: ClientId = match stream.read_u64().await {
                        Ok(id) => id,
                        Err(e) => {
                            pf_warn!(me; "error receiving client ID: {}", e);
                            continue;
                        }
                    };

                    let mut guard = tx_replies.guard();
                    if guard.contains_key(&id) {
                        pf_warn!(me; "duplicate client ID listened: {}", id);
                        continue;
                    }
                    pf_info!(me; "accepted new client {}", id);

                    let (tx_reply, rx_reply) = mpsc::channel(chan_reply_cap);
                    guard.insert(id, tx_reply);
                    guard.publish();

                    tokio::spawn(Self::servant_task(
                        me,
                        id,
                        stream,
                        tx_req.clone(),
                        rx_reply,
                        tx_exit.clone(),
                        rx_term.clone(),
                    ));
                },

                // a servant task has exitted
                exited = rx_exit.recv() => {
                    if let Some(id) = exited {
                        let mut guard = tx_replies.guard();
                        guard.remove(id);
                        guard.publish();
                        pf_debug!(me; "removed client {}", id);
                    }
                },

                // receiving termination signal
                _ = rx_term.changed() => break,
            }
        }

        pf_debug!(me; "acceptor task exitted");
    }
}

// ExternalApi servant task implementation
impl ExternalApi {
    /// Writes a reply through the given write half, retrying on full send
    /// buffers until the whole frame is out.
    async fn write_reply(
        reply: &ApiReply,
        conn_write: &OwnedWriteHalf,
        write_buf: &mut BytesMut,
        write_buf_cursor: &mut usize,
    ) -> Result<(), ReplikvError> {
        let mut done =
            safe_tcp_write(write_buf, write_buf_cursor, conn_write, Some(reply))?;
        while !done {
            conn_write.writable().await?;
            done = safe_tcp_write(
                write_buf,
                write_buf_cursor,
                conn_write,
                None::<&ApiReply>,
            )?;
        }
        Ok(())
    }

    /// Reads a request from the given read half.
    async fn read_req(
        read_buf: &mut BytesMut,
        conn_read: &mut OwnedReadHalf,
    ) -> Result<ApiRequest, ReplikvError> {
        safe_tcp_read(read_buf, conn_read).await
    }

    /// Per-client request listener and reply sender task function.
    async fn servant_task(
        me: ReplicaId,
        id: ClientId,
        conn: TcpStream,
        tx_req: mpsc::Sender<(ClientId, ApiRequest)>,
        mut rx_reply: mpsc::Receiver<ApiReply>,
        tx_exit: mpsc::UnboundedSender<ClientId>,
        mut rx_term: watch::Receiver<bool>,
    ) {
        pf_debug!(me; "servant task for client {} spawned", id);

        let (mut conn_read, conn_write) = conn.into_split();
        let mut read_buf = BytesMut::with_capacity(8 + 1024);
        let mut write_buf = BytesMut::with_capacity(8 + 1024);
        let mut write_buf_cursor = 0;

        loop {
            tokio::select! {
                // select between getting a new reply to send back and
                // receiving a new client request, prioritizing the former
                biased;

                // gets a reply to send back
                reply = rx_reply.recv() => {
                    match reply {
                        Some(reply) => {
                            if let Err(e) = Self::write_reply(
                                &reply,
                                &conn_write,
                                &mut write_buf,
                                &mut write_buf_cursor,
                            ).await {
                                pf_warn!(me; "error replying to {}: {}", id, e);
                                break;
                            }
                            pf_trace!(me; "replied to {} reply {:?}", id, reply);
                        },
                        // channel closed and no messages remain
                        None => break,
                    }
                },

                // receives client request
                req = Self::read_req(&mut read_buf, &mut conn_read) => {
                    match req {
                        Ok(ApiRequest::Leave) => {
                            // acknowledge and close this connection
                            if let Err(e) = Self::write_reply(
                                &ApiReply::Leave,
                                &conn_write,
                                &mut write_buf,
                                &mut write_buf_cursor,
                            ).await {
                                pf_warn!(me; "error acking leave of {}: {}", id, e);
                            }
                            pf_info!(me; "client {} left", id);
                            break;
                        },
                        Ok(req) => {
                            pf_trace!(me; "request from {} req {:?}", id, req);
                            if let Err(e) = tx_req.send((id, req)).await {
                                pf_warn!(me; "error sending to tx_req for {}: {}", id, e);
                                break;
                            }
                        },
                        Err(e) => {
                            // most likely a hard client disconnect
                            pf_debug!(me; "error reading request from {}: {}", id, e);
                            break;
                        }
                    }
                },

                // receiving termination signal
                _ = rx_term.changed() => break,
            }
        }

        // tell the acceptor to forget about me
        let _ = tx_exit.send(id);
        pf_debug!(me; "servant task for client {} exitted", id);
    }
}
