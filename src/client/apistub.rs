//! Client-side API communication stub: one framed TCP connection to one
//! replica server, split into separately owned send/recv halves so the two
//! directions can sit in different `tokio::select!` branches.

use std::net::SocketAddr;

use crate::client::ClientId;
use crate::server::{ApiReply, ApiRequest};
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_with_retry, ReplikvError,
};

use bytes::BytesMut;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Client API connection stub creator.
pub(crate) struct ClientApiStub;

impl ClientApiStub {
    /// Connects to the given server address and sends the client ID
    /// handshake, returning a split pair of owned send/recv stubs on
    /// success.
    pub(crate) async fn new_by_connect(
        id: ClientId,
        addr: SocketAddr,
    ) -> Result<(ClientSendStub, ClientRecvStub), ReplikvError> {
        pf_debug!(id; "connecting to server '{}'...", addr);
        let mut stream = tcp_connect_with_retry(addr, 1).await?;
        stream.write_u64(id).await?; // send my client ID

        let (read_half, write_half) = stream.into_split();
        let send_stub = ClientSendStub::new(id, write_half);
        let recv_stub = ClientRecvStub::new(id, read_half);

        Ok((send_stub, recv_stub))
    }
}

/// Client write stub that owns a TCP write half.
pub(crate) struct ClientSendStub {
    /// My client ID.
    id: ClientId,

    /// Write-half split of the TCP connection stream.
    conn_write: OwnedWriteHalf,

    /// Request write buffer for deadlock avoidance.
    req_buf: BytesMut,

    /// Request write buffer cursor at first unwritten byte.
    req_buf_cursor: usize,
}

impl ClientSendStub {
    /// Creates a new write stub.
    fn new(id: ClientId, conn_write: OwnedWriteHalf) -> Self {
        ClientSendStub {
            id,
            conn_write,
            req_buf: BytesMut::with_capacity(8 + 1024),
            req_buf_cursor: 0,
        }
    }

    /// Sends a request on the established server connection. Returns:
    ///   - `Ok(true)` if successful
    ///   - `Ok(false)` if the socket send buffer is full; in this case the
    ///     request is saved, and the next calls to `send_req()` must give
    ///     `req == None` to retry until successful
    ///   - `Err(err)` if any unexpected error occurs
    pub(crate) fn send_req(
        &mut self,
        req: Option<&ApiRequest>,
    ) -> Result<bool, ReplikvError> {
        let success = safe_tcp_write(
            &mut self.req_buf,
            &mut self.req_buf_cursor,
            &self.conn_write,
            req,
        )?;
        if !success {
            pf_debug!(self.id; "send_req would block; TCP buffer full?");
        }
        Ok(success)
    }

    /// Waits until the pending request from an earlier `Ok(false)` send has
    /// been fully written out.
    pub(crate) async fn flush_req(&mut self) -> Result<(), ReplikvError> {
        while !self.req_buf.is_empty() {
            self.conn_write.writable().await?;
            self.send_req(None)?;
        }
        Ok(())
    }
}

/// Client read stub that owns a TCP read half.
pub(crate) struct ClientRecvStub {
    /// My client ID.
    _id: ClientId,

    /// Read-half split of the TCP connection stream.
    conn_read: OwnedReadHalf,

    /// Reply read buffer for cancellation safety.
    reply_buf: BytesMut,
}

impl ClientRecvStub {
    /// Creates a new read stub.
    fn new(id: ClientId, conn_read: OwnedReadHalf) -> Self {
        ClientRecvStub {
            _id: id,
            conn_read,
            reply_buf: BytesMut::with_capacity(8 + 1024),
        }
    }

    /// Receives a reply from the established server connection.
    /// Cancellation-safe, so it can sit in a `tokio::select!` branch.
    pub(crate) async fn recv_reply(&mut self) -> Result<ApiReply, ReplikvError> {
        safe_tcp_read(&mut self.reply_buf, &mut self.conn_read).await
    }
}
