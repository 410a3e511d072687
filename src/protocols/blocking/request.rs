//! Blocking replica's client request handling.

use super::BlockingReplica;

use crate::client::ClientId;
use crate::server::{ApiReply, ApiRequest};
use crate::utils::{wall_ms, ReplikvError};

// BlockingReplica client requests handling
impl BlockingReplica {
    /// Handles one client request and sends back its reply. Lock checks and
    /// register updates run back-to-back on the event loop task, so each
    /// request is atomic at this replica.
    pub(super) async fn handle_req(
        &mut self,
        client: ClientId,
        req: ApiRequest,
    ) -> Result<(), ReplikvError> {
        match req {
            ApiRequest::Lock { id, key, client: owner } => {
                let granted = self.locks.acquire(&key, owner);
                pf_trace!(self.id; "lock '{}' by {} granted={}",
                                   key, owner, granted);
                self.external_api
                    .send_reply(
                        ApiReply::Lock {
                            id,
                            granted,
                            ts: wall_ms(),
                        },
                        client,
                    )
                    .await
            }

            ApiRequest::Unlock { id, key, client: owner } => {
                let success = self.locks.release(&key, owner);
                pf_trace!(self.id; "unlock '{}' by {} success={}",
                                   key, owner, success);
                self.external_api
                    .send_reply(ApiReply::Unlock { id, success }, client)
                    .await
            }

            ApiRequest::LockedRead { id, key, client: owner } => {
                // only the lock owner may read; no data leaves otherwise
                let reply = if self.locks.owns(&key, owner) {
                    let entry = self.register.read(&key);
                    pf_trace!(self.id; "read '{}' by {} -> ts={}",
                                       key, owner, entry.ts);
                    ApiReply::Read {
                        id,
                        value: entry.value,
                        ts: entry.ts,
                        success: true,
                    }
                } else {
                    pf_trace!(self.id; "read '{}' by {} without lock", key, owner);
                    ApiReply::Read {
                        id,
                        value: Vec::new(),
                        ts: 0,
                        success: false,
                    }
                };
                self.external_api.send_reply(reply, client).await
            }

            ApiRequest::LockedWrite { id, key, value, ts, client: owner } => {
                let reply = if self.locks.owns(&key, owner) {
                    let final_ts = self.register.apply(&key, value, ts);
                    pf_trace!(self.id; "write '{}' by {} client_ts={} -> ts={}",
                                       key, owner, ts, final_ts);
                    ApiReply::Write {
                        id,
                        ts: final_ts,
                        success: true,
                    }
                } else {
                    pf_trace!(self.id; "write '{}' by {} without lock", key, owner);
                    ApiReply::Write {
                        id,
                        ts: 0,
                        success: false,
                    }
                };
                self.external_api.send_reply(reply, client).await
            }

            // quorum-protocol operations are rejected on a blocking replica
            ApiRequest::Read { id, key, .. } => {
                pf_warn!(self.id; "ABD read of '{}' on blocking replica", key);
                self.external_api
                    .send_reply(
                        ApiReply::Read {
                            id,
                            value: Vec::new(),
                            ts: 0,
                            success: false,
                        },
                        client,
                    )
                    .await
            }

            ApiRequest::Write { id, key, .. } => {
                pf_warn!(self.id; "ABD write to '{}' on blocking replica", key);
                self.external_api
                    .send_reply(
                        ApiReply::Write {
                            id,
                            ts: 0,
                            success: false,
                        },
                        client,
                    )
                    .await
            }

            // leave notifications are consumed by the servant tasks
            ApiRequest::Leave => Ok(()),
        }
    }
}
