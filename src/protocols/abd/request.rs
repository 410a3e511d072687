//! ABD replica's client request handling.

use super::AbdReplica;

use crate::client::ClientId;
use crate::server::{ApiReply, ApiRequest};
use crate::utils::ReplikvError;

// AbdReplica client requests handling
impl AbdReplica {
    /// Handles one client request and sends back its reply.
    pub(super) async fn handle_req(
        &mut self,
        client: ClientId,
        req: ApiRequest,
    ) -> Result<(), ReplikvError> {
        match req {
            ApiRequest::Read { id, key, ts } => {
                // the client's timestamp is carried for clock coupling only;
                // the returned entry does not depend on it
                let entry = self.register.read(&key);
                pf_trace!(self.id; "read '{}' client_ts={} -> ts={}",
                                   key, ts, entry.ts);
                self.external_api
                    .send_reply(
                        ApiReply::Read {
                            id,
                            value: entry.value,
                            ts: entry.ts,
                            success: true,
                        },
                        client,
                    )
                    .await
            }

            ApiRequest::Write { id, key, value, ts } => {
                let final_ts = self.register.apply(&key, value, ts);
                pf_trace!(self.id; "write '{}' client_ts={} -> ts={}",
                                   key, ts, final_ts);
                self.external_api
                    .send_reply(
                        ApiReply::Write {
                            id,
                            ts: final_ts,
                            success: true,
                        },
                        client,
                    )
                    .await
            }

            // lock-protocol operations are rejected on an ABD replica so a
            // misconfigured client fails its quorum instead of hanging
            ApiRequest::Lock { id, key, client: owner } => {
                pf_warn!(self.id; "lock request for '{}' from {} on ABD replica",
                                  key, owner);
                self.external_api
                    .send_reply(
                        ApiReply::Lock {
                            id,
                            granted: false,
                            ts: 0,
                        },
                        client,
                    )
                    .await
            }

            ApiRequest::Unlock { id, key, client: owner } => {
                pf_warn!(self.id; "unlock request for '{}' from {} on ABD replica",
                                  key, owner);
                self.external_api
                    .send_reply(ApiReply::Unlock { id, success: false }, client)
                    .await
            }

            ApiRequest::LockedRead { id, key, client: owner } => {
                pf_warn!(self.id; "locked read of '{}' from {} on ABD replica",
                                  key, owner);
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

            ApiRequest::LockedWrite { id, key, client: owner, .. } => {
                pf_warn!(self.id; "locked write to '{}' from {} on ABD replica",
                                  key, owner);
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
