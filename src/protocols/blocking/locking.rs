//! Blocking client engine: lock-quorum acquisition, serial locked reads and
//! writes, and best-effort lock release.

use std::collections::HashSet;

use super::BlockingClient;

use crate::client::{ReadOutcome, WriteOutcome};
use crate::server::{ApiReply, ApiRequest, ReplicaId};
use crate::utils::{ReplikvError, Timestamp};

// BlockingClient lock-protocol orchestration
impl BlockingClient {
    /// Write path: take a lock quorum, write to every locked replica
    /// serially with a fresh timestamp, then release everything. Succeeds
    /// iff at least W locked writes were acknowledged.
    pub(super) async fn locked_write(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<WriteOutcome, ReplikvError> {
        let population = self.cluster.population() as usize;
        let write_quorum = self.cluster.write_quorum as usize;
        if write_quorum > population {
            return logged_err!(self.id; "write quorum {} > population {}",
                                        write_quorum, population);
        }

        // phase 1: acquire locks
        let granted = self.lock_phase(key, write_quorum).await?;
        if granted.len() < write_quorum {
            pf_debug!(self.id; "write '{}' got only {} of {} locks",
                               key, granted.len(), write_quorum);
            self.release_locks(key, &granted).await?;
            return Ok(WriteOutcome::QuorumFailed);
        }

        // phase 2: write to each locked replica serially
        let ts = self.clock.issue();
        pf_debug!(self.id; "write '{}' ts={} to {} locked replicas",
                           key, ts, granted.len());
        let mut acks = 0;
        for &replica in &granted {
            match self.write_one(replica, key, value.clone(), ts).await? {
                Some(ack_ts) => {
                    self.clock.raise(ack_ts);
                    acks += 1;
                    pf_trace!(self.id; "write ack from {} ({}/{})",
                                       replica, acks, write_quorum);
                }
                None => {
                    pf_trace!(self.id; "write failed at {}", replica);
                }
            }
        }

        // phase 3: release locks regardless of the write outcome
        self.release_locks(key, &granted).await?;

        if acks >= write_quorum {
            pf_debug!(self.id; "write '{}' committed ts={}", key, ts);
            Ok(WriteOutcome::Committed { ts })
        } else {
            pf_debug!(self.id; "write '{}' got only {} of {} acks",
                               key, acks, write_quorum);
            Ok(WriteOutcome::QuorumFailed)
        }
    }

    /// Read path: take a lock quorum of R, read each locked replica
    /// serially, pick the maximum-timestamp reply, release. Exclusive locks
    /// already order this read against writers, so no write-back follows.
    pub(super) async fn locked_read(
        &mut self,
        key: &str,
    ) -> Result<ReadOutcome, ReplikvError> {
        let population = self.cluster.population() as usize;
        let read_quorum = self.cluster.read_quorum as usize;
        if read_quorum > population {
            return logged_err!(self.id; "read quorum {} > population {}",
                                        read_quorum, population);
        }

        // phase 1: acquire locks
        let granted = self.lock_phase(key, read_quorum).await?;
        if granted.len() < read_quorum {
            pf_debug!(self.id; "read '{}' got only {} of {} locks",
                               key, granted.len(), read_quorum);
            self.release_locks(key, &granted).await?;
            return Ok(ReadOutcome::QuorumFailed);
        }

        // phase 2: read from each locked replica serially
        let mut collected: Vec<(Timestamp, Vec<u8>)> = vec![];
        for &replica in &granted {
            match self.read_one(replica, key).await? {
                Some((ts, value)) => {
                    pf_trace!(self.id; "read reply from {} ts={}", replica, ts);
                    collected.push((ts, value));
                }
                None => {
                    pf_trace!(self.id; "read failed at {}", replica);
                }
            }
        }
        if collected.is_empty() {
            pf_debug!(self.id; "read '{}' got no successful replies", key);
            self.release_locks(key, &granted).await?;
            return Ok(ReadOutcome::QuorumFailed);
        }

        // phase 3: pick the maximum-timestamp reply; a tie keeps the
        // earliest replica's value
        let (t_max, v_max) = collected.into_iter().fold(
            (0, Vec::new()),
            |max, (ts, value)| if ts > max.0 { (ts, value) } else { max },
        );

        // phase 4: release locks
        self.release_locks(key, &granted).await?;

        pf_debug!(self.id; "read '{}' complete ts={}", key, t_max);
        Ok(ReadOutcome::Value {
            value: v_max,
            ts: t_max,
        })
    }

    /// Requests the lock for `key` from every replica in parallel and
    /// collects lock replies until all contacted replicas answered or the
    /// deadline fires. Waiting for stragglers (instead of stopping at the
    /// quorum count) means no grant goes unnoticed, so every granted lock
    /// is released by the caller rather than leaking until server timeout.
    async fn lock_phase(
        &mut self,
        key: &str,
        needed: usize,
    ) -> Result<Vec<ReplicaId>, ReplikvError> {
        let req_id = self.next_req;
        self.next_req += 1;

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };

        pf_debug!(self.id; "locking '{}' needs {} of {}",
                           key, needed, self.cluster.population());
        let contacted = pool
            .bcast(ApiRequest::Lock {
                id: req_id,
                key: key.into(),
                client: self.id,
            })
            .await;

        let mut granted = vec![];
        if contacted == 0 {
            return Ok(granted);
        }

        self.deadline.restart();
        let mut replied = 0;
        loop {
            tokio::select! {
                () = self.deadline.expired() => {
                    pf_debug!(self.id; "locking '{}' deadline exceeded", key);
                    break;
                }

                (replica, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Lock { id, granted: grant, .. }
                            if id == req_id =>
                        {
                            replied += 1;
                            if grant {
                                granted.push(replica);
                                pf_trace!(self.id; "lock granted by {} ({}/{})",
                                                   replica, granted.len(), needed);
                            } else {
                                pf_trace!(self.id; "lock denied by {}", replica);
                            }
                            if replied >= contacted {
                                break;
                            }
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        }

        Ok(granted)
    }

    /// Issues one locked write RPC and waits for its acknowledgement.
    /// Returns the server's timestamp on success, `None` on rejection,
    /// transport failure, or deadline.
    async fn write_one(
        &mut self,
        replica: ReplicaId,
        key: &str,
        value: Vec<u8>,
        ts: Timestamp,
    ) -> Result<Option<Timestamp>, ReplikvError> {
        let req_id = self.next_req;
        self.next_req += 1;

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };

        if !pool
            .send_to(
                replica,
                ApiRequest::LockedWrite {
                    id: req_id,
                    key: key.into(),
                    value,
                    ts,
                    client: self.id,
                },
            )
            .await
        {
            return Ok(None);
        }

        self.deadline.restart();
        let ack = loop {
            tokio::select! {
                () = self.deadline.expired() => break None,

                (from, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Write { id, ts: ack_ts, success }
                            if id == req_id && from == replica =>
                        {
                            break if success { Some(ack_ts) } else { None };
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        };
        Ok(ack)
    }

    /// Issues one locked read RPC and waits for its reply. Returns the
    /// entry on success, `None` on rejection, transport failure, or
    /// deadline.
    async fn read_one(
        &mut self,
        replica: ReplicaId,
        key: &str,
    ) -> Result<Option<(Timestamp, Vec<u8>)>, ReplikvError> {
        let req_id = self.next_req;
        self.next_req += 1;

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };

        if !pool
            .send_to(
                replica,
                ApiRequest::LockedRead {
                    id: req_id,
                    key: key.into(),
                    client: self.id,
                },
            )
            .await
        {
            return Ok(None);
        }

        self.deadline.restart();
        let entry = loop {
            tokio::select! {
                () = self.deadline.expired() => break None,

                (from, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Read { id, value, ts, success }
                            if id == req_id && from == replica =>
                        {
                            break if success { Some((ts, value)) } else { None };
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        };
        Ok(entry)
    }

    /// Best-effort release of every granted lock: send all unlocks, then
    /// drain acknowledgements until the deadline. A release that fails is
    /// accepted silently; the server's lock timeout is the safety net.
    async fn release_locks(
        &mut self,
        key: &str,
        granted: &[ReplicaId],
    ) -> Result<(), ReplikvError> {
        if granted.is_empty() {
            return Ok(());
        }

        let mut sends = vec![];
        for &replica in granted {
            let req_id = self.next_req;
            self.next_req += 1;
            sends.push((replica, req_id));
        }

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };
        let mut pending: HashSet<_> = HashSet::new();
        for (replica, req_id) in sends {
            if pool
                .send_to(
                    replica,
                    ApiRequest::Unlock {
                        id: req_id,
                        key: key.into(),
                        client: self.id,
                    },
                )
                .await
            {
                pending.insert(req_id);
            } else {
                pf_debug!(self.id; "unlock of '{}' unreachable at {}",
                                   key, replica);
            }
        }

        self.deadline.restart();
        while !pending.is_empty() {
            tokio::select! {
                () = self.deadline.expired() => {
                    pf_debug!(self.id; "gave up on {} unlock acks", pending.len());
                    break;
                }

                (replica, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Unlock { id, success }
                            if pending.contains(&id) =>
                        {
                            pending.remove(&id);
                            if !success {
                                pf_debug!(self.id; "unlock of '{}' refused by {}",
                                                   key, replica);
                            }
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
