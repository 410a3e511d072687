//! ABD client engine: one-phase quorum writes and two-phase quorum reads.

use super::AbdClient;

use crate::client::{ReadOutcome, WriteOutcome};
use crate::server::{ApiReply, ApiRequest};
use crate::utils::{ReplikvError, Timestamp};

// AbdClient quorum orchestration
impl AbdClient {
    /// Write path: issue a fresh timestamp strictly above everything this
    /// client has seen, broadcast, and succeed on W acknowledgements.
    pub(super) async fn quorum_write(
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

        let ts = self.clock.issue();
        let req_id = self.next_req;
        self.next_req += 1;

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };

        pf_debug!(self.id; "write '{}' ts={} needs W={} of {}",
                           key, ts, write_quorum, population);
        let contacted = pool
            .bcast(ApiRequest::Write {
                id: req_id,
                key: key.into(),
                value,
                ts,
            })
            .await;
        if contacted < write_quorum {
            pf_debug!(self.id; "write '{}' reaches only {} replicas",
                               key, contacted);
            return Ok(WriteOutcome::QuorumFailed);
        }

        self.deadline.restart();
        let mut acks = 0;
        let mut replied = 0;
        let outcome = loop {
            tokio::select! {
                () = self.deadline.expired() => {
                    pf_debug!(self.id; "write '{}' deadline exceeded", key);
                    break WriteOutcome::QuorumFailed;
                }

                (replica, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Write { id, ts: ack_ts, success }
                            if id == req_id =>
                        {
                            replied += 1;
                            if success {
                                self.clock.raise(ack_ts);
                                acks += 1;
                                pf_trace!(self.id; "write ack from {} ({}/{})",
                                                   replica, acks, write_quorum);
                                if acks >= write_quorum {
                                    break WriteOutcome::Committed { ts };
                                }
                            } else {
                                pf_trace!(self.id; "write rejected by {}", replica);
                            }
                            if replied >= contacted {
                                break WriteOutcome::QuorumFailed;
                            }
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        };

        if outcome == WriteOutcome::QuorumFailed {
            pf_debug!(self.id; "write '{}' got only {} of {} acks",
                               key, acks, write_quorum);
        }
        Ok(outcome)
    }

    /// Read path, phase 1: query all replicas and collect R successful
    /// replies; phase 2: write the maximum-timestamp value back to a write
    /// quorum over the same connections, so any later read quorum
    /// intersects a replica that stores it.
    pub(super) async fn quorum_read(
        &mut self,
        key: &str,
    ) -> Result<ReadOutcome, ReplikvError> {
        let population = self.cluster.population() as usize;
        let read_quorum = self.cluster.read_quorum as usize;
        let write_quorum = self.cluster.write_quorum as usize;
        if read_quorum > population || write_quorum > population {
            return logged_err!(self.id; "quorums R={} W={} > population {}",
                                        read_quorum, write_quorum, population);
        }

        let req_id = self.next_req;
        self.next_req += 1;
        let peeked = self.clock.peek();

        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return logged_err!(self.id; "client not connected"),
        };

        // phase 1: query a read quorum
        pf_debug!(self.id; "read '{}' needs R={} of {}",
                           key, read_quorum, population);
        let contacted = pool
            .bcast(ApiRequest::Read {
                id: req_id,
                key: key.into(),
                ts: peeked,
            })
            .await;
        if contacted < read_quorum {
            pf_debug!(self.id; "read '{}' reaches only {} replicas",
                               key, contacted);
            return Ok(ReadOutcome::QuorumFailed);
        }

        self.deadline.restart();
        let mut collected: Vec<(Timestamp, Vec<u8>)> = vec![];
        let mut replied = 0;
        loop {
            tokio::select! {
                () = self.deadline.expired() => {
                    pf_debug!(self.id; "read '{}' deadline exceeded", key);
                    break;
                }

                (replica, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Read { id, value, ts, success }
                            if id == req_id =>
                        {
                            replied += 1;
                            if success {
                                pf_trace!(self.id; "read reply from {} ts={} ({}/{})",
                                                   replica, ts,
                                                   collected.len() + 1, read_quorum);
                                collected.push((ts, value));
                                if collected.len() >= read_quorum {
                                    break;
                                }
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

        if collected.len() < read_quorum {
            pf_debug!(self.id; "read '{}' got only {} of {} replies",
                               key, collected.len(), read_quorum);
            return Ok(ReadOutcome::QuorumFailed);
        }

        // select the maximum-timestamp reply; a tie keeps the earliest
        // arrival, which is a valid linearization choice either way. The
        // (0, empty) seed is exactly what a never-written key reads as.
        let (t_max, v_max) = collected.into_iter().fold(
            (0, Vec::new()),
            |max, (ts, value)| if ts > max.0 { (ts, value) } else { max },
        );

        // phase 2: write back the chosen value over the same connections
        let writeback_ts = t_max.max(self.clock.peek()) + 1;
        self.clock.raise(writeback_ts);
        let wb_req_id = self.next_req;
        self.next_req += 1;

        pf_debug!(self.id; "read '{}' write-back t_max={} wb_ts={} needs W={}",
                           key, t_max, writeback_ts, write_quorum);
        let contacted = pool
            .bcast(ApiRequest::Write {
                id: wb_req_id,
                key: key.into(),
                value: v_max.clone(),
                ts: writeback_ts,
            })
            .await;
        if contacted < write_quorum {
            pf_debug!(self.id; "write-back of '{}' reaches only {} replicas",
                               key, contacted);
            return Ok(ReadOutcome::QuorumFailed);
        }

        self.deadline.restart();
        let mut acks = 0;
        let mut replied = 0;
        let committed = loop {
            tokio::select! {
                () = self.deadline.expired() => {
                    pf_debug!(self.id; "write-back of '{}' deadline exceeded", key);
                    break false;
                }

                (replica, reply) = pool.recv_reply() => {
                    match reply {
                        ApiReply::Write { id, ts: ack_ts, success }
                            if id == wb_req_id =>
                        {
                            replied += 1;
                            if success {
                                self.clock.raise(ack_ts);
                                acks += 1;
                                pf_trace!(self.id; "write-back ack from {} ({}/{})",
                                                   replica, acks, write_quorum);
                                if acks >= write_quorum {
                                    break true;
                                }
                            }
                            if replied >= contacted {
                                break false;
                            }
                        }

                        reply => {
                            pf_trace!(self.id; "ignoring stale reply {:?}", reply);
                        }
                    }
                }
            }
        };

        if committed {
            pf_debug!(self.id; "read '{}' complete ts={}", key, t_max);
            Ok(ReadOutcome::Value {
                value: v_max,
                ts: t_max,
            })
        } else {
            pf_debug!(self.id; "write-back of '{}' got only {} of {} acks",
                               key, acks, write_quorum);
            Ok(ReadOutcome::QuorumFailed)
        }
    }
}
