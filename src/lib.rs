//! Public interface to the replikv core library, linked by the server
//! executable, the client executable, and the end-to-end tests.
//!
//! replikv is a replicated single-register key-value store over a fixed set
//! of replica servers, offering two interchangeable protocols: a wait-free
//! ABD quorum register and a lock-based blocking register.

#[macro_use]
mod utils;

mod client;
mod protocols;
mod server;

#[cfg(test)]
mod e2e_tests;

pub use crate::client::{ClientId, GenericEndpoint, ReadOutcome, WriteOutcome};
pub use crate::protocols::{
    ClientConfigAbd, ClientConfigBlocking, RegProtocol, ReplicaConfigAbd,
    ReplicaConfigBlocking,
};
pub use crate::server::{
    ApiReply, ApiRequest, GenericReplica, RegisterEntry, ReplicaId, RequestId,
};
pub use crate::utils::{
    wall_ms, ClusterConfig, LogicalClock, ReplikvError, ServerInfo, Timestamp,
    WallClock,
};
