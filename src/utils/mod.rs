//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod clock;
mod cluster;
mod deadline;
mod error;
mod safetcp;

pub use clock::{wall_ms, LogicalClock, Timestamp, WallClock};
pub use cluster::{ClusterConfig, ServerInfo};
pub use error::ReplikvError;

pub(crate) use deadline::OpDeadline;
pub(crate) use safetcp::{
    safe_tcp_read, safe_tcp_write, tcp_bind_with_retry, tcp_connect_with_retry,
};
