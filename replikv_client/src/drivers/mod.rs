//! Closed-loop client-side driver implementation.

mod closed_loop;

pub use closed_loop::{DriverClosedLoop, DriverReply};
