//! Network monitoring fabric
//!
//! Agents measure per-task metrics and report them over UDP to a collector,
//! which deduplicates them, signals overload through its ACKs and accepts
//! threshold alerts over TCP.

pub mod agent;
pub mod collector;
pub mod config;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod probe;
pub mod protocol;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use error::{ProbeError, SessionError, SinkError};
pub use models::{AgentId, MetricKind, Sample, Task};
pub use protocol::ProtocolError;
