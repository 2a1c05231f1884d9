//! Error types for agent sessions, probes and sinks

use crate::models::AgentId;
use crate::protocol::ProtocolError;
use thiserror::Error;

/// Errors raised by an agent session and its reporting loops
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("agent {agent_id} failed to register after {attempts} attempts")]
    RegistrationFailed { agent_id: AgentId, attempts: u32 },

    #[error("no acknowledgement for sequence {seq}")]
    AckTimeout { seq: u16 },

    #[error("alert delivery timed out connecting to collector")]
    AlertTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Fatal measurement failure; aborts only the owning task's loop
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no probe for metric kind {0}")]
    Unsupported(crate::models::MetricKind),

    #[error("probe failed: {0}")]
    Failed(String),
}

/// Failure to persist a record; logged by the caller, never propagated
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sink rejected record: {0}")]
    Rejected(String),
}
