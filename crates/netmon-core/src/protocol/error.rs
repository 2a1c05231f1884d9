use thiserror::Error;

/// Wire-level decode/encode failures.
///
/// None of these are fatal to a receive loop; callers drop the offending
/// buffer (or, for `ChecksumMismatch`, log and keep processing).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed {message} packet: expected {expected} bytes, got {actual}")]
    MalformedPacket {
        message: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("checksum mismatch: computed {expected}, packet carries {actual}")]
    ChecksumMismatch { expected: u8, actual: u16 },

    #[error("{field} value {value} does not fit its wire width")]
    FieldOverflow { field: &'static str, value: i64 },

    #[error("invalid {field} code {value}")]
    InvalidField { field: &'static str, value: u8 },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
