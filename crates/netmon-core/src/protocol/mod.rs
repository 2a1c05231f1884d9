//! Binary wire protocol between agents and the collector
//!
//! Four fixed layouts, all integers big-endian:
//!
//! | Message  | Layout                                                                   | Bytes  |
//! |----------|--------------------------------------------------------------------------|--------|
//! | REGISTER | type u8, seq u16, agent u16, checksum u16                                | 7      |
//! | METRIC   | header, task u32, kind u8, value i32, timestamp u64, reserved u16        | 26     |
//! | ACK      | header, [flow u8]                                                        | 7 / 8  |
//! | ALERT    | agent u16, alert type u8, kind u8, value i32, threshold i32, ts u64      | 20     |
//!
//! The checksum occupies a 16-bit slot but only ever carries an 8-bit value:
//! the sum of type, seq, agent id (and the value for METRIC) modulo 256.
//! Sample values and thresholds travel as two's-complement `i32`; the
//! unavailable sentinel is never put on the wire because reporters skip
//! those cycles.

mod codec;
mod error;


pub use codec::{checksum, decode_alert, decode_datagram};
pub use error::{ProtocolError, Result};

use crate::models::{AgentId, AlertRecord, AlertType, MetricKind, MetricSample, SampleRecord};

/// Size of a REGISTER datagram
pub const REGISTER_LEN: usize = 7;
/// Size of a METRIC datagram
pub const METRIC_LEN: usize = 26;
/// Size of an ACK without the flow-control byte
pub const ACK_LEN: usize = 7;
/// Size of an ACK carrying the flow-control byte
pub const ACK_WITH_FLOW_LEN: usize = 8;
/// Size of an ALERT message on the stream channel
pub const ALERT_LEN: usize = 20;
/// Receive buffer size for datagrams
pub const MAX_DATAGRAM_LEN: usize = 1024;

/// Datagram message type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Register = 1,
    Metric = 2,
    Ack = 3,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageType::Register),
            2 => Some(MessageType::Metric),
            3 => Some(MessageType::Ack),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Register => "REGISTER",
            MessageType::Metric => "METRIC",
            MessageType::Ack => "ACK",
        }
    }
}

/// Registration request, always sent with sequence 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub seq: u16,
    pub agent_id: AgentId,
}

impl Register {
    pub fn new(agent_id: AgentId) -> Self {
        Self { seq: 0, agent_id }
    }
}

/// One metric sample report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricReport {
    pub seq: u16,
    pub agent_id: AgentId,
    pub task_id: u32,
    pub kind: MetricKind,
    pub value: i64,
    pub timestamp: u64,
}

impl MetricReport {
    pub fn from_sample(seq: u16, agent_id: AgentId, sample: &MetricSample) -> Self {
        Self {
            seq,
            agent_id,
            task_id: sample.task_id,
            kind: sample.kind,
            value: sample.value,
            timestamp: sample.timestamp,
        }
    }

    /// Sink record for this report
    pub fn to_record(&self) -> SampleRecord {
        SampleRecord {
            agent_id: self.agent_id,
            task_id: self.task_id,
            metric_kind: self.kind,
            value: self.value,
            timestamp: self.timestamp,
        }
    }
}

/// Acknowledgement; `flow` is `None` for the 7-byte form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub seq: u16,
    pub agent_id: AgentId,
    pub flow: Option<bool>,
}

impl Ack {
    /// Acknowledgement without a flow-control byte (used for REGISTER)
    pub fn plain(seq: u16, agent_id: AgentId) -> Self {
        Self {
            seq,
            agent_id,
            flow: None,
        }
    }

    /// Acknowledgement carrying the flow-control byte (used for METRIC)
    pub fn with_flow(seq: u16, agent_id: AgentId, overloaded: bool) -> Self {
        Self {
            seq,
            agent_id,
            flow: Some(overloaded),
        }
    }

    /// Whether the collector asked the agent to slow down
    pub fn overloaded(&self) -> bool {
        self.flow.unwrap_or(false)
    }
}

/// Any message travelling over the datagram channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Register(Register),
    Metric(MetricReport),
    Ack(Ack),
}

impl Datagram {
    pub fn message_type(&self) -> MessageType {
        match self {
            Datagram::Register(_) => MessageType::Register,
            Datagram::Metric(_) => MessageType::Metric,
            Datagram::Ack(_) => MessageType::Ack,
        }
    }

    pub fn seq(&self) -> u16 {
        match self {
            Datagram::Register(r) => r.seq,
            Datagram::Metric(m) => m.seq,
            Datagram::Ack(a) => a.seq,
        }
    }

    pub fn agent_id(&self) -> AgentId {
        match self {
            Datagram::Register(r) => r.agent_id,
            Datagram::Metric(m) => m.agent_id,
            Datagram::Ack(a) => a.agent_id,
        }
    }

    /// Checksum the sender should have put on this message
    pub fn expected_checksum(&self) -> u8 {
        let mut fields = vec![
            u32::from(self.message_type().code()),
            u32::from(self.seq()),
            u32::from(self.agent_id()),
        ];
        if let Datagram::Metric(m) = self {
            // Low 32 bits of the value are its wire representation
            fields.push(m.value as u32);
        }
        checksum(&fields)
    }
}

/// A decoded datagram together with the checksum it carried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub datagram: Datagram,
    pub checksum: u16,
}

impl Frame {
    /// Check the carried checksum; the caller decides whether a mismatch matters
    pub fn verify_checksum(&self) -> Result<()> {
        let expected = self.datagram.expected_checksum();
        if self.checksum == u16::from(expected) {
            Ok(())
        } else {
            Err(ProtocolError::ChecksumMismatch {
                expected,
                actual: self.checksum,
            })
        }
    }
}

/// Threshold-breach alert sent over the stream channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub agent_id: AgentId,
    pub alert_type: AlertType,
    pub kind: MetricKind,
    pub value: i64,
    pub threshold: i64,
    pub timestamp: u64,
}

impl AlertMessage {
    pub fn threshold_exceeded(
        agent_id: AgentId,
        kind: MetricKind,
        value: i64,
        threshold: i64,
        timestamp: u64,
    ) -> Self {
        Self {
            agent_id,
            alert_type: AlertType::ThresholdExceeded,
            kind,
            value,
            threshold,
            timestamp,
        }
    }

    pub fn to_record(&self) -> AlertRecord {
        AlertRecord {
            agent_id: self.agent_id,
            alert_type: self.alert_type,
            metric_kind: self.kind,
            value: self.value,
            threshold: self.threshold,
            timestamp: self.timestamp,
        }
    }
}
