//! Fixed-layout encoding and decoding of wire messages

use super::error::{ProtocolError, Result};
use super::{
    Ack, AlertMessage, Datagram, Frame, MessageType, MetricReport, Register, ACK_LEN,
    ACK_WITH_FLOW_LEN, ALERT_LEN, METRIC_LEN, REGISTER_LEN,
};
use crate::models::{AlertType, MetricKind};

/// Sum of the given fields truncated to 8 bits.
///
/// Both ends must compute exactly this; it only guards against corruption
/// of the header fields (and the METRIC value), nothing more.
pub fn checksum(fields: &[u32]) -> u8 {
    fields.iter().fold(0u32, |acc, f| acc.wrapping_add(*f)) as u8
}

fn narrow_i32(field: &'static str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| ProtocolError::FieldOverflow { field, value })
}

fn put_header(buf: &mut Vec<u8>, msg_type: MessageType, seq: u16, agent_id: u16, sum: u8) {
    buf.push(msg_type.code());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&agent_id.to_be_bytes());
    buf.extend_from_slice(&u16::from(sum).to_be_bytes());
}

impl Register {
    pub fn encode(&self) -> Vec<u8> {
        let sum = Datagram::Register(*self).expected_checksum();
        let mut buf = Vec::with_capacity(REGISTER_LEN);
        put_header(&mut buf, MessageType::Register, self.seq, self.agent_id, sum);
        buf
    }
}

impl MetricReport {
    /// Encode to the 26-byte layout; fails if the value exceeds 32 bits
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = narrow_i32("value", self.value)?;
        let sum = checksum(&[
            u32::from(MessageType::Metric.code()),
            u32::from(self.seq),
            u32::from(self.agent_id),
            value as u32,
        ]);

        let mut buf = Vec::with_capacity(METRIC_LEN);
        put_header(&mut buf, MessageType::Metric, self.seq, self.agent_id, sum);
        buf.extend_from_slice(&self.task_id.to_be_bytes());
        buf.push(self.kind.code());
        buf.extend_from_slice(&value.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        // reserved
        buf.extend_from_slice(&0u16.to_be_bytes());
        Ok(buf)
    }
}

impl Ack {
    pub fn encode(&self) -> Vec<u8> {
        let sum = Datagram::Ack(*self).expected_checksum();
        let mut buf = Vec::with_capacity(ACK_WITH_FLOW_LEN);
        put_header(&mut buf, MessageType::Ack, self.seq, self.agent_id, sum);
        if let Some(flow) = self.flow {
            buf.push(u8::from(flow));
        }
        buf
    }
}

impl Datagram {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Datagram::Register(r) => Ok(r.encode()),
            Datagram::Metric(m) => m.encode(),
            Datagram::Ack(a) => Ok(a.encode()),
        }
    }
}

impl AlertMessage {
    /// Encode to the 20-byte layout; fails if value or threshold exceed 32 bits
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = narrow_i32("value", self.value)?;
        let threshold = narrow_i32("threshold", self.threshold)?;

        let mut buf = Vec::with_capacity(ALERT_LEN);
        buf.extend_from_slice(&self.agent_id.to_be_bytes());
        buf.push(self.alert_type.code());
        buf.push(self.kind.code());
        buf.extend_from_slice(&value.to_be_bytes());
        buf.extend_from_slice(&threshold.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        Ok(buf)
    }
}

/// Cursor over a buffer whose length has already been validated
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    message: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], message: &'static str) -> Self {
        Self {
            buf,
            pos: 0,
            message,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self
            .buf
            .get(self.pos..self.pos + N)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(ProtocolError::MalformedPacket {
                message: self.message,
                expected: self.pos + N,
                actual: self.buf.len(),
            })?;
        self.pos += N;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take()?))
    }
}

fn expect_len(message: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ProtocolError::MalformedPacket {
            message,
            expected,
            actual,
        })
    }
}

fn metric_kind(code: u8) -> Result<MetricKind> {
    MetricKind::from_code(code).ok_or(ProtocolError::InvalidField {
        field: "metric_kind",
        value: code,
    })
}

/// Decode one datagram.
///
/// The type byte at offset 0 selects the layout and the buffer length must
/// match it exactly. The checksum is returned, not enforced; see
/// [`Frame::verify_checksum`].
pub fn decode_datagram(buf: &[u8]) -> Result<Frame> {
    let code = *buf.first().ok_or(ProtocolError::MalformedPacket {
        message: "datagram",
        expected: REGISTER_LEN,
        actual: 0,
    })?;
    let msg_type = MessageType::from_code(code).ok_or(ProtocolError::UnknownMessageType(code))?;

    match msg_type {
        MessageType::Register => expect_len(msg_type.name(), REGISTER_LEN, buf.len())?,
        MessageType::Metric => expect_len(msg_type.name(), METRIC_LEN, buf.len())?,
        MessageType::Ack => {
            if buf.len() != ACK_LEN {
                expect_len(msg_type.name(), ACK_WITH_FLOW_LEN, buf.len())?;
            }
        }
    }

    let mut r = Reader::new(buf, msg_type.name());
    r.u8()?;
    let seq = r.u16()?;
    let agent_id = r.u16()?;
    let checksum = r.u16()?;

    let datagram = match msg_type {
        MessageType::Register => Datagram::Register(Register { seq, agent_id }),
        MessageType::Metric => {
            let task_id = r.u32()?;
            let kind = metric_kind(r.u8()?)?;
            let value = i64::from(r.i32()?);
            let timestamp = r.u64()?;
            let _reserved = r.u16()?;
            Datagram::Metric(MetricReport {
                seq,
                agent_id,
                task_id,
                kind,
                value,
                timestamp,
            })
        }
        MessageType::Ack => {
            let flow = if buf.len() == ACK_WITH_FLOW_LEN {
                Some(r.u8()? != 0)
            } else {
                None
            };
            Datagram::Ack(Ack {
                seq,
                agent_id,
                flow,
            })
        }
    };

    Ok(Frame { datagram, checksum })
}

/// Decode one ALERT message; the buffer must be exactly 20 bytes
pub fn decode_alert(buf: &[u8]) -> Result<AlertMessage> {
    expect_len("ALERT", ALERT_LEN, buf.len())?;

    let mut r = Reader::new(buf, "ALERT");
    let agent_id = r.u16()?;
    let type_code = r.u8()?;
    let alert_type = AlertType::from_code(type_code).ok_or(ProtocolError::InvalidField {
        field: "alert_type",
        value: type_code,
    })?;
    let kind = metric_kind(r.u8()?)?;
    let value = i64::from(r.i32()?);
    let threshold = i64::from(r.i32()?);
    let timestamp = r.u64()?;

    Ok(AlertMessage {
        agent_id,
        alert_type,
        kind,
        value,
        threshold,
        timestamp,
    })
}
