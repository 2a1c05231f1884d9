//! Core data models shared by agents and the collector

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Agent identity, assigned out of band through configuration
pub type AgentId = u16;

/// Magnitude reported by a probe when no valid measurement exists
pub const UNAVAILABLE_SENTINEL: i64 = -1;

/// Kind of metric a task measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Latency = 1,
    CpuUsage = 2,
    Bandwidth = 3,
}

impl MetricKind {
    /// Wire code of this kind
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MetricKind::Latency),
            2 => Some(MetricKind::CpuUsage),
            3 => Some(MetricKind::Bandwidth),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Latency => "latency",
            MetricKind::CpuUsage => "cpu_usage",
            MetricKind::Bandwidth => "bandwidth",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert classification carried in an ALERT message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ThresholdExceeded = 1,
}

impl AlertType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(AlertType::ThresholdExceeded),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::ThresholdExceeded => write!(f, "threshold_exceeded"),
        }
    }
}

/// A monitored task owned by one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub task_id: u32,
    pub kind: MetricKind,
    /// Sampling period; grows when the collector signals overload
    pub period: Duration,
    pub threshold: i64,
}

impl Task {
    pub fn new(task_id: u32, kind: MetricKind, period: Duration, threshold: i64) -> Self {
        Self {
            task_id,
            kind,
            period,
            threshold,
        }
    }

    /// Whether a sample magnitude breaches this task's threshold
    pub fn breached_by(&self, value: i64) -> bool {
        value > self.threshold
    }
}

/// Outcome of a single measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Value(i64),
    Unavailable,
}

impl Sample {
    /// Interpret a raw probe reading, mapping the sentinel to `Unavailable`
    pub fn from_raw(value: i64) -> Self {
        if value == UNAVAILABLE_SENTINEL {
            Sample::Unavailable
        } else {
            Sample::Value(value)
        }
    }

    pub fn value(&self) -> Option<i64> {
        match self {
            Sample::Value(v) => Some(*v),
            Sample::Unavailable => None,
        }
    }
}

/// A measurement captured by a reporter, before it is put on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub task_id: u32,
    pub kind: MetricKind,
    pub value: i64,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

impl MetricSample {
    /// Stamp a reading for `task` with the current time
    pub fn capture(task: &Task, value: i64) -> Self {
        Self {
            task_id: task.task_id,
            kind: task.kind,
            value,
            timestamp: unix_timestamp(),
        }
    }
}

/// Decoded sample handed to the collector's sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub agent_id: AgentId,
    pub task_id: u32,
    pub metric_kind: MetricKind,
    pub value: i64,
    pub timestamp: u64,
}

/// Threshold breach notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub agent_id: AgentId,
    pub alert_type: AlertType,
    pub metric_kind: MetricKind,
    pub value: i64,
    pub threshold: i64,
    pub timestamp: u64,
}

/// Per-stream sequence counter.
///
/// Starts at 1 after registration; 0 is reserved for REGISTER, so the
/// counter wraps from 65535 back to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter(u16);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(1)
    }

    pub fn current(&self) -> u16 {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 = match self.0.wrapping_add(1) {
            0 => 1,
            next => next,
        };
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch
pub fn unix_timestamp() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}
