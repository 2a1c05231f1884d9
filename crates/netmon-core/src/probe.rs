//! Measurement probes
//!
//! Reporters ask a [`Measurement`] for one reading per cycle. `Ok(Unavailable)`
//! skips the cycle; `Err` is fatal for the asking task only.

use crate::error::ProbeError;
use crate::models::{MetricKind, Sample};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::debug;

/// Value reported by [`FixedProbe::default`]
pub const SIMULATED_READING: i64 = 100;

#[async_trait]
pub trait Measurement: Send + Sync {
    async fn sample(&self, kind: MetricKind) -> Result<Sample, ProbeError>;
}

/// Always reports the same reading
#[derive(Debug, Clone, Copy)]
pub struct FixedProbe {
    value: i64,
}

impl FixedProbe {
    pub fn new(value: i64) -> Self {
        Self { value }
    }
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self::new(SIMULATED_READING)
    }
}

#[async_trait]
impl Measurement for FixedProbe {
    async fn sample(&self, _kind: MetricKind) -> Result<Sample, ProbeError> {
        Ok(Sample::from_raw(self.value))
    }
}

/// CPU usage as the 1-minute load average, scaled by 100
#[derive(Debug, Clone)]
pub struct LoadAverageProbe {
    path: PathBuf,
}

impl Default for LoadAverageProbe {
    fn default() -> Self {
        Self::new("/proc/loadavg")
    }
}

impl LoadAverageProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(content: &str) -> Option<i64> {
        let load: f64 = content.split_whitespace().next()?.parse().ok()?;
        if !load.is_finite() || load < 0.0 {
            return None;
        }
        Some((load * 100.0).round() as i64)
    }
}

#[async_trait]
impl Measurement for LoadAverageProbe {
    async fn sample(&self, kind: MetricKind) -> Result<Sample, ProbeError> {
        if kind != MetricKind::CpuUsage {
            return Err(ProbeError::Unsupported(kind));
        }

        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Self::parse(&content).map_or(Sample::Unavailable, Sample::Value)),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Load average unreadable");
                Ok(Sample::Unavailable)
            }
        }
    }
}

/// Latency as the time to open a TCP connection, in milliseconds
#[derive(Debug, Clone)]
pub struct ConnectLatencyProbe {
    target: SocketAddr,
    timeout: Duration,
}

impl ConnectLatencyProbe {
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }
}

#[async_trait]
impl Measurement for ConnectLatencyProbe {
    async fn sample(&self, kind: MetricKind) -> Result<Sample, ProbeError> {
        if kind != MetricKind::Latency {
            return Err(ProbeError::Unsupported(kind));
        }

        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(self.target)).await {
            Ok(Ok(_stream)) => {
                let millis = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                Ok(Sample::Value(millis))
            }
            Ok(Err(e)) => {
                debug!(target = %self.target, error = %e, "Latency probe connect failed");
                Ok(Sample::Unavailable)
            }
            Err(_) => Ok(Sample::Unavailable),
        }
    }
}

/// Dispatches each metric kind to its own probe
#[derive(Clone, Default)]
pub struct ProbeSet {
    probes: HashMap<MetricKind, Arc<dyn Measurement>>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: MetricKind, probe: Arc<dyn Measurement>) -> Self {
        self.probes.insert(kind, probe);
        self
    }

    pub fn supports(&self, kind: MetricKind) -> bool {
        self.probes.contains_key(&kind)
    }
}

#[async_trait]
impl Measurement for ProbeSet {
    async fn sample(&self, kind: MetricKind) -> Result<Sample, ProbeError> {
        match self.probes.get(&kind) {
            Some(probe) => probe.sample(kind).await,
            None => Ok(Sample::Unavailable),
        }
    }
}
