//! Collector: datagram ingestion and alert acceptance
//!
//! The collector owns two independent execution units:
//! - the ingestion loop, which answers REGISTER/METRIC datagrams and keeps
//!   per-agent dedup and congestion state
//! - the alert acceptor, which receives one ALERT per stream connection

mod alerts;
mod congestion;
mod dedup;
mod ingest;

#[cfg(test)]
mod tests;

pub use alerts::{read_alert, AlertAcceptor};
pub use congestion::{CongestionEstimator, CongestionPolicy, DEFAULT_OVERLOAD_CEILING};
pub use dedup::{DedupWindow, DEFAULT_DEDUP_WINDOW};
pub use ingest::{Admission, IngestLoop, IngestState};

use crate::health::{components, HealthRegistry};
use crate::sink::RecordSink;
use anyhow::{Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Configuration for the collector's two listeners
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub bind_ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
    /// Sequence numbers remembered per agent (default: 100)
    pub dedup_window: usize,
    /// Accepted samples above which ACKs carry the flow flag (default: 5)
    pub overload_ceiling: u32,
    pub congestion_policy: CongestionPolicy,
    /// How long an alert connection may take to deliver its 20 bytes
    pub alert_read_timeout: Duration,
    /// Upper bound on a single sink call
    pub sink_timeout: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            udp_port: 5005,
            tcp_port: 5006,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            overload_ceiling: DEFAULT_OVERLOAD_CEILING,
            congestion_policy: CongestionPolicy::Sticky,
            alert_read_timeout: Duration::from_secs(5),
            sink_timeout: Duration::from_secs(2),
        }
    }
}

/// A collector with both sockets bound, ready to spawn
pub struct Collector {
    ingest: IngestLoop,
    alerts: AlertAcceptor,
}

/// Join handles of a running collector
pub struct CollectorTasks {
    pub ingest: JoinHandle<()>,
    pub alerts: JoinHandle<()>,
}

impl CollectorTasks {
    /// Wait for both units to stop
    pub async fn join(self) {
        let _ = tokio::join!(self.ingest, self.alerts);
    }
}

impl Collector {
    /// Bind the datagram socket and the alert listener
    pub async fn bind(
        settings: CollectorSettings,
        sink: Arc<dyn RecordSink>,
        health: HealthRegistry,
    ) -> Result<Self> {
        let udp_addr = SocketAddr::new(settings.bind_ip, settings.udp_port);
        let socket = UdpSocket::bind(udp_addr)
            .await
            .with_context(|| format!("Failed to bind UDP socket on {}", udp_addr))?;

        let tcp_addr = SocketAddr::new(settings.bind_ip, settings.tcp_port);
        let listener = TcpListener::bind(tcp_addr)
            .await
            .with_context(|| format!("Failed to bind alert listener on {}", tcp_addr))?;

        health.register(components::INGEST).await;
        health.register(components::ALERT_ACCEPTOR).await;
        health.register(components::SINK).await;
        health.set_ready(true).await;

        let alerts = AlertAcceptor::new(
            listener,
            sink.clone(),
            settings.alert_read_timeout,
            settings.sink_timeout,
        );
        let ingest = IngestLoop::new(socket, &settings, sink, health);

        Ok(Self { ingest, alerts })
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.ingest.local_addr()
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.alerts.local_addr()
    }

    /// Start both units; they stop when `shutdown` fires
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> CollectorTasks {
        CollectorTasks {
            ingest: tokio::spawn(self.ingest.run(shutdown.subscribe())),
            alerts: tokio::spawn(self.alerts.run(shutdown.subscribe())),
        }
    }
}
