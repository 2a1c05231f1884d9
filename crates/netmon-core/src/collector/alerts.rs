//! Stream acceptor for threshold alerts
//!
//! Each connection carries exactly one 20-byte ALERT and is then closed by
//! the agent. Nothing is ever written back. Connections are handled on
//! their own tasks since they share no state.

use crate::observability::{NetmonMetrics, StructuredLogger};
use crate::protocol::{decode_alert, ALERT_LEN};
use crate::sink::RecordSink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Read until a full alert is buffered or the peer closes
pub async fn read_alert<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut buf = [0u8; ALERT_LEN];
    let mut filled = 0;
    while filled < ALERT_LEN {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(buf[..filled].to_vec())
}

/// What became of one alert connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertOutcome {
    /// Peer closed without sending anything, e.g. a reachability check
    Empty,
    Discarded,
    Accepted,
}

#[derive(Clone)]
struct AlertHandler {
    sink: Arc<dyn RecordSink>,
    read_timeout: Duration,
    sink_timeout: Duration,
    metrics: NetmonMetrics,
    logger: StructuredLogger,
}

impl AlertHandler {
    async fn handle<R>(&self, mut stream: R, peer: SocketAddr) -> AlertOutcome
    where
        R: AsyncRead + Unpin,
    {
        let bytes = match tokio::time::timeout(self.read_timeout, read_alert(&mut stream)).await {
            Ok(Ok(bytes)) if bytes.is_empty() => {
                debug!(peer = %peer, "Alert connection closed without data");
                return AlertOutcome::Empty;
            }
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!(peer = %peer, error = %e, "Failed to read alert");
                self.metrics.inc_alert_discarded();
                return AlertOutcome::Discarded;
            }
            Err(_) => {
                warn!(peer = %peer, "Timed out waiting for alert");
                self.metrics.inc_alert_discarded();
                return AlertOutcome::Discarded;
            }
        };

        let alert = match decode_alert(&bytes) {
            Ok(alert) => alert,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Discarding alert");
                self.metrics.inc_alert_discarded();
                return AlertOutcome::Discarded;
            }
        };

        self.metrics.inc_alert_received();
        self.logger
            .log_alert_received(alert.agent_id, alert.kind, alert.value, alert.threshold);

        let record = alert.to_record();
        match tokio::time::timeout(self.sink_timeout, self.sink.record_alert(&record)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(agent_id = record.agent_id, error = %e, "Sink failed to record alert");
                self.metrics.inc_sink_failure();
            }
            Err(_) => {
                warn!(agent_id = record.agent_id, "Sink timed out recording alert");
                self.metrics.inc_sink_failure();
            }
        }
        AlertOutcome::Accepted
    }
}

pub struct AlertAcceptor {
    listener: TcpListener,
    handler: AlertHandler,
}

impl AlertAcceptor {
    pub fn new(
        listener: TcpListener,
        sink: Arc<dyn RecordSink>,
        read_timeout: Duration,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            handler: AlertHandler {
                sink,
                read_timeout,
                sink_timeout,
                metrics: NetmonMetrics::new(),
                logger: StructuredLogger::new("collector"),
            },
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?self.listener.local_addr().ok(), "Starting alert acceptor");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Alert connection accepted");
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            handler.handle(stream, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept alert connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Shutting down alert acceptor");
                    break;
                }
            }
        }
    }
}
