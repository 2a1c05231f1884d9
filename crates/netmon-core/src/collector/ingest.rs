//! Datagram ingestion loop
//!
//! A single task owns the UDP socket and all per-agent dedup/congestion
//! state, so none of it needs locking. Every decode or processing failure
//! is handled in place by dropping the datagram; nothing here ends the loop
//! except the shutdown signal.

use super::congestion::{CongestionEstimator, CongestionPolicy};
use super::dedup::DedupWindow;
use super::CollectorSettings;
use crate::health::{components, HealthRegistry};
use crate::models::{AgentId, SampleRecord};
use crate::observability::NetmonMetrics;
use crate::protocol::{decode_datagram, Ack, Datagram, MetricReport, ProtocolError, MAX_DATAGRAM_LEN};
use crate::sink::RecordSink;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of offering a METRIC sequence number to an agent's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Already in the dedup window; drop without acknowledging
    Duplicate,
    Accepted { overloaded: bool },
}

#[derive(Debug)]
struct AgentLedger {
    dedup: DedupWindow,
    congestion: CongestionEstimator,
}

/// Per-agent dedup and congestion state, created lazily on first contact
#[derive(Debug)]
pub struct IngestState {
    agents: HashMap<AgentId, AgentLedger>,
    dedup_window: usize,
    overload_ceiling: u32,
    policy: CongestionPolicy,
}

impl IngestState {
    pub fn new(dedup_window: usize, overload_ceiling: u32, policy: CongestionPolicy) -> Self {
        Self {
            agents: HashMap::new(),
            dedup_window,
            overload_ceiling,
            policy,
        }
    }

    /// Record `seq` from `agent_id` and update its congestion count
    pub fn admit(&mut self, agent_id: AgentId, seq: u16, now: Instant) -> Admission {
        let (window, ceiling, policy) = (self.dedup_window, self.overload_ceiling, self.policy);
        let ledger = self.agents.entry(agent_id).or_insert_with(|| AgentLedger {
            dedup: DedupWindow::new(window),
            congestion: CongestionEstimator::new(ceiling, policy, now),
        });

        if !ledger.dedup.insert(seq) {
            return Admission::Duplicate;
        }
        Admission::Accepted {
            overloaded: ledger.congestion.record_accept(now),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Number of sequence numbers currently remembered for an agent
    pub fn window_len(&self, agent_id: AgentId) -> usize {
        self.agents.get(&agent_id).map_or(0, |l| l.dedup.len())
    }
}

fn drop_reason(err: &ProtocolError) -> &'static str {
    match err {
        ProtocolError::MalformedPacket { .. } => "malformed",
        ProtocolError::UnknownMessageType(_) => "unknown_type",
        ProtocolError::InvalidField { .. } => "invalid_field",
        ProtocolError::ChecksumMismatch { .. } | ProtocolError::FieldOverflow { .. } => "other",
    }
}

pub struct IngestLoop {
    socket: UdpSocket,
    state: IngestState,
    sink: Arc<dyn RecordSink>,
    sink_timeout: Duration,
    sink_degraded: bool,
    metrics: NetmonMetrics,
    health: HealthRegistry,
}

impl IngestLoop {
    pub fn new(
        socket: UdpSocket,
        settings: &CollectorSettings,
        sink: Arc<dyn RecordSink>,
        health: HealthRegistry,
    ) -> Self {
        Self {
            socket,
            state: IngestState::new(
                settings.dedup_window,
                settings.overload_ceiling,
                settings.congestion_policy,
            ),
            sink,
            sink_timeout: settings.sink_timeout,
            sink_degraded: false,
            metrics: NetmonMetrics::new(),
            health,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn state(&self) -> &IngestState {
        &self.state
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(addr = ?self.socket.local_addr().ok(), "Starting datagram ingestion loop");

        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(r) => r,
                        Err(e) => {
                            // ICMP errors from a vanished agent surface here
                            debug!(error = %e, "Datagram receive failed");
                            continue;
                        }
                    };

                    if let Some(reply) = self.process(&buf[..len], peer).await {
                        if let Err(e) = self.socket.send_to(&reply, peer).await {
                            warn!(peer = %peer, error = %e, "Failed to send acknowledgement");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down datagram ingestion loop");
                    break;
                }
            }
        }
    }

    /// Handle one datagram and return the acknowledgement to send, if any
    pub async fn process(&mut self, datagram: &[u8], peer: SocketAddr) -> Option<Vec<u8>> {
        let frame = match decode_datagram(datagram) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = %peer, len = datagram.len(), error = %e, "Dropping datagram");
                self.metrics.inc_dropped(drop_reason(&e));
                return None;
            }
        };

        self.metrics.inc_datagram(frame.datagram.message_type().name());

        if let Err(e) = frame.verify_checksum() {
            warn!(
                peer = %peer,
                agent_id = frame.datagram.agent_id(),
                seq = frame.datagram.seq(),
                error = %e,
                "Checksum mismatch, processing anyway"
            );
            self.metrics.inc_checksum_mismatch();
        }

        match frame.datagram {
            Datagram::Register(register) => {
                info!(
                    event = "registration_received",
                    agent_id = register.agent_id,
                    peer = %peer,
                    "Registration received"
                );
                self.metrics.inc_ack_sent(false);
                Some(Ack::plain(register.seq, register.agent_id).encode())
            }
            Datagram::Metric(report) => self.accept_metric(report, peer).await,
            Datagram::Ack(ack) => {
                debug!(peer = %peer, agent_id = ack.agent_id, "Dropping ACK addressed to collector");
                self.metrics.inc_dropped("unexpected_ack");
                None
            }
        }
    }

    async fn accept_metric(&mut self, report: MetricReport, peer: SocketAddr) -> Option<Vec<u8>> {
        let overloaded = match self.state.admit(report.agent_id, report.seq, Instant::now()) {
            Admission::Duplicate => {
                debug!(
                    agent_id = report.agent_id,
                    seq = report.seq,
                    peer = %peer,
                    "Duplicate metric suppressed"
                );
                self.metrics.inc_duplicate();
                return None;
            }
            Admission::Accepted { overloaded } => overloaded,
        };

        self.forward(&report.to_record()).await;

        if overloaded {
            debug!(agent_id = report.agent_id, seq = report.seq, "Agent overloaded, flagging ACK");
        }
        self.metrics.inc_ack_sent(overloaded);
        Some(Ack::with_flow(report.seq, report.agent_id, overloaded).encode())
    }

    async fn forward(&mut self, record: &SampleRecord) {
        let outcome = tokio::time::timeout(self.sink_timeout, self.sink.record_sample(record)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("sink timed out after {:?}", self.sink_timeout)),
        };

        match failure {
            None => {
                self.metrics.inc_forwarded();
                if self.sink_degraded {
                    self.sink_degraded = false;
                    self.health.set_healthy(components::SINK).await;
                }
            }
            Some(reason) => {
                warn!(
                    agent_id = record.agent_id,
                    task_id = record.task_id,
                    error = %reason,
                    "Sink failed to record sample"
                );
                self.metrics.inc_sink_failure();
                if !self.sink_degraded {
                    self.sink_degraded = true;
                    self.health.set_degraded(components::SINK, reason).await;
                }
            }
        }
    }
}
