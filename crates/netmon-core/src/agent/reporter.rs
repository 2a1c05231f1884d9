//! Per-task reporting loop
//!
//! Each cycle takes one measurement, sends it as a METRIC datagram, waits a
//! bounded time for the matching ACK and then sleeps for the task's current
//! period. Delivery is at-most-once: an unacknowledged sample is never
//! retransmitted.

use super::alert::AlertSender;
use super::link::DatagramLink;
use crate::config::AgentTuning;
use crate::error::ProbeError;
use crate::models::{unix_timestamp, AgentId, MetricSample, Sample, SequenceCounter, Task};
use crate::observability::{NetmonMetrics, StructuredLogger};
use crate::probe::Measurement;
use crate::protocol::{AlertMessage, MetricReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// What a single reporting cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No measurement available; nothing sent, sequence unchanged
    Skipped,
    Acknowledged { overloaded: bool },
    Unacknowledged,
}

pub struct Reporter {
    agent_id: AgentId,
    task: Task,
    link: DatagramLink,
    probe: Arc<dyn Measurement>,
    alerts: AlertSender,
    tuning: AgentTuning,
    seq: SequenceCounter,
    consecutive_timeouts: u32,
    metrics: NetmonMetrics,
    logger: StructuredLogger,
}

impl Reporter {
    pub fn new(
        task: Task,
        link: DatagramLink,
        probe: Arc<dyn Measurement>,
        alerts: AlertSender,
        tuning: AgentTuning,
    ) -> Self {
        Self {
            agent_id: link.agent_id(),
            task,
            link,
            probe,
            alerts,
            tuning,
            seq: SequenceCounter::new(),
            consecutive_timeouts: 0,
            metrics: NetmonMetrics::new(),
            logger: StructuredLogger::new("agent"),
        }
    }

    /// Current sampling period, including any flow-control increases
    pub fn period(&self) -> Duration {
        self.task.period
    }

    /// Sequence number the next METRIC will carry
    pub fn next_seq(&self) -> u16 {
        self.seq.current()
    }

    /// Report until shutdown or a fatal probe failure
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ProbeError> {
        info!(
            agent_id = self.agent_id,
            task_id = self.task.task_id,
            metric_kind = %self.task.kind,
            period_secs = self.task.period.as_secs(),
            "Starting reporter"
        );

        loop {
            let outcome = tokio::select! {
                outcome = self.cycle() => outcome,
                _ = shutdown.recv() => break,
            };

            if let Err(e) = outcome {
                error!(
                    agent_id = self.agent_id,
                    task_id = self.task.task_id,
                    error = %e,
                    "Measurement failed, stopping reporter"
                );
                return Err(e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.task.period) => {}
                _ = shutdown.recv() => break,
            }
        }

        debug!(agent_id = self.agent_id, task_id = self.task.task_id, "Reporter stopped");
        Ok(())
    }

    /// One measure/send/acknowledge/alert round, without the trailing sleep
    pub async fn cycle(&mut self) -> Result<CycleOutcome, ProbeError> {
        let kind = self.task.kind;
        let sample = match tokio::time::timeout(self.tuning.measurement_timeout, self.probe.sample(kind)).await {
            Ok(sample) => sample?,
            Err(_) => {
                warn!(agent_id = self.agent_id, task_id = self.task.task_id, "Measurement timed out");
                Sample::Unavailable
            }
        };

        let value = match sample {
            Sample::Value(v) => v,
            Sample::Unavailable => {
                debug!(agent_id = self.agent_id, task_id = self.task.task_id, "No measurement this cycle");
                self.metrics.inc_sample_skipped(kind);
                return Ok(CycleOutcome::Skipped);
            }
        };

        let captured = MetricSample::capture(&self.task, value);
        let report = MetricReport::from_sample(self.seq.current(), self.agent_id, &captured);

        let bytes = match report.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(agent_id = self.agent_id, task_id = self.task.task_id, error = %e, "Sample not encodable");
                self.metrics.inc_sample_skipped(kind);
                return Ok(CycleOutcome::Skipped);
            }
        };

        let outcome = self.deliver(&report, &bytes).await;
        self.seq.advance();

        if self.task.breached_by(captured.value) {
            self.raise_alert(&captured).await;
        }

        Ok(outcome)
    }

    async fn deliver(&mut self, report: &MetricReport, bytes: &[u8]) -> CycleOutcome {
        let result = match self.link.send(bytes).await {
            Ok(()) => {
                self.metrics.inc_sample_sent(report.kind);
                self.link.await_ack(report.seq, self.tuning.ack_timeout).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(ack) => {
                self.consecutive_timeouts = 0;
                self.logger
                    .log_acknowledged(self.agent_id, report.task_id, report.seq, report.kind);
                if ack.overloaded() {
                    self.task.period += self.tuning.flow_increment;
                    self.metrics.inc_flow_backoff();
                    self.logger
                        .log_flow_control(self.agent_id, report.task_id, self.task.period);
                }
                CycleOutcome::Acknowledged {
                    overloaded: ack.overloaded(),
                }
            }
            Err(e) => {
                warn!(
                    agent_id = self.agent_id,
                    task_id = report.task_id,
                    seq = report.seq,
                    error = %e,
                    "Sample not acknowledged"
                );
                self.metrics.inc_ack_timeout();
                self.consecutive_timeouts += 1;
                if self.consecutive_timeouts >= self.tuning.max_consecutive_timeouts {
                    self.reregister().await;
                }
                CycleOutcome::Unacknowledged
            }
        }
    }

    /// Repeat the handshake after the collector stopped answering; the
    /// sequence counter keeps running so the dedup window stays valid
    async fn reregister(&mut self) {
        self.consecutive_timeouts = 0;
        self.metrics.inc_reregistration();
        info!(
            agent_id = self.agent_id,
            task_id = self.task.task_id,
            "Collector unresponsive, registering again"
        );

        match self
            .link
            .register(self.tuning.registration_timeout, self.tuning.registration_attempts)
            .await
        {
            Ok(attempts) => self.logger.log_registered(self.agent_id, attempts),
            Err(e) => warn!(
                agent_id = self.agent_id,
                task_id = self.task.task_id,
                error = %e,
                "Re-registration failed, continuing to report"
            ),
        }
    }

    async fn raise_alert(&self, sample: &MetricSample) {
        let alert = AlertMessage::threshold_exceeded(
            self.agent_id,
            sample.kind,
            sample.value,
            self.task.threshold,
            unix_timestamp(),
        );

        match self.alerts.send(&alert).await {
            Ok(()) => {
                self.metrics.inc_alert_sent();
                self.logger
                    .log_alert_sent(self.agent_id, sample.kind, sample.value, self.task.threshold);
            }
            Err(e) => {
                self.metrics.inc_alert_failure();
                warn!(agent_id = self.agent_id, error = %e, "Failed to deliver alert");
            }
        }
    }
}
