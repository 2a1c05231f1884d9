//! Observability infrastructure for agents and the collector
//!
//! Provides:
//! - Prometheus counters for the datagram path, alert channel and reporters
//! - Structured JSON logging of protocol events with tracing

use crate::models::{AgentId, MetricKind};
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<NetmonMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct NetmonMetricsInner {
    datagrams_received: IntCounterVec,
    datagrams_dropped: IntCounterVec,
    checksum_mismatches: IntCounter,
    duplicates_dropped: IntCounter,
    samples_forwarded: IntCounter,
    acks_sent: IntCounter,
    overload_flags: IntCounter,
    alerts_received: IntCounter,
    alerts_discarded: IntCounter,
    sink_failures: IntCounter,
    samples_sent: IntCounterVec,
    samples_skipped: IntCounterVec,
    ack_timeouts: IntCounter,
    flow_backoffs: IntCounter,
    alerts_sent: IntCounter,
    alert_failures: IntCounter,
    reregistrations: IntCounter,
}

impl NetmonMetricsInner {
    fn new() -> Self {
        Self {
            datagrams_received: register_int_counter_vec!(
                "netmon_collector_datagrams_received_total",
                "Datagrams received by the collector, by message type",
                &["type"]
            )
            .expect("Failed to register datagrams_received"),

            datagrams_dropped: register_int_counter_vec!(
                "netmon_collector_datagrams_dropped_total",
                "Datagrams dropped by the collector, by reason",
                &["reason"]
            )
            .expect("Failed to register datagrams_dropped"),

            checksum_mismatches: register_int_counter!(
                "netmon_collector_checksum_mismatches_total",
                "Datagrams processed despite a checksum mismatch"
            )
            .expect("Failed to register checksum_mismatches"),

            duplicates_dropped: register_int_counter!(
                "netmon_collector_duplicates_dropped_total",
                "METRIC datagrams suppressed by the dedup window"
            )
            .expect("Failed to register duplicates_dropped"),

            samples_forwarded: register_int_counter!(
                "netmon_collector_samples_forwarded_total",
                "Samples forwarded to the sink"
            )
            .expect("Failed to register samples_forwarded"),

            acks_sent: register_int_counter!(
                "netmon_collector_acks_sent_total",
                "Acknowledgements sent"
            )
            .expect("Failed to register acks_sent"),

            overload_flags: register_int_counter!(
                "netmon_collector_overload_flags_total",
                "Acknowledgements sent with the flow-control flag set"
            )
            .expect("Failed to register overload_flags"),

            alerts_received: register_int_counter!(
                "netmon_collector_alerts_received_total",
                "Alerts decoded on the stream channel"
            )
            .expect("Failed to register alerts_received"),

            alerts_discarded: register_int_counter!(
                "netmon_collector_alerts_discarded_total",
                "Alert connections discarded for size or decode errors"
            )
            .expect("Failed to register alerts_discarded"),

            sink_failures: register_int_counter!(
                "netmon_collector_sink_failures_total",
                "Records the sink failed to accept"
            )
            .expect("Failed to register sink_failures"),

            samples_sent: register_int_counter_vec!(
                "netmon_agent_samples_sent_total",
                "METRIC datagrams sent by reporters, by metric kind",
                &["kind"]
            )
            .expect("Failed to register samples_sent"),

            samples_skipped: register_int_counter_vec!(
                "netmon_agent_samples_skipped_total",
                "Reporting cycles skipped because no measurement was available",
                &["kind"]
            )
            .expect("Failed to register samples_skipped"),

            ack_timeouts: register_int_counter!(
                "netmon_agent_ack_timeouts_total",
                "METRIC datagrams that were never acknowledged"
            )
            .expect("Failed to register ack_timeouts"),

            flow_backoffs: register_int_counter!(
                "netmon_agent_flow_backoffs_total",
                "Sampling period increases applied after overload signals"
            )
            .expect("Failed to register flow_backoffs"),

            alerts_sent: register_int_counter!(
                "netmon_agent_alerts_sent_total",
                "Alerts delivered to the collector"
            )
            .expect("Failed to register alerts_sent"),

            alert_failures: register_int_counter!(
                "netmon_agent_alert_failures_total",
                "Alerts that could not be delivered"
            )
            .expect("Failed to register alert_failures"),

            reregistrations: register_int_counter!(
                "netmon_agent_reregistrations_total",
                "Re-registrations triggered by consecutive ACK timeouts"
            )
            .expect("Failed to register reregistrations"),
        }
    }
}

/// Handle to the process-wide Prometheus metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct NetmonMetrics {
    _private: (),
}

impl Default for NetmonMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NetmonMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(NetmonMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &NetmonMetricsInner {
        GLOBAL_METRICS.get_or_init(NetmonMetricsInner::new)
    }

    pub fn inc_datagram(&self, message_type: &str) {
        self.inner()
            .datagrams_received
            .with_label_values(&[message_type])
            .inc();
    }

    pub fn inc_dropped(&self, reason: &str) {
        self.inner()
            .datagrams_dropped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_checksum_mismatch(&self) {
        self.inner().checksum_mismatches.inc();
    }

    pub fn inc_duplicate(&self) {
        self.inner().duplicates_dropped.inc();
    }

    pub fn inc_forwarded(&self) {
        self.inner().samples_forwarded.inc();
    }

    pub fn inc_ack_sent(&self, overloaded: bool) {
        self.inner().acks_sent.inc();
        if overloaded {
            self.inner().overload_flags.inc();
        }
    }

    pub fn inc_alert_received(&self) {
        self.inner().alerts_received.inc();
    }

    pub fn inc_alert_discarded(&self) {
        self.inner().alerts_discarded.inc();
    }

    pub fn inc_sink_failure(&self) {
        self.inner().sink_failures.inc();
    }

    pub fn inc_sample_sent(&self, kind: MetricKind) {
        self.inner()
            .samples_sent
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn inc_sample_skipped(&self, kind: MetricKind) {
        self.inner()
            .samples_skipped
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn inc_ack_timeout(&self) {
        self.inner().ack_timeouts.inc();
    }

    pub fn inc_flow_backoff(&self) {
        self.inner().flow_backoffs.inc();
    }

    pub fn inc_alert_sent(&self) {
        self.inner().alerts_sent.inc();
    }

    pub fn inc_alert_failure(&self) {
        self.inner().alert_failures.inc();
    }

    pub fn inc_reregistration(&self) {
        self.inner().reregistrations.inc();
    }
}

/// Structured logger for protocol events
///
/// Provides consistent JSON-formatted logging for registrations,
/// acknowledgements, flow control and alerts.
#[derive(Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    /// Log process startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "started",
            component = %self.component,
            version = %version,
            "netmon component started"
        );
    }

    /// Log process shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "shutdown",
            component = %self.component,
            reason = %reason,
            "netmon component shutting down"
        );
    }

    /// Log a completed registration handshake
    pub fn log_registered(&self, agent_id: AgentId, attempts: u32) {
        info!(
            event = "agent_registered",
            component = %self.component,
            agent_id = agent_id,
            attempts = attempts,
            "Agent registered with collector"
        );
    }

    /// Log an acknowledged sample
    pub fn log_acknowledged(&self, agent_id: AgentId, task_id: u32, seq: u16, kind: MetricKind) {
        info!(
            event = "sample_acknowledged",
            component = %self.component,
            agent_id = agent_id,
            task_id = task_id,
            seq = seq,
            metric_kind = %kind,
            "Metric sent and acknowledged"
        );
    }

    /// Log a sampling-period increase after an overload signal
    pub fn log_flow_control(&self, agent_id: AgentId, task_id: u32, new_period: Duration) {
        warn!(
            event = "flow_control_applied",
            component = %self.component,
            agent_id = agent_id,
            task_id = task_id,
            period_secs = new_period.as_secs(),
            "Collector overloaded, slowing down reporting"
        );
    }

    /// Log an alert handed to the alert channel
    pub fn log_alert_sent(&self, agent_id: AgentId, kind: MetricKind, value: i64, threshold: i64) {
        warn!(
            event = "alert_sent",
            component = %self.component,
            agent_id = agent_id,
            metric_kind = %kind,
            value = value,
            threshold = threshold,
            "Threshold exceeded, alert sent"
        );
    }

    /// Log an alert decoded by the collector
    pub fn log_alert_received(&self, agent_id: AgentId, kind: MetricKind, value: i64, threshold: i64) {
        warn!(
            event = "alert_received",
            component = %self.component,
            agent_id = agent_id,
            metric_kind = %kind,
            value = value,
            threshold = threshold,
            "Alert received from agent"
        );
    }
}
