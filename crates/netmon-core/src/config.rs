//! Fabric configuration
//!
//! One file describes the whole deployment: the collector address, both
//! ports and every agent with its tasks. Agents pick their own entry by id.

use crate::collector::{CollectorSettings, CongestionPolicy, DEFAULT_DEDUP_WINDOW, DEFAULT_OVERLOAD_CEILING};
use crate::models::{AgentId, MetricKind, Task};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides (e.g. `NETMON__UDP_PORT`)
pub const ENV_PREFIX: &str = "NETMON";

fn default_server_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_udp_port() -> u16 {
    5005
}

fn default_tcp_port() -> u16 {
    5006
}

fn default_api_port() -> u16 {
    8080
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Task identifier as written in the file: `12` or `"task-12"`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TaskIdField {
    Number(u32),
    Label(String),
}

impl TaskIdField {
    /// Wire task id; labels contribute their numeric suffix
    pub fn resolve(&self) -> Result<u32> {
        match self {
            TaskIdField::Number(n) => Ok(*n),
            TaskIdField::Label(label) => {
                let suffix = label.rsplit('-').next().unwrap_or(label);
                suffix
                    .parse()
                    .with_context(|| format!("Task id '{}' has no numeric suffix", label))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub task_id: TaskIdField,
    pub metric_type: MetricKind,
    /// Sampling period in seconds
    pub frequency: u64,
    pub threshold: i64,
}

impl TaskEntry {
    pub fn to_task(&self) -> Result<Task> {
        Ok(Task::new(
            self.task_id.resolve()?,
            self.metric_type,
            Duration::from_secs(self.frequency),
            self.threshold,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentEntry {
    pub agent_id: AgentId,
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
    /// Target for the connect-latency probe; the collector when absent
    #[serde(default)]
    pub latency_target: Option<SocketAddr>,
}

impl AgentEntry {
    pub fn to_tasks(&self) -> Result<Vec<Task>> {
        self.tasks.iter().map(TaskEntry::to_task).collect()
    }
}

/// Agent-side timeouts and pacing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentTuning {
    #[serde(rename = "registration_timeout_ms", deserialize_with = "millis")]
    pub registration_timeout: Duration,
    pub registration_attempts: u32,
    #[serde(rename = "ack_timeout_ms", deserialize_with = "millis")]
    pub ack_timeout: Duration,
    /// Added to a task's period whenever an ACK carries the flow flag
    #[serde(rename = "flow_increment_ms", deserialize_with = "millis")]
    pub flow_increment: Duration,
    /// Consecutive unacknowledged samples before re-registering
    pub max_consecutive_timeouts: u32,
    #[serde(rename = "measurement_timeout_ms", deserialize_with = "millis")]
    pub measurement_timeout: Duration,
    #[serde(rename = "alert_timeout_ms", deserialize_with = "millis")]
    pub alert_timeout: Duration,
}

impl Default for AgentTuning {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(2),
            registration_attempts: 5,
            ack_timeout: Duration::from_secs(2),
            flow_increment: Duration::from_secs(5),
            max_consecutive_timeouts: 3,
            measurement_timeout: Duration::from_secs(5),
            alert_timeout: Duration::from_secs(5),
        }
    }
}

/// Collector-only settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub bind_ip: IpAddr,
    pub api_port: u16,
    pub dedup_window: usize,
    pub overload_ceiling: u32,
    pub congestion_policy: CongestionPolicy,
    #[serde(rename = "alert_read_timeout_ms", deserialize_with = "millis")]
    pub alert_read_timeout: Duration,
    #[serde(rename = "sink_timeout_ms", deserialize_with = "millis")]
    pub sink_timeout: Duration,
    /// Append every record as a JSON line to this file
    pub sink_path: Option<PathBuf>,
}

impl Default for CollectorSection {
    fn default() -> Self {
        let settings = CollectorSettings::default();
        Self {
            bind_ip: settings.bind_ip,
            api_port: default_api_port(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
            overload_ceiling: DEFAULT_OVERLOAD_CEILING,
            congestion_policy: CongestionPolicy::Sticky,
            alert_read_timeout: settings.alert_read_timeout,
            sink_timeout: settings.sink_timeout,
            sink_path: None,
        }
    }
}

/// The whole deployment as described by the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    #[serde(default = "default_server_ip")]
    pub server_ip: IpAddr,
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub tuning: AgentTuning,
    #[serde(default)]
    pub collector: CollectorSection,
}

impl FabricConfig {
    /// Load from a file, then apply `NETMON__*` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let fabric: FabricConfig = settings
            .try_deserialize()
            .context("Failed to parse fabric configuration")?;
        fabric.validate()?;
        Ok(fabric)
    }

    /// Parse a JSON document without consulting the environment
    pub fn from_json(json: &str) -> Result<Self> {
        let fabric: FabricConfig =
            serde_json::from_str(json).context("Failed to parse fabric configuration")?;
        fabric.validate()?;
        Ok(fabric)
    }

    pub fn validate(&self) -> Result<()> {
        let mut agent_ids = HashSet::new();
        for agent in &self.agents {
            if !agent_ids.insert(agent.agent_id) {
                bail!("Agent {} is configured twice", agent.agent_id);
            }

            let mut task_ids = HashSet::new();
            for entry in &agent.tasks {
                let task_id = entry.task_id.resolve()?;
                if !task_ids.insert(task_id) {
                    bail!("Agent {} has duplicate task id {}", agent.agent_id, task_id);
                }
                if entry.frequency == 0 {
                    bail!(
                        "Agent {} task {} has a zero sampling frequency",
                        agent.agent_id,
                        task_id
                    );
                }
                if i32::try_from(entry.threshold).is_err() {
                    bail!(
                        "Agent {} task {} threshold {} does not fit the alert wire format",
                        agent.agent_id,
                        task_id,
                        entry.threshold
                    );
                }
            }
        }

        if self.tuning.registration_attempts == 0 {
            bail!("tuning.registration_attempts must be at least 1");
        }
        Ok(())
    }

    /// Entry for one agent
    pub fn agent(&self, agent_id: AgentId) -> Result<&AgentEntry> {
        self.agents
            .iter()
            .find(|a| a.agent_id == agent_id)
            .with_context(|| format!("Agent {} not found in configuration", agent_id))
    }

    /// Where agents send datagrams
    pub fn udp_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.udp_port)
    }

    /// Where agents open alert connections
    pub fn tcp_endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.tcp_port)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            bind_ip: self.collector.bind_ip,
            udp_port: self.udp_port,
            tcp_port: self.tcp_port,
            dedup_window: self.collector.dedup_window,
            overload_ceiling: self.collector.overload_ceiling,
            congestion_policy: self.collector.congestion_policy,
            alert_read_timeout: self.collector.alert_read_timeout,
            sink_timeout: self.collector.sink_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "server_ip": "127.0.0.1",
        "udp_port": 5005,
        "tcp_port": 5006,
        "agents": [
            { "agent_id": 7, "tasks": [
                { "task_id": "task-12", "metric_type": "latency", "frequency": 10, "threshold": 50 },
                { "task_id": 13, "metric_type": "cpu_usage", "frequency": 5, "threshold": -3 }
            ] },
            { "agent_id": 8, "tasks": [] }
        ]
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let fabric = FabricConfig::from_json(SAMPLE).unwrap();
        assert_eq!(fabric.udp_endpoint(), "127.0.0.1:5005".parse().unwrap());
        assert_eq!(fabric.tcp_endpoint(), "127.0.0.1:5006".parse().unwrap());

        let tasks = fabric.agent(7).unwrap().to_tasks().unwrap();
        assert_eq!(
            tasks[0],
            Task::new(12, MetricKind::Latency, Duration::from_secs(10), 50)
        );
        assert_eq!(tasks[1].task_id, 13);
        assert_eq!(tasks[1].kind, MetricKind::CpuUsage);
        assert_eq!(tasks[1].threshold, -3);

        assert!(fabric.agent(8).unwrap().tasks.is_empty());
        assert!(fabric.agent(9).is_err());
    }

    #[test]
    fn test_defaults_applied() {
        let fabric = FabricConfig::from_json(r#"{ "agents": [] }"#).unwrap();
        assert_eq!(fabric.udp_port, 5005);
        assert_eq!(fabric.tcp_port, 5006);
        assert_eq!(fabric.tuning.registration_attempts, 5);
        assert_eq!(fabric.tuning.flow_increment, Duration::from_secs(5));
        assert_eq!(fabric.collector.api_port, 8080);
        assert_eq!(fabric.collector.dedup_window, 100);
        assert_eq!(fabric.collector_settings().overload_ceiling, 5);
    }

    #[test]
    fn test_tuning_and_policy_overrides() {
        let fabric = FabricConfig::from_json(
            r#"{
                "tuning": { "ack_timeout_ms": 250, "max_consecutive_timeouts": 4 },
                "collector": { "congestion_policy": { "mode": "windowed", "window_secs": 30 } }
            }"#,
        )
        .unwrap();
        assert_eq!(fabric.tuning.ack_timeout, Duration::from_millis(250));
        assert_eq!(fabric.tuning.max_consecutive_timeouts, 4);
        assert_eq!(fabric.tuning.registration_attempts, 5);
        assert_eq!(
            fabric.collector.congestion_policy,
            CongestionPolicy::Windowed { window_secs: 30 }
        );
    }

    #[test]
    fn test_rejects_duplicate_task_ids() {
        let err = FabricConfig::from_json(
            r#"{ "agents": [ { "agent_id": 1, "tasks": [
                { "task_id": "task-4", "metric_type": "latency", "frequency": 1, "threshold": 0 },
                { "task_id": 4, "metric_type": "bandwidth", "frequency": 1, "threshold": 0 }
            ] } ] }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate task id 4"));
    }

    #[test]
    fn test_rejects_zero_frequency() {
        let result = FabricConfig::from_json(
            r#"{ "agents": [ { "agent_id": 1, "tasks": [
                { "task_id": 1, "metric_type": "latency", "frequency": 0, "threshold": 0 }
            ] } ] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_threshold_must_fit_alert_field() {
        let result = FabricConfig::from_json(
            r#"{ "agents": [ { "agent_id": 1, "tasks": [
                { "task_id": 1, "metric_type": "latency", "frequency": 1, "threshold": 2147483648 }
            ] } ] }"#,
        );
        assert!(result.is_err());

        let fabric = FabricConfig::from_json(
            r#"{ "agents": [ { "agent_id": 1, "tasks": [
                { "task_id": 1, "metric_type": "latency", "frequency": 1, "threshold": -2147483648 }
            ] } ] }"#,
        )
        .unwrap();
        assert_eq!(fabric.agents[0].tasks[0].threshold, i64::from(i32::MIN));
    }

    #[test]
    fn test_rejects_unknown_metric_type() {
        let result = FabricConfig::from_json(
            r#"{ "agents": [ { "agent_id": 1, "tasks": [
                { "task_id": 1, "metric_type": "jitter", "frequency": 1, "threshold": 0 }
            ] } ] }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_task_label_without_number() {
        assert!(TaskIdField::Label("probe".to_string()).resolve().is_err());
        assert_eq!(TaskIdField::Label("a-b-9".to_string()).resolve().unwrap(), 9);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let fabric = FabricConfig::load(file.path()).unwrap();
        assert_eq!(fabric.agents.len(), 2);
        assert_eq!(fabric.agent(7).unwrap().tasks.len(), 2);
    }
}
