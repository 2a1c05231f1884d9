//! Agent configuration: this agent's entry in the fabric file and its probes

use anyhow::Result;
use netmon_core::config::{AgentEntry, FabricConfig};
use netmon_core::probe::{ConnectLatencyProbe, FixedProbe, LoadAverageProbe, ProbeSet};
use netmon_core::{AgentId, MetricKind, Task};
use std::path::Path;
use std::sync::Arc;

/// Everything one agent process needs from the fabric file
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub fabric: FabricConfig,
    pub entry: AgentEntry,
    pub tasks: Vec<Task>,
}

impl AgentConfig {
    pub fn load(path: &Path, agent_id: AgentId) -> Result<Self> {
        let fabric = FabricConfig::load(path)?;
        let entry = fabric.agent(agent_id)?.clone();
        let tasks = entry.to_tasks()?;
        Ok(Self {
            fabric,
            entry,
            tasks,
        })
    }

    /// Probes for every kind this host can measure.
    ///
    /// With `simulate` every kind reports the fixed simulated reading.
    /// Latency is only measured against an explicit `latency_target`; the
    /// collector's alert port is never used as one.
    pub fn probes(&self, simulate: bool) -> ProbeSet {
        if simulate {
            let fixed = Arc::new(FixedProbe::default());
            return ProbeSet::new()
                .with(MetricKind::Latency, fixed.clone())
                .with(MetricKind::CpuUsage, fixed.clone())
                .with(MetricKind::Bandwidth, fixed);
        }

        let probes =
            ProbeSet::new().with(MetricKind::CpuUsage, Arc::new(LoadAverageProbe::default()));
        match self.entry.latency_target {
            Some(target) => probes.with(
                MetricKind::Latency,
                Arc::new(ConnectLatencyProbe::new(
                    target,
                    self.fabric.tuning.measurement_timeout,
                )),
            ),
            None => probes,
        }
    }
}
