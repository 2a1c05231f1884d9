//! netmon-agent - network monitoring agent
//!
//! Registers with the collector, then reports one metric stream per
//! configured task and raises alerts when a task's threshold is exceeded.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use netmon_core::{
    agent::AgentSession,
    observability::StructuredLogger,
    AgentId,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Parser)]
#[command(name = "netmon-agent")]
#[command(about = "Agent for the network monitoring fabric", long_about = None)]
#[command(version)]
struct Cli {
    /// Fabric configuration file (JSON, TOML or YAML)
    #[arg(short, long, env = "NETMON_CONFIG")]
    config: PathBuf,

    /// Identity of this agent in the configuration file
    #[arg(short, long, env = "NETMON_AGENT_ID")]
    agent_id: AgentId,

    /// Report the fixed simulated reading instead of real measurements
    #[arg(long)]
    simulate: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "json")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = config::AgentConfig::load(&cli.config, cli.agent_id)?;
    info!(
        agent_id = cli.agent_id,
        tasks = config.tasks.len(),
        collector = %config.fabric.udp_endpoint(),
        "Agent configured"
    );

    let logger = StructuredLogger::new("agent");
    logger.log_startup(AGENT_VERSION);

    let probes = config.probes(cli.simulate);
    for task in &config.tasks {
        if !probes.supports(task.kind) {
            warn!(
                task_id = task.task_id,
                metric_kind = %task.kind,
                "No probe for this metric kind; every cycle will be skipped"
            );
        }
    }

    let session = AgentSession::new(
        cli.agent_id,
        config.tasks.clone(),
        config.fabric.udp_endpoint(),
        config.fabric.tcp_endpoint(),
        Arc::new(probes),
        config.fabric.tuning.clone(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut running = tokio::spawn(session.run(shutdown_tx.clone()));

    tokio::select! {
        finished = &mut running => {
            let summary = finished.context("Agent session panicked")??;
            info!(
                tasks_started = summary.tasks_started,
                tasks_failed = summary.tasks_failed,
                "All reporters stopped"
            );
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            logger.log_shutdown("SIGINT received");
        }
    }

    let _ = shutdown_tx.send(());
    let summary = running.await.context("Agent session panicked")??;
    info!(
        tasks_started = summary.tasks_started,
        tasks_failed = summary.tasks_failed,
        "Shutdown complete"
    );
    Ok(())
}
