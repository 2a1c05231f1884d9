//! netmon-collector - network monitoring collector
//!
//! Receives REGISTER/METRIC datagrams from agents, acknowledges them with
//! flow-control hints, accepts threshold alerts over TCP and serves health
//! and Prometheus endpoints over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use netmon_core::{
    collector::Collector,
    health::HealthRegistry,
    observability::{NetmonMetrics, StructuredLogger},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const COLLECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Parser)]
#[command(name = "netmon-collector")]
#[command(about = "Collector for the network monitoring fabric", long_about = None)]
#[command(version)]
struct Cli {
    /// Fabric configuration file (JSON, TOML or YAML)
    #[arg(short, long, env = "NETMON_CONFIG")]
    config: Option<PathBuf>,

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

    let fabric = config::load(cli.config.as_deref())?;
    let settings = fabric.collector_settings();
    info!(
        udp_port = settings.udp_port,
        tcp_port = settings.tcp_port,
        dedup_window = settings.dedup_window,
        overload_ceiling = settings.overload_ceiling,
        "Collector configured"
    );

    let logger = StructuredLogger::new("collector");
    logger.log_startup(COLLECTOR_VERSION);

    // Register counters before the first scrape
    let _metrics = NetmonMetrics::new();
    let health_registry = HealthRegistry::new();

    let sink = config::build_sink(&fabric).await?;
    let collector = Collector::bind(settings.clone(), sink, health_registry.clone())
        .await
        .context("Failed to start collector")?;
    info!(
        udp = ?collector.udp_addr().ok(),
        tcp = ?collector.tcp_addr().ok(),
        "Collector listening"
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let tasks = collector.spawn(&shutdown_tx);

    let api_addr = SocketAddr::new(settings.bind_ip, fabric.collector.api_port);
    let app_state = Arc::new(api::AppState::new(health_registry));
    let api_handle = tokio::spawn(api::serve(api_addr, app_state, shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    tasks.join().await;
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
