//! Collector configuration and sink selection

use anyhow::{Context, Result};
use netmon_core::config::FabricConfig;
use netmon_core::sink::{FanoutSink, JsonLinesSink, RecordSink, TracingSink};
use std::path::Path;
use std::sync::Arc;

/// Load the fabric file, or fall back to defaults when none is given
pub fn load(path: Option<&Path>) -> Result<FabricConfig> {
    match path {
        Some(path) => FabricConfig::load(path),
        None => FabricConfig::from_json("{}"),
    }
}

/// Every record is logged; a JSON-lines file is added when configured
pub async fn build_sink(fabric: &FabricConfig) -> Result<Arc<dyn RecordSink>> {
    let Some(path) = &fabric.collector.sink_path else {
        return Ok(Arc::new(TracingSink));
    };

    let file = JsonLinesSink::open(path)
        .await
        .with_context(|| format!("Failed to open sink file {}", path.display()))?;

    Ok(Arc::new(
        FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(file)),
    ))
}
