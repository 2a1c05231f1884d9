//! Destinations for accepted samples and received alerts
//!
//! The collector hands every decoded record to a [`RecordSink`]. Failures
//! are logged by the caller and never affect the network path.

use crate::error::SinkError;
use crate::models::{AlertRecord, SampleRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError>;

    async fn record_alert(&self, record: &AlertRecord) -> Result<(), SinkError>;
}

/// Logs every record through `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

#[async_trait]
impl RecordSink for TracingSink {
    async fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        info!(
            event = "sample_recorded",
            agent_id = record.agent_id,
            task_id = record.task_id,
            metric_kind = %record.metric_kind,
            value = record.value,
            timestamp = record.timestamp,
            "Metric sample received"
        );
        Ok(())
    }

    async fn record_alert(&self, record: &AlertRecord) -> Result<(), SinkError> {
        warn!(
            event = "alert_recorded",
            agent_id = record.agent_id,
            alert_type = %record.alert_type,
            metric_kind = %record.metric_kind,
            value = record.value,
            threshold = record.threshold,
            timestamp = record.timestamp,
            "Threshold alert received"
        );
        Ok(())
    }
}

/// One line in a JSON-lines sink file
#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JsonLine<'a> {
    Sample(&'a SampleRecord),
    Alert(&'a AlertRecord),
}

/// Appends one JSON object per record to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open (creating if needed) the file in append mode
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: JsonLine<'_>) -> Result<(), SinkError> {
        let mut bytes = serde_json::to_vec(&line)?;
        bytes.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        self.append(JsonLine::Sample(record)).await
    }

    async fn record_alert(&self, record: &AlertRecord) -> Result<(), SinkError> {
        self.append(JsonLine::Alert(record)).await
    }
}

/// Forwards each record to every inner sink.
///
/// All sinks are attempted; the first failure is returned after the rest
/// have been tried.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn RecordSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl RecordSink for FanoutSink {
    async fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record_sample(record).await {
                warn!(error = %e, "Sink failed to record sample");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn record_alert(&self, record: &AlertRecord) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record_alert(record).await {
                warn!(error = %e, "Sink failed to record alert");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
