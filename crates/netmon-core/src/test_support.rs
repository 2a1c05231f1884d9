//! Helpers shared by the in-crate test suites

use crate::error::SinkError;
use crate::models::{AlertRecord, SampleRecord};
use crate::sink::RecordSink;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Sink that keeps every record in memory
#[derive(Default)]
pub struct MemorySink {
    samples: Mutex<Vec<SampleRecord>>,
    alerts: Mutex<Vec<AlertRecord>>,
}

impl MemorySink {
    pub fn samples(&self) -> Vec<SampleRecord> {
        self.samples.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().unwrap().clone()
    }

    /// Poll until at least `n` samples arrived or `timeout` elapsed
    pub async fn wait_for_samples(&self, n: usize, timeout: Duration) -> Vec<SampleRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let samples = self.samples();
            if samples.len() >= n || tokio::time::Instant::now() >= deadline {
                return samples;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until at least `n` alerts arrived or `timeout` elapsed
    pub async fn wait_for_alerts(&self, n: usize, timeout: Duration) -> Vec<AlertRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let alerts = self.alerts();
            if alerts.len() >= n || tokio::time::Instant::now() >= deadline {
                return alerts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn record_sample(&self, record: &SampleRecord) -> Result<(), SinkError> {
        self.samples.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn record_alert(&self, record: &AlertRecord) -> Result<(), SinkError> {
        self.alerts.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Sink that rejects everything
pub struct RejectingSink;

#[async_trait]
impl RecordSink for RejectingSink {
    async fn record_sample(&self, _record: &SampleRecord) -> Result<(), SinkError> {
        Err(SinkError::Rejected("read-only".to_string()))
    }

    async fn record_alert(&self, _record: &AlertRecord) -> Result<(), SinkError> {
        Err(SinkError::Rejected("read-only".to_string()))
    }
}
