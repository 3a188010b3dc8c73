//! Attempt telemetry
//!
//! Every submission attempt emits one telemetry event regardless of outcome.
//! Recording must never block or fail the attempt path; sink errors are
//! swallowed by the caller and logged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::barrier::Barrier;
use crate::domain::{now_ms, AttemptRecord};

/// One telemetry event per attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(rename = "plan-id")]
    pub plan_id: String,

    #[serde(rename = "attempt-number")]
    pub attempt_number: u32,

    /// Final attempt status as a string
    pub outcome: String,

    #[serde(rename = "latency-ms")]
    pub latency_ms: Option<i64>,

    #[serde(rename = "drift-ms")]
    pub drift_ms: Option<i64>,

    pub synced: bool,

    #[serde(rename = "queue-detected")]
    pub queue_detected: bool,

    #[serde(rename = "queue-position")]
    pub queue_position: Option<u32>,

    pub barrier: Barrier,

    #[serde(rename = "recorded-at")]
    pub recorded_at: i64,
}

impl TelemetryEvent {
    /// Build an event from a finished (or blocked) attempt record
    pub fn from_attempt(record: &AttemptRecord) -> Self {
        Self {
            plan_id: record.plan_id.clone(),
            attempt_number: record.attempt_number,
            outcome: record.status.to_string(),
            latency_ms: record.latency_ms,
            drift_ms: record.drift_ms,
            synced: record.synced,
            queue_detected: record.queue_detected,
            queue_position: record.queue_position,
            barrier: record.barrier,
            recorded_at: now_ms(),
        }
    }
}

/// Telemetry sink
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: &TelemetryEvent) -> Result<(), std::io::Error>;
}

/// Log-backed sink for local runs
#[derive(Default)]
pub struct LogTelemetrySink;

#[async_trait]
impl TelemetrySink for LogTelemetrySink {
    async fn record(&self, event: &TelemetryEvent) -> Result<(), std::io::Error> {
        info!(
            plan_id = %event.plan_id,
            attempt = event.attempt_number,
            outcome = %event.outcome,
            latency_ms = ?event.latency_ms,
            drift_ms = ?event.drift_ms,
            barrier = %event.barrier,
            "attempt telemetry"
        );
        Ok(())
    }
}

/// JSONL file sink for later reporting
pub struct JsonlTelemetrySink {
    store_path: PathBuf,
}

impl JsonlTelemetrySink {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }

    fn events_file(&self) -> PathBuf {
        self.store_path.join("telemetry.jsonl")
    }
}

#[async_trait]
impl TelemetrySink for JsonlTelemetrySink {
    async fn record(&self, event: &TelemetryEvent) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.store_path).await?;

        let line = serde_json::to_string(event).map_err(std::io::Error::other)? + "\n";
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_file())
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
