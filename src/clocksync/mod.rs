//! Clock sync estimation
//!
//! Measures network round-trip and provider-reported time immediately before
//! a timed action. Each probe is independent; there is no shared mutable
//! state between calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors from a clock-sync probe
#[derive(Debug, Error)]
pub enum ClockSyncError {
    #[error("probe request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider response had no Date header")]
    MissingServerTime,

    #[error("unparseable server time: {0}")]
    BadServerTime(String),
}

impl ClockSyncError {
    /// All clock-sync failures are transient from the caller's perspective:
    /// the attempt proceeds unsynced rather than failing
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// One drift/latency measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSample {
    /// serverTime - midpoint(localSend, localReceive), in ms (signed)
    #[serde(rename = "drift-ms")]
    pub drift_ms: i64,

    /// (localReceive - localSend) / 2, in ms
    #[serde(rename = "latency-ms")]
    pub latency_ms: i64,

    /// False when the probe failed and the caller fell back to zero drift
    pub synced: bool,
}

impl ClockSample {
    /// Zero-drift fallback used when the probe fails
    pub fn unsynced() -> Self {
        Self {
            drift_ms: 0,
            latency_ms: 0,
            synced: false,
        }
    }
}

/// Clock-sync estimator interface
#[async_trait]
pub trait ClockSync: Send + Sync {
    /// Probe the provider and estimate drift and latency
    async fn probe(&self, url: &str) -> Result<ClockSample, ClockSyncError>;
}

/// HTTP implementation: lightweight HEAD request, drift from the Date header
pub struct HttpClockSync {
    client: reqwest::Client,
}

impl HttpClockSync {
    /// Create an estimator with the given probe timeout
    pub fn new(timeout: Duration) -> Result<Self, ClockSyncError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClockSync for HttpClockSync {
    async fn probe(&self, url: &str) -> Result<ClockSample, ClockSyncError> {
        let sent_at = Utc::now();
        let response = self.client.head(url).send().await?;
        let received_at = Utc::now();

        let date_header = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .ok_or(ClockSyncError::MissingServerTime)?;

        let server_time: DateTime<Utc> = DateTime::parse_from_rfc2822(date_header)
            .map_err(|_| ClockSyncError::BadServerTime(date_header.to_string()))?
            .with_timezone(&Utc);

        let sample = compute_sample(sent_at, received_at, server_time);
        debug!(
            url,
            drift_ms = sample.drift_ms,
            latency_ms = sample.latency_ms,
            "clock sync probe complete"
        );
        Ok(sample)
    }
}

/// Compute drift and latency from probe timestamps
fn compute_sample(sent_at: DateTime<Utc>, received_at: DateTime<Utc>, server_time: DateTime<Utc>) -> ClockSample {
    let sent_ms = sent_at.timestamp_millis();
    let received_ms = received_at.timestamp_millis();
    let midpoint_ms = sent_ms + (received_ms - sent_ms) / 2;

    ClockSample {
        drift_ms: server_time.timestamp_millis() - midpoint_ms,
        latency_ms: ((received_ms - sent_ms) / 2).max(0),
        synced: true,
    }
}
