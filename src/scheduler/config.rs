//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lead time before T0 for exact-time strategy, in seconds
    #[serde(rename = "exact-lead-secs", default = "default_exact_lead_secs")]
    pub exact_lead_secs: u64,

    /// Lead time before T0 for polling strategies, in seconds
    #[serde(rename = "poll-lead-secs", default = "default_poll_lead_secs")]
    pub poll_lead_secs: u64,

    /// Interval between open-signal polls during the lead window, in ms
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Fire channel buffer size
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_exact_lead_secs() -> u64 {
    60
}

fn default_poll_lead_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_channel_buffer() -> usize {
    64
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            exact_lead_secs: default_exact_lead_secs(),
            poll_lead_secs: default_poll_lead_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl SchedulerConfig {
    /// Lead window for the exact-time strategy
    pub fn exact_lead(&self) -> Duration {
        Duration::from_secs(self.exact_lead_secs)
    }

    /// Lead window for polling strategies
    pub fn poll_lead(&self) -> Duration {
        Duration::from_secs(self.poll_lead_secs)
    }

    /// Interval between open-signal polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
