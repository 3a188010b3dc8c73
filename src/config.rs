//! Daemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::{RetryPolicy, DEFAULT_MAX_DELAY_MS};
use crate::scheduler::SchedulerConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attempt scheduling (lead windows, poll cadence)
    pub scheduler: SchedulerConfig,

    /// Retry/backoff policy
    pub retry: RetryConfig,

    /// Clock-sync and open-detection probes
    pub probe: ProbeConfig,

    /// External automation runner
    pub automation: AutomationConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration, falling back from an explicit path through the
    /// project-local file and the user config to built-in defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // An explicit path must load; a missing fallback file is fine
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()));
        }

        let mut candidates = vec![PathBuf::from(".regdaemon.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("regdaemon").join("regdaemon.yml"));
        }

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upper bound on a single backoff delay in milliseconds
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Base delay for assistance-step auto-retries in milliseconds
    #[serde(rename = "assist-base-delay-ms")]
    pub assist_base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            assist_base_delay_ms: 1_000,
        }
    }
}

impl RetryConfig {
    /// Build the policy this config describes
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::with_cap(self.max_delay_ms)
    }
}

/// Probe configuration for clock sync and open detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// HTTP timeout for a single probe in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// External automation runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Base URL of the automation runner
    pub endpoint: String,

    /// HTTP timeout for one submit command in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8700".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl AutomationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for checkpoint and telemetry files
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/regdaemon on Linux)
        let data_dir = dirs::data_dir()
            .map(|d| d.join("regdaemon"))
            .unwrap_or_else(|| PathBuf::from(".regdaemon"));

        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.scheduler.exact_lead_secs, 60);
        assert_eq!(config.retry.max_delay_ms, DEFAULT_MAX_DELAY_MS);
        assert_eq!(config.probe.timeout_ms, 5_000);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
scheduler:
  exact-lead-secs: 30
  poll-interval-ms: 250

retry:
  max-delay-ms: 30000
  assist-base-delay-ms: 500

probe:
  timeout-ms: 2000

automation:
  endpoint: http://runner.local:9000
  timeout-ms: 15000

storage:
  data-dir: /var/lib/regdaemon
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.scheduler.exact_lead_secs, 30);
        assert_eq!(config.scheduler.poll_interval_ms, 250);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.retry.assist_base_delay_ms, 500);
        assert_eq!(config.probe.timeout_ms, 2_000);
        assert_eq!(config.automation.endpoint, "http://runner.local:9000");
        assert_eq!(config.automation.timeout_ms, 15_000);
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/regdaemon"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
retry:
  max-delay-ms: 10000
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.retry.max_delay_ms, 10_000);

        // Defaults for unspecified
        assert_eq!(config.retry.assist_base_delay_ms, 1_000);
        assert_eq!(config.scheduler.poll_lead_secs, 120);
    }

    #[test]
    fn test_retry_config_builds_policy() {
        let config = RetryConfig {
            max_delay_ms: 8_000,
            assist_base_delay_ms: 1_000,
        };
        let policy = config.policy();
        assert_eq!(policy.delay_for(20, 1_000), 8_000);
    }
}
