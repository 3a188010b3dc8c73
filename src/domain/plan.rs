//! RegistrationPlan domain type
//!
//! One plan per (user, session). Captures when the registration window opens,
//! how to detect it, and how aggressively to retry when a submission fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::now_ms;

/// How the open instant (T0) is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OpenStrategy {
    /// User supplied the target open time directly
    #[default]
    Manual,
    /// Open time is published on a detection page; poll until it appears
    Published,
    /// No known open time; poll the detection URL for an open signal
    Auto,
}

impl std::fmt::Display for OpenStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Published => write!(f, "published"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl OpenStrategy {
    /// Whether this strategy fires at an exact known instant rather than
    /// by polling for an open signal
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// How much of the submission the daemon drives on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountMode {
    /// Daemon prepares and submits, human resolves barriers
    #[default]
    Assist,
    /// Daemon drives everything it can without waiting for a human
    Autopilot,
}

/// What to do when automatic retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    /// Notify the parent and stop
    #[default]
    AlertParent,
    /// Keep retrying on the configured cadence
    KeepTrying,
}

/// How to recover after an interruption mid-workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Start the workflow over from the beginning
    #[default]
    Restart,
    /// Resume from the last checkpointed step
    ContinueFromStep,
}

/// Result of the most recent preflight validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreflightStatus {
    #[default]
    Unknown,
    Passed,
    Failed,
}

/// One registration plan per (user, session) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPlan {
    /// Unique identifier
    pub id: String,

    /// Owning user
    #[serde(rename = "user-id")]
    pub user_id: String,

    /// Provider session being registered for
    #[serde(rename = "session-id")]
    pub session_id: String,

    /// How T0 is determined
    #[serde(rename = "open-strategy")]
    pub open_strategy: OpenStrategy,

    /// Target open time; required when the strategy is manual
    #[serde(rename = "target-open-at")]
    pub target_open_at: Option<DateTime<Utc>>,

    /// URL polled for an open signal; required unless the strategy is manual
    #[serde(rename = "detection-url")]
    pub detection_url: Option<String>,

    /// IANA timezone label for display; T0 itself is stored in UTC
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Assist vs autopilot
    #[serde(rename = "account-mode", default)]
    pub account_mode: AccountMode,

    /// Maximum automatic submission attempts
    #[serde(rename = "retry-attempts", default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base retry delay in milliseconds
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// What to do when retries are exhausted
    #[serde(rename = "fallback-strategy", default)]
    pub fallback_strategy: FallbackStrategy,

    /// How to recover after interruption
    #[serde(rename = "recovery-mode", default)]
    pub recovery_mode: RecoveryMode,

    /// Last preflight result
    #[serde(rename = "preflight-status", default)]
    pub preflight_status: PreflightStatus,

    /// Creation timestamp (Unix milliseconds)
    #[serde(rename = "created-at")]
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    #[serde(rename = "updated-at")]
    pub updated_at: i64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl RegistrationPlan {
    /// Create a new plan with a generated ID
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        let session_id = session_id.into();
        let now = now_ms();

        Self {
            id: generate_id("plan", &session_id),
            user_id,
            session_id,
            open_strategy: OpenStrategy::Manual,
            target_open_at: None,
            detection_url: None,
            timezone: default_timezone(),
            account_mode: AccountMode::Assist,
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            fallback_strategy: FallbackStrategy::AlertParent,
            recovery_mode: RecoveryMode::Restart,
            preflight_status: PreflightStatus::Unknown,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder method to set the open strategy
    pub fn with_open_strategy(mut self, strategy: OpenStrategy) -> Self {
        self.open_strategy = strategy;
        self.updated_at = now_ms();
        self
    }

    /// Builder method to set the target open time
    pub fn with_target_open_at(mut self, at: DateTime<Utc>) -> Self {
        self.target_open_at = Some(at);
        self.updated_at = now_ms();
        self
    }

    /// Builder method to set the detection URL
    pub fn with_detection_url(mut self, url: impl Into<String>) -> Self {
        self.detection_url = Some(url.into());
        self.updated_at = now_ms();
        self
    }

    /// Validate strategy / target-time / detection-URL consistency and
    /// record the result in `preflight_status`.
    ///
    /// Returns the list of problems found (empty when the plan passed).
    pub fn preflight(&mut self) -> Vec<String> {
        let mut problems = Vec::new();

        match self.open_strategy {
            OpenStrategy::Manual => {
                if self.target_open_at.is_none() {
                    problems.push("manual open strategy requires a target open time".to_string());
                }
            }
            OpenStrategy::Published | OpenStrategy::Auto => {
                if self.detection_url.is_none() {
                    problems.push(format!(
                        "{} open strategy requires a detection URL",
                        self.open_strategy
                    ));
                }
            }
        }

        if self.retry_delay_ms == 0 && self.retry_attempts > 0 {
            problems.push("retry delay must be non-zero when retries are enabled".to_string());
        }

        self.preflight_status = if problems.is_empty() {
            PreflightStatus::Passed
        } else {
            PreflightStatus::Failed
        };
        self.updated_at = now_ms();

        problems
    }
}
