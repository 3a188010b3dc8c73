//! AssistanceRequest domain type
//!
//! One request per detected barrier that needs a human. Requests live in a
//! WorkflowState queue, ordered by insertion, processed one at a time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::barrier::Barrier;

use super::id::generate_id;
use super::now_ms;
use super::priority::Priority;

/// What kind of human step is needed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceType {
    AccountCreation,
    Captcha,
    Payment,
    FormCompletion,
}

impl std::fmt::Display for AssistanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccountCreation => write!(f, "account_creation"),
            Self::Captcha => write!(f, "captcha"),
            Self::Payment => write!(f, "payment"),
            Self::FormCompletion => write!(f, "form_completion"),
        }
    }
}

impl AssistanceType {
    /// Map a classified barrier to the assistance step it requires.
    /// Returns None for barriers that do not need a human.
    pub fn from_barrier(barrier: Barrier) -> Option<Self> {
        match barrier {
            Barrier::Captcha => Some(Self::Captcha),
            Barrier::LoginRequired => Some(Self::AccountCreation),
            Barrier::PaymentRequired => Some(Self::Payment),
            Barrier::None | Barrier::Queue | Barrier::UnknownError => None,
        }
    }
}

/// Assistance request lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceStatus {
    #[default]
    Queued,
    Active,
    Completed,
    Failed,
    Paused,
}

impl std::fmt::Display for AssistanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl AssistanceStatus {
    /// Completed and failed are terminal unless explicitly retried
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One human-assistance step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistanceRequest {
    /// Unique identifier
    pub id: String,

    /// What kind of step this is
    #[serde(rename = "type")]
    pub assistance_type: AssistanceType,

    /// Human-readable stage label, e.g. "Solve the sign-up CAPTCHA"
    pub stage: String,

    /// Current status
    pub status: AssistanceStatus,

    /// Notification priority
    #[serde(default)]
    pub priority: Priority,

    /// Estimated time for the human step in ms
    #[serde(rename = "estimated-duration-ms")]
    pub estimated_duration_ms: u64,

    /// Actual duration, recorded at completion
    #[serde(rename = "actual-duration-ms")]
    pub actual_duration_ms: Option<u64>,

    /// Whatever the human handed back (verification token, confirmation, ...)
    pub response: Option<Value>,

    /// Whether the parent must be pinged when this activates
    #[serde(rename = "requires-parent-intervention")]
    pub requires_parent_intervention: bool,

    /// Whether a failure of this step may be retried without a human
    #[serde(rename = "auto-resumable")]
    pub auto_resumable: bool,

    /// Advisory probability from upstream risk analysis; never gates enqueue
    #[serde(default)]
    pub likelihood: Option<f64>,

    /// Automatic retries consumed so far
    #[serde(rename = "retry-count", default)]
    pub retry_count: u32,

    /// Automatic retry budget
    #[serde(rename = "max-retries", default = "default_max_retries")]
    pub max_retries: u32,

    /// Earliest time a retried request may re-activate (Unix ms)
    #[serde(rename = "retry-not-before")]
    pub retry_not_before: Option<i64>,

    /// Last failure message
    pub error: Option<String>,

    /// Creation timestamp (Unix ms)
    #[serde(rename = "created-at")]
    pub created_at: i64,

    /// Completion timestamp (Unix ms)
    #[serde(rename = "completed-at")]
    pub completed_at: Option<i64>,
}

fn default_max_retries() -> u32 {
    3
}

impl AssistanceRequest {
    /// Create a new queued request
    pub fn new(assistance_type: AssistanceType, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        Self {
            id: generate_id("assist", &stage),
            assistance_type,
            stage,
            status: AssistanceStatus::Queued,
            priority: Priority::Medium,
            estimated_duration_ms: 120_000,
            actual_duration_ms: None,
            response: None,
            requires_parent_intervention: true,
            auto_resumable: false,
            likelihood: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            retry_not_before: None,
            error: None,
            created_at: now_ms(),
            completed_at: None,
        }
    }

    /// Build a request from a classified barrier, if it needs a human
    pub fn from_barrier(barrier: Barrier, stage: impl Into<String>) -> Option<Self> {
        let assistance_type = AssistanceType::from_barrier(barrier)?;
        let mut request = Self::new(assistance_type, stage);
        request.priority = Priority::High;
        // CAPTCHAs cannot be bypassed by the daemon, so never auto-resume
        request.auto_resumable = !matches!(assistance_type, AssistanceType::Captcha);
        Some(request)
    }

    /// Builder method to set the priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the estimated duration
    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    /// Builder method to set auto-resumability
    pub fn with_auto_resumable(mut self, auto_resumable: bool) -> Self {
        self.auto_resumable = auto_resumable;
        self
    }

    /// Builder method to attach the advisory likelihood
    pub fn with_likelihood(mut self, likelihood: f64) -> Self {
        self.likelihood = Some(likelihood);
        self
    }

    /// Whether this request still needs processing
    pub fn is_pending(&self) -> bool {
        matches!(self.status, AssistanceStatus::Queued | AssistanceStatus::Active | AssistanceStatus::Paused)
    }

    /// Mark completed, recording the human response and actual duration
    pub fn complete(&mut self, response: Value) {
        let now = now_ms();
        self.status = AssistanceStatus::Completed;
        self.response = Some(response);
        self.actual_duration_ms = Some((now - self.created_at).max(0) as u64);
        self.completed_at = Some(now);
    }

    /// Mark terminally failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = AssistanceStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now_ms());
    }

    /// Return to the queue for a later retry, preserving position
    pub fn requeue_after(&mut self, delay_ms: u64, error: impl Into<String>) {
        self.status = AssistanceStatus::Queued;
        self.retry_count += 1;
        self.retry_not_before = Some(now_ms() + delay_ms as i64);
        self.error = Some(error.into());
    }

    /// Reset a failed request back to queued (explicit human retry)
    pub fn reset_for_retry(&mut self) {
        self.status = AssistanceStatus::Queued;
        self.retry_count = 0;
        self.retry_not_before = None;
        self.error = None;
        self.completed_at = None;
    }

    /// Whether the retry-not-before gate has passed
    pub fn retry_window_open(&self, now: i64) -> bool {
        self.retry_not_before.map(|t| now >= t).unwrap_or(true)
    }
}
