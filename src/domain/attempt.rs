//! AttemptRecord domain type
//!
//! One record per execution try of a plan. Terminal records are immutable;
//! a plan has at most one non-terminal record at any time.

use serde::{Deserialize, Serialize};

use crate::barrier::Barrier;

use super::now_ms;

/// Attempt lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Created, nothing sent yet
    #[default]
    Pending,
    /// Warming the connection / syncing clocks
    Preconnect,
    /// Submission in flight
    Submitting,
    /// Confirmed registration
    Success,
    /// Submission ran to completion without a confirmation
    Failed,
    /// A barrier stopped the attempt; assistance workflow takes over
    Blocked,
    /// Plan was cancelled while the attempt was non-terminal
    Cancelled,
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Preconnect => write!(f, "preconnect"),
            Self::Submitting => write!(f, "submitting"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Blocked => write!(f, "blocked"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl AttemptStatus {
    /// Terminal statuses are immutable once written
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Blocked | Self::Cancelled)
    }
}

/// One execution try of a registration plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Owning plan
    #[serde(rename = "plan-id")]
    pub plan_id: String,

    /// Monotonic per plan, starts at 1
    #[serde(rename = "attempt-number")]
    pub attempt_number: u32,

    /// Current status
    pub status: AttemptStatus,

    /// Idempotency token for the submission; the provider-side guard
    /// against double registration when a retry races a delayed response
    pub nonce: String,

    /// Preconnect start (Unix ms)
    #[serde(rename = "started-at")]
    pub started_at: i64,

    /// Submission send time (Unix ms)
    #[serde(rename = "submitted-at")]
    pub submitted_at: Option<i64>,

    /// Terminal-state time (Unix ms)
    #[serde(rename = "completed-at")]
    pub completed_at: Option<i64>,

    /// One-way network latency estimate in ms
    #[serde(rename = "latency-ms")]
    pub latency_ms: Option<i64>,

    /// Signed local-vs-provider clock drift estimate in ms
    #[serde(rename = "drift-ms")]
    pub drift_ms: Option<i64>,

    /// Whether the drift estimate came from a successful probe
    #[serde(default)]
    pub synced: bool,

    /// Whether a provider queue was detected during the attempt
    #[serde(rename = "queue-detected", default)]
    pub queue_detected: bool,

    /// Position in the provider queue, when reported
    #[serde(rename = "queue-position")]
    pub queue_position: Option<u32>,

    /// Barrier classification hit, if any
    #[serde(default)]
    pub barrier: Barrier,

    /// Provider confirmation identifier on success
    #[serde(rename = "confirmation-id")]
    pub confirmation_id: Option<String>,

    /// Error message on failure
    pub error: Option<String>,
}

impl AttemptRecord {
    /// Create a fresh pending attempt with a new nonce
    pub fn new(plan_id: impl Into<String>, attempt_number: u32) -> Self {
        Self {
            plan_id: plan_id.into(),
            attempt_number,
            status: AttemptStatus::Pending,
            nonce: uuid::Uuid::now_v7().to_string(),
            started_at: now_ms(),
            submitted_at: None,
            completed_at: None,
            latency_ms: None,
            drift_ms: None,
            synced: false,
            queue_detected: false,
            queue_position: None,
            barrier: Barrier::None,
            confirmation_id: None,
            error: None,
        }
    }

    /// Check if the attempt reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark success with the provider confirmation id
    pub fn mark_success(&mut self, confirmation_id: impl Into<String>) {
        self.status = AttemptStatus::Success;
        self.confirmation_id = Some(confirmation_id.into());
        self.completed_at = Some(now_ms());
    }

    /// Mark failed with an error message
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = AttemptStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now_ms());
    }

    /// Mark blocked on a barrier
    pub fn mark_blocked(&mut self, barrier: Barrier) {
        self.status = AttemptStatus::Blocked;
        self.barrier = barrier;
        self.completed_at = Some(now_ms());
    }

    /// Mark cancelled (plan torn down while non-terminal)
    pub fn mark_cancelled(&mut self) {
        self.status = AttemptStatus::Cancelled;
        self.completed_at = Some(now_ms());
    }
}
