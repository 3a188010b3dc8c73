//! Workflow event stream
//!
//! Observers subscribe to a channel instead of registering callbacks; the
//! engine publishes one event per state transition and never waits on a
//! consumer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::AssistanceType;

/// One workflow state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum WorkflowEvent {
    RequestEnqueued {
        #[serde(rename = "request-id")]
        request_id: String,
        #[serde(rename = "type")]
        assistance_type: AssistanceType,
    },
    RequestStarted {
        #[serde(rename = "request-id")]
        request_id: String,
        stage: String,
    },
    RequestCompleted {
        #[serde(rename = "request-id")]
        request_id: String,
        response: Value,
    },
    RequestFailed {
        #[serde(rename = "request-id")]
        request_id: String,
        error: String,
        #[serde(rename = "will-retry")]
        will_retry: bool,
    },
    WorkflowPaused,
    WorkflowResumed,
    /// Every queued request reached a terminal state
    WorkflowCompleted,
    CheckpointSaved {
        step: String,
    },
    CheckpointRestored {
        step: String,
    },
}
