//! Checkpoint snapshot for workflow resume
//!
//! Immutable snapshot of a WorkflowState plus plan context, tagged with a
//! step name. Restore ignores unknown fields so older daemons can read
//! newer snapshots.

use serde::{Deserialize, Serialize};

use super::now_ms;
use super::workflow::WorkflowState;

/// Immutable snapshot of a workflow at a transition boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique snapshot id
    pub id: String,

    /// Session the workflow belongs to
    #[serde(rename = "session-id")]
    pub session_id: String,

    /// Owning user
    #[serde(rename = "user-id")]
    pub user_id: String,

    /// Step name this snapshot was taken at, e.g. "request-completed"
    pub step: String,

    /// Plan id for context, when known
    #[serde(rename = "plan-id", default)]
    pub plan_id: Option<String>,

    /// The full workflow state at snapshot time
    pub state: WorkflowState,

    /// Creation timestamp (Unix ms)
    #[serde(rename = "created-at")]
    pub created_at: i64,
}

impl Checkpoint {
    /// Snapshot a workflow at a named step
    pub fn capture(state: &WorkflowState, step: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: state.session_id.clone(),
            user_id: state.user_id.clone(),
            step: step.into(),
            plan_id: None,
            state: state.clone(),
            created_at: now_ms(),
        }
    }

    /// Builder method to attach the plan id
    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assistance::{AssistanceRequest, AssistanceType};

    #[test]
    fn test_capture_copies_state() {
        let mut wf = WorkflowState::new("session-1", "user-1");
        wf.requests.push(AssistanceRequest::new(AssistanceType::Captcha, "captcha"));

        let cp = Checkpoint::capture(&wf, "request-enqueued");
        assert_eq!(cp.session_id, "session-1");
        assert_eq!(cp.user_id, "user-1");
        assert_eq!(cp.step, "request-enqueued");
        assert_eq!(cp.state.requests.len(), 1);

        // Mutating the source must not affect the snapshot
        wf.requests.clear();
        assert_eq!(cp.state.requests.len(), 1);
    }

    #[test]
    fn test_restore_ignores_unknown_fields() {
        let wf = WorkflowState::new("session-1", "user-1");
        let cp = Checkpoint::capture(&wf, "step");
        let mut value = serde_json::to_value(&cp).unwrap();
        value["future-field"] = serde_json::json!("from a newer daemon");

        let back: Checkpoint = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, cp.id);
        assert_eq!(back.step, "step");
    }
}
