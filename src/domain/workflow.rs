//! WorkflowState aggregate
//!
//! Ordered queue of assistance requests for one (session, user) pair.
//! Progress and time-remaining are derived from the queue on every read,
//! never stored alongside it.

use serde::{Deserialize, Serialize};

use super::assistance::{AssistanceRequest, AssistanceStatus};

/// Aggregate state for one assistance workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Provider session this workflow belongs to
    #[serde(rename = "session-id")]
    pub session_id: String,

    /// Owning user
    #[serde(rename = "user-id")]
    pub user_id: String,

    /// Ordered request queue (FIFO by insertion)
    pub requests: Vec<AssistanceRequest>,

    /// Index of the active request, -1 when none
    #[serde(rename = "active-index")]
    pub active_index: i32,

    /// Whether the workflow is processing (pause flips this off)
    pub processing: bool,

    /// Whether auto-advance may start the next queued request
    #[serde(rename = "can-auto-resume")]
    pub can_auto_resume: bool,
}

impl WorkflowState {
    /// Create an empty workflow for a (session, user) pair
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            requests: Vec::new(),
            active_index: -1,
            processing: true,
            can_auto_resume: true,
        }
    }

    /// The currently active request, if any
    pub fn active(&self) -> Option<&AssistanceRequest> {
        usize::try_from(self.active_index).ok().and_then(|i| self.requests.get(i))
    }

    /// Mutable access to the active request
    pub fn active_mut(&mut self) -> Option<&mut AssistanceRequest> {
        usize::try_from(self.active_index)
            .ok()
            .and_then(|i| self.requests.get_mut(i))
    }

    /// Index of the first queued request, but only once its retry gate has
    /// passed. A gated head holds the whole queue: later requests never
    /// start ahead of it.
    pub fn first_ready(&self, now: i64) -> Option<usize> {
        let index = self
            .requests
            .iter()
            .position(|r| r.status == AssistanceStatus::Queued)?;
        self.requests[index].retry_window_open(now).then_some(index)
    }

    /// Whether any request is queued or active
    pub fn has_pending(&self) -> bool {
        self.requests
            .iter()
            .any(|r| matches!(r.status, AssistanceStatus::Queued | AssistanceStatus::Active))
    }

    /// Completed fraction of the queue as a percentage, derived on read
    pub fn overall_progress(&self) -> f64 {
        if self.requests.is_empty() {
            return 0.0;
        }
        let completed = self
            .requests
            .iter()
            .filter(|r| r.status == AssistanceStatus::Completed)
            .count();
        (completed as f64 / self.requests.len() as f64) * 100.0
    }

    /// Sum of estimated durations of unprocessed requests, derived on read
    pub fn estimated_time_remaining_ms(&self) -> u64 {
        self.requests
            .iter()
            .filter(|r| !matches!(r.status, AssistanceStatus::Completed | AssistanceStatus::Failed))
            .map(|r| r.estimated_duration_ms)
            .sum()
    }

    /// Count of requests in each lifecycle bucket, for status displays
    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut queued = 0;
        let mut active = 0;
        let mut completed = 0;
        let mut failed = 0;
        for r in &self.requests {
            match r.status {
                AssistanceStatus::Queued | AssistanceStatus::Paused => queued += 1,
                AssistanceStatus::Active => active += 1,
                AssistanceStatus::Completed => completed += 1,
                AssistanceStatus::Failed => failed += 1,
            }
        }
        (queued, active, completed, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::assistance::AssistanceType;
    use crate::domain::now_ms;

    fn workflow_with(requests: Vec<AssistanceRequest>) -> WorkflowState {
        let mut wf = WorkflowState::new("session-1", "user-1");
        wf.requests = requests;
        wf
    }

    #[test]
    fn test_empty_workflow() {
        let wf = WorkflowState::new("session-1", "user-1");
        assert!(wf.active().is_none());
        assert_eq!(wf.overall_progress(), 0.0);
        assert_eq!(wf.estimated_time_remaining_ms(), 0);
        assert!(!wf.has_pending());
    }

    #[test]
    fn test_progress_is_derived() {
        let mut a = AssistanceRequest::new(AssistanceType::Captcha, "captcha");
        a.status = AssistanceStatus::Completed;
        let b = AssistanceRequest::new(AssistanceType::Payment, "payment");

        let wf = workflow_with(vec![a, b]);
        assert_eq!(wf.overall_progress(), 50.0);
    }

    #[test]
    fn test_time_remaining_excludes_terminal() {
        let mut a = AssistanceRequest::new(AssistanceType::Captcha, "captcha")
            .with_estimated_duration_ms(60_000);
        a.status = AssistanceStatus::Completed;
        let b = AssistanceRequest::new(AssistanceType::Payment, "payment")
            .with_estimated_duration_ms(90_000);
        let mut c = AssistanceRequest::new(AssistanceType::FormCompletion, "form")
            .with_estimated_duration_ms(30_000);
        c.status = AssistanceStatus::Failed;

        let wf = workflow_with(vec![a, b, c]);
        assert_eq!(wf.estimated_time_remaining_ms(), 90_000);
    }

    #[test]
    fn test_first_ready_is_fifo_past_completed_requests() {
        let mut a = AssistanceRequest::new(AssistanceType::Captcha, "captcha");
        a.status = AssistanceStatus::Completed;
        let b = AssistanceRequest::new(AssistanceType::Payment, "payment");
        let c = AssistanceRequest::new(AssistanceType::FormCompletion, "form");

        let wf = workflow_with(vec![a, b, c]);
        assert_eq!(wf.first_ready(now_ms()), Some(1));
    }

    #[test]
    fn test_gated_head_holds_the_whole_queue() {
        let mut a = AssistanceRequest::new(AssistanceType::Payment, "payment");
        a.retry_not_before = Some(now_ms() + 60_000);
        let b = AssistanceRequest::new(AssistanceType::FormCompletion, "form");

        // The later request never jumps ahead of the gated head
        let wf = workflow_with(vec![a.clone(), b.clone()]);
        assert_eq!(wf.first_ready(now_ms()), None);

        // Once the gate passes, the head goes first
        a.retry_not_before = Some(now_ms() - 1);
        let wf = workflow_with(vec![a, b]);
        assert_eq!(wf.first_ready(now_ms()), Some(0));
    }

    #[test]
    fn test_active_index_none() {
        let wf = workflow_with(vec![AssistanceRequest::new(AssistanceType::Captcha, "captcha")]);
        assert_eq!(wf.active_index, -1);
        assert!(wf.active().is_none());
    }

    #[test]
    fn test_serde_roundtrip_preserves_queue_and_index() {
        let mut wf = workflow_with(vec![
            AssistanceRequest::new(AssistanceType::Captcha, "captcha"),
            AssistanceRequest::new(AssistanceType::Payment, "payment"),
        ]);
        wf.requests[0].status = AssistanceStatus::Active;
        wf.active_index = 0;

        let json = serde_json::to_string(&wf).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.active_index, 0);
        assert_eq!(back.requests.len(), 2);
        assert_eq!(back.overall_progress(), wf.overall_progress());
    }
}
