//! Workflow engine
//!
//! Sequences human-assistance requests for one (session, user) pair: FIFO
//! queue, at most one active request, a checkpoint at every transition, and
//! automatic advancement after each mutating operation. A re-queued
//! auto-resumable step arms a wake timer for its retry gate, so the queue
//! moves again without any operator call. Observers watch the event
//! channel; nothing in here blocks on a consumer.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::domain::{now_ms, AssistanceRequest, AssistanceStatus, Checkpoint, WorkflowState};
use crate::notify::Notifier;
use crate::retry::RetryPolicy;
use crate::store::{CheckpointStore, StoreError};

use super::events::WorkflowEvent;

/// Sequences one workflow's assistance queue. Clones share the same queue,
/// which is what lets wake timers advance it later.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    core: Mutex<EngineCore>,
    store: Arc<dyn CheckpointStore>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<WorkflowEvent>,
}

/// Everything an operation mutates, behind one lock so a wake timer and an
/// operator call never interleave mid-transition
struct EngineCore {
    state: WorkflowState,
    plan_id: Option<String>,
    base_retry_delay_ms: u64,
}

impl WorkflowEngine {
    /// Create a fresh engine for a (session, user) pair. Events for every
    /// transition arrive on the returned receiver.
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Arc::new(EngineInner {
                    core: Mutex::new(EngineCore {
                        state: WorkflowState::new(session_id, user_id),
                        plan_id: None,
                        base_retry_delay_ms: 1_000,
                    }),
                    store,
                    notifier,
                    policy: RetryPolicy::default(),
                    events,
                }),
            },
            events_rx,
        )
    }

    /// Restore from the latest checkpoint, or start fresh when none exists.
    ///
    /// A restored workflow comes back with processing off: after a restart
    /// nothing auto-advances until the owner explicitly resumes. Returns
    /// whether a checkpoint was found.
    pub async fn restore(
        session_id: &str,
        user_id: &str,
        store: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkflowEvent>, bool), StoreError> {
        let checkpoint = store.load_latest_checkpoint(session_id, user_id).await?;
        let (engine, events_rx) = Self::new(session_id, user_id, store, notifier);

        let restored = match checkpoint {
            Some(cp) => {
                info!(session_id, user_id, step = %cp.step, "workflow restored from checkpoint");
                {
                    let mut core = engine.inner.core.lock().await;
                    core.state = cp.state;
                    core.state.processing = false;
                    core.plan_id = cp.plan_id;
                }
                engine.publish(WorkflowEvent::CheckpointRestored { step: cp.step });
                true
            }
            None => {
                debug!(session_id, user_id, "no checkpoint, starting fresh");
                false
            }
        };

        Ok((engine, events_rx, restored))
    }

    /// Attach the plan id recorded alongside checkpoints. Applies only
    /// before the engine is cloned.
    pub fn with_plan_id(mut self, plan_id: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.core.get_mut().plan_id = Some(plan_id.into());
        }
        self
    }

    /// Set the base delay used when an auto-resumable step re-queues.
    /// Applies only before the engine is cloned.
    pub fn with_base_retry_delay_ms(mut self, ms: u64) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.core.get_mut().base_retry_delay_ms = ms;
        }
        self
    }

    /// Snapshot of the workflow state
    pub async fn state(&self) -> WorkflowState {
        self.inner.core.lock().await.state.clone()
    }

    /// Add a request to the back of the queue and advance if idle
    pub async fn enqueue(&self, request: AssistanceRequest) -> Result<String, StoreError> {
        let request_id = request.id.clone();
        info!(
            request_id = %request_id,
            assistance_type = %request.assistance_type,
            stage = %request.stage,
            "assistance request enqueued"
        );

        let mut core = self.inner.core.lock().await;
        self.publish(WorkflowEvent::RequestEnqueued {
            request_id: request_id.clone(),
            assistance_type: request.assistance_type,
        });
        core.state.requests.push(request);

        self.checkpoint_locked(&core, "request-enqueued").await?;
        self.advance_locked(&mut core).await?;
        Ok(request_id)
    }

    /// Complete the active request with the human's response
    pub async fn complete_current(&self, response: Value) -> Result<(), StoreError> {
        let mut core = self.inner.core.lock().await;
        let Some(active) = core.state.active_mut() else {
            warn!("complete_current called with no active request");
            return Ok(());
        };

        active.complete(response.clone());
        let request_id = active.id.clone();
        info!(request_id = %request_id, "assistance request completed");

        core.state.active_index = -1;
        self.publish(WorkflowEvent::RequestCompleted { request_id, response });

        self.checkpoint_locked(&core, "request-completed").await?;
        self.advance_locked(&mut core).await?;

        if !core.state.has_pending() {
            info!(session_id = %core.state.session_id, "assistance workflow complete");
            self.publish(WorkflowEvent::WorkflowCompleted);
        }
        Ok(())
    }

    /// Fail the active request. An auto-resumable step re-queues behind a
    /// delay gate until its failures reach the retry budget; the failure
    /// that spends the budget is terminal, as is any failure of a step a
    /// human must redo.
    pub async fn fail_current(&self, error: impl Into<String>) -> Result<(), StoreError> {
        let error = error.into();
        let mut core = self.inner.core.lock().await;
        let base_delay = core.base_retry_delay_ms;

        let (request_id, wake_after) = {
            let Some(active) = core.state.active_mut() else {
                warn!("fail_current called with no active request");
                return Ok(());
            };
            let request_id = active.id.clone();
            let failures = active.retry_count + 1;

            if active.auto_resumable && failures < active.max_retries {
                let delay = self.inner.policy.delay_for(failures, base_delay);
                active.requeue_after(delay, error.clone());
                info!(
                    request_id = %request_id,
                    retry_count = active.retry_count,
                    delay_ms = delay,
                    "assistance step re-queued for auto-retry"
                );
                (request_id, Some(delay))
            } else {
                let budget_spent = active.auto_resumable;
                if budget_spent {
                    // The terminal failure still counts against the budget
                    active.retry_count = failures;
                }
                active.fail(error.clone());
                info!(request_id = %request_id, error = %error, "assistance request failed");
                if budget_spent {
                    // Auto-retry budget ran out; a human must re-open the gate
                    core.state.can_auto_resume = false;
                }
                (request_id, None)
            }
        };

        core.state.active_index = -1;
        self.publish(WorkflowEvent::RequestFailed {
            request_id,
            error,
            will_retry: wake_after.is_some(),
        });

        self.checkpoint_locked(&core, "request-failed").await?;
        self.advance_locked(&mut core).await?;
        drop(core);

        if let Some(delay) = wake_after {
            self.spawn_retry_wake(delay);
        }
        Ok(())
    }

    /// Stop processing; the active request is parked as paused
    pub async fn pause(&self) -> Result<(), StoreError> {
        let mut core = self.inner.core.lock().await;
        if !core.state.processing {
            return Ok(());
        }
        core.state.processing = false;
        if let Some(active) = core.state.active_mut() {
            active.status = AssistanceStatus::Paused;
        }

        info!(session_id = %core.state.session_id, "workflow paused");
        self.publish(WorkflowEvent::WorkflowPaused);
        self.checkpoint_locked(&core, "workflow-paused").await
    }

    /// Resume processing; a parked request becomes active again
    pub async fn resume(&self) -> Result<(), StoreError> {
        let mut core = self.inner.core.lock().await;
        if core.state.processing {
            return Ok(());
        }
        core.state.processing = true;
        core.state.can_auto_resume = true;
        if let Some(active) = core.state.active_mut() {
            if active.status == AssistanceStatus::Paused {
                active.status = AssistanceStatus::Active;
            }
        }

        info!(session_id = %core.state.session_id, "workflow resumed");
        self.publish(WorkflowEvent::WorkflowResumed);
        self.checkpoint_locked(&core, "workflow-resumed").await?;
        self.advance_locked(&mut core).await
    }

    /// Put a terminally-failed request back in the queue (explicit human
    /// retry) and advance if idle
    pub async fn retry_failed(&self, request_id: &str) -> Result<bool, StoreError> {
        let mut core = self.inner.core.lock().await;
        let Some(request) = core
            .state
            .requests
            .iter_mut()
            .find(|r| r.id == request_id && r.status == AssistanceStatus::Failed)
        else {
            return Ok(false);
        };

        request.reset_for_retry();
        // An explicit human retry re-opens the auto-advance gate
        core.state.can_auto_resume = true;
        info!(request_id, "failed request reset for retry");

        self.checkpoint_locked(&core, "request-retried").await?;
        self.advance_locked(&mut core).await?;
        Ok(true)
    }

    /// Start the next eligible request when the workflow is idle. Runs
    /// after every mutating operation and from retry wake timers; exposed
    /// so an owner can nudge the queue directly.
    pub async fn start_next(&self) -> Result<(), StoreError> {
        let mut core = self.inner.core.lock().await;
        self.advance_locked(&mut core).await
    }

    /// Snapshot the workflow at a named step
    pub async fn save_checkpoint(&self, step: &str) -> Result<(), StoreError> {
        let core = self.inner.core.lock().await;
        self.checkpoint_locked(&core, step).await
    }

    /// Wake the queue once a retry gate passes, so a re-queued step starts
    /// again without an operator call
    fn spawn_retry_wake(&self, delay_ms: u64) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(e) = engine.start_next().await {
                warn!(error = %e, "retry wake could not advance the queue");
            }
        });
    }

    /// Start the first queued request when the workflow is processing and
    /// nothing is active. A head whose retry gate is still closed holds
    /// the queue; its wake timer tries again when the gate passes.
    async fn advance_locked(&self, core: &mut EngineCore) -> Result<(), StoreError> {
        if !core.state.processing || !core.state.can_auto_resume || core.state.active().is_some() {
            return Ok(());
        }

        let Some(index) = core.state.first_ready(now_ms()) else {
            return Ok(());
        };

        core.state.active_index = index as i32;
        let (request_id, stage, needs_parent, priority) = {
            let request = &mut core.state.requests[index];
            request.status = AssistanceStatus::Active;
            (
                request.id.clone(),
                request.stage.clone(),
                request.requires_parent_intervention,
                request.priority,
            )
        };

        info!(request_id = %request_id, stage = %stage, "assistance request started");
        self.publish(WorkflowEvent::RequestStarted {
            request_id,
            stage: stage.clone(),
        });

        if needs_parent {
            let message = format!("Registration needs your help: {stage}");
            if let Err(e) = self
                .inner
                .notifier
                .notify(&core.state.user_id, &message, priority)
                .await
            {
                // Notification failures never stall the queue
                warn!(error = %e, "parent notification failed");
            }
        }

        self.checkpoint_locked(core, "request-started").await
    }

    async fn checkpoint_locked(&self, core: &EngineCore, step: &str) -> Result<(), StoreError> {
        let mut checkpoint = Checkpoint::capture(&core.state, step);
        if let Some(plan_id) = &core.plan_id {
            checkpoint = checkpoint.with_plan_id(plan_id.clone());
        }
        self.inner.store.save_checkpoint(&checkpoint).await?;
        self.publish(WorkflowEvent::CheckpointSaved {
            step: step.to_string(),
        });
        Ok(())
    }

    /// Event publishing never blocks; a closed receiver just drops events
    fn publish(&self, event: WorkflowEvent) {
        let _ = self.inner.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AssistanceType;
    use crate::notify::LogNotifier;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn request(assistance_type: AssistanceType, stage: &str) -> AssistanceRequest {
        AssistanceRequest::new(assistance_type, stage)
    }

    async fn engine() -> (
        WorkflowEngine,
        mpsc::UnboundedReceiver<WorkflowEvent>,
        Arc<MemoryStore>,
    ) {
        let store = Arc::new(MemoryStore::new());
        let (engine, rx) = WorkflowEngine::new(
            "session-1",
            "user-1",
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            Arc::new(LogNotifier),
        );
        (engine, rx, store)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_enqueue_auto_starts_first_request() {
        let (engine, mut rx, _) = engine().await;
        let id = engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();

        let state = engine.state().await;
        let active = state.active().unwrap();
        assert_eq!(active.id, id);
        assert_eq!(active.status, AssistanceStatus::Active);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::RequestEnqueued { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::RequestStarted { .. })));
    }

    #[tokio::test]
    async fn test_fifo_and_at_most_one_active() {
        let (engine, _rx, _) = engine().await;
        let first = engine
            .enqueue(request(AssistanceType::AccountCreation, "account"))
            .await
            .unwrap();
        let second = engine
            .enqueue(request(AssistanceType::Payment, "payment"))
            .await
            .unwrap();

        // Second enqueue must not displace the active first request
        let state = engine.state().await;
        assert_eq!(state.active().unwrap().id, first);
        let (_, active, _, _) = state.counts();
        assert_eq!(active, 1);

        engine.complete_current(json!({"ok": true})).await.unwrap();
        assert_eq!(engine.state().await.active().unwrap().id, second);
    }

    #[tokio::test]
    async fn test_complete_last_request_finishes_workflow() {
        let (engine, mut rx, _) = engine().await;
        engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine.complete_current(json!("token")).await.unwrap();

        let state = engine.state().await;
        assert!(!state.has_pending());
        assert_eq!(state.overall_progress(), 100.0);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::WorkflowCompleted)));
    }

    #[tokio::test]
    async fn test_fail_non_resumable_is_terminal() {
        let (engine, mut rx, _) = engine().await;
        engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine.fail_current("parent gave up").await.unwrap();

        assert_eq!(
            engine.state().await.requests[0].status,
            AssistanceStatus::Failed
        );
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::RequestFailed { will_retry: false, .. }
        )));
    }

    #[tokio::test]
    async fn test_fail_auto_resumable_requeues_with_gate() {
        let (engine, mut rx, _) = engine().await;
        engine
            .enqueue(request(AssistanceType::FormCompletion, "form").with_auto_resumable(true))
            .await
            .unwrap();
        engine.fail_current("network blip").await.unwrap();

        let state = engine.state().await;
        let req = &state.requests[0];
        assert_eq!(req.status, AssistanceStatus::Queued);
        assert_eq!(req.retry_count, 1);
        assert!(req.retry_not_before.is_some());

        // The retry gate keeps the step from restarting immediately
        assert!(state.active().is_none());
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkflowEvent::RequestFailed { will_retry: true, .. }
        )));
    }

    #[tokio::test]
    async fn test_retry_gate_wakes_queue_on_its_own() {
        let (engine, _rx, _) = engine().await;
        let engine = engine.with_base_retry_delay_ms(20);
        engine
            .enqueue(request(AssistanceType::FormCompletion, "form").with_auto_resumable(true))
            .await
            .unwrap();
        engine.fail_current("blip").await.unwrap();

        let state = engine.state().await;
        assert_eq!(state.requests[0].status, AssistanceStatus::Queued);
        assert!(state.active().is_none());

        // No further calls: the wake timer alone restarts the step
        tokio::time::sleep(Duration::from_millis(200)).await;
        let state = engine.state().await;
        assert_eq!(state.requests[0].status, AssistanceStatus::Active);
        assert_eq!(state.requests[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_later_request_waits_behind_gated_head() {
        // Default base delay keeps the head's gate closed for this test
        let (engine, _rx, _) = engine().await;
        engine
            .enqueue(request(AssistanceType::FormCompletion, "form").with_auto_resumable(true))
            .await
            .unwrap();
        engine.fail_current("blip").await.unwrap();

        // Work enqueued behind the gated head must not start out of order
        engine
            .enqueue(request(AssistanceType::Payment, "payment"))
            .await
            .unwrap();
        let state = engine.state().await;
        assert!(state.active().is_none());
        assert_eq!(state.requests[1].status, AssistanceStatus::Queued);
    }

    #[tokio::test]
    async fn test_third_failure_spends_auto_retry_budget() {
        let (engine, _rx, _) = engine().await;
        let engine = engine.with_base_retry_delay_ms(10);
        engine
            .enqueue(request(AssistanceType::FormCompletion, "form").with_auto_resumable(true))
            .await
            .unwrap();

        for expected_count in 1..=2 {
            engine.fail_current("blip").await.unwrap();
            let state = engine.state().await;
            assert_eq!(state.requests[0].status, AssistanceStatus::Queued);
            assert_eq!(state.requests[0].retry_count, expected_count);

            // Wait out the gate; the wake timer restarts the step
            tokio::time::sleep(Duration::from_millis(200)).await;
            let state = engine.state().await;
            assert_eq!(state.requests[0].status, AssistanceStatus::Active);
        }

        // Third failure is terminal with the full budget recorded
        engine.fail_current("blip").await.unwrap();
        let state = engine.state().await;
        assert_eq!(state.requests[0].status, AssistanceStatus::Failed);
        assert_eq!(state.requests[0].retry_count, 3);
        assert!(!state.can_auto_resume);
    }

    #[tokio::test]
    async fn test_pause_parks_active_and_blocks_advance() {
        let (engine, _rx, _) = engine().await;
        engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine.pause().await.unwrap();

        let state = engine.state().await;
        assert!(!state.processing);
        assert_eq!(state.requests[0].status, AssistanceStatus::Paused);

        // New work queues but does not start while paused
        engine
            .enqueue(request(AssistanceType::Payment, "payment"))
            .await
            .unwrap();
        assert_eq!(
            engine.state().await.requests[1].status,
            AssistanceStatus::Queued
        );

        engine.resume().await.unwrap();
        assert_eq!(
            engine.state().await.requests[0].status,
            AssistanceStatus::Active
        );
    }

    #[tokio::test]
    async fn test_manual_retry_of_failed_request() {
        let (engine, _rx, _) = engine().await;
        let id = engine
            .enqueue(request(AssistanceType::Payment, "payment"))
            .await
            .unwrap();
        engine.fail_current("card declined").await.unwrap();
        assert_eq!(
            engine.state().await.requests[0].status,
            AssistanceStatus::Failed
        );

        assert!(engine.retry_failed(&id).await.unwrap());
        assert_eq!(
            engine.state().await.requests[0].status,
            AssistanceStatus::Active
        );

        assert!(!engine.retry_failed("no-such-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_at_every_transition() {
        let (engine, _rx, store) = engine().await;
        engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine.complete_current(json!("token")).await.unwrap();

        let latest = store
            .load_latest_checkpoint("session-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, "request-completed");
        assert_eq!(latest.state.requests.len(), 1);
    }

    #[tokio::test]
    async fn test_save_checkpoint_at_named_step() {
        let (engine, _rx, store) = engine().await;
        engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine.save_checkpoint("operator-snapshot").await.unwrap();

        let latest = store
            .load_latest_checkpoint("session-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, "operator-snapshot");
    }

    #[tokio::test]
    async fn test_start_next_is_idempotent_when_active() {
        let (engine, _rx, _) = engine().await;
        let first = engine
            .enqueue(request(AssistanceType::Captcha, "captcha"))
            .await
            .unwrap();
        engine
            .enqueue(request(AssistanceType::Payment, "payment"))
            .await
            .unwrap();

        // A direct nudge never displaces the active request
        engine.start_next().await.unwrap();
        let state = engine.state().await;
        assert_eq!(state.active().unwrap().id, first);
        let (_, active, _, _) = state.counts();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn test_restore_comes_back_paused() {
        let store = Arc::new(MemoryStore::new());
        {
            let (engine, _rx) = WorkflowEngine::new(
                "session-1",
                "user-1",
                Arc::clone(&store) as Arc<dyn CheckpointStore>,
                Arc::new(LogNotifier),
            );
            engine
                .enqueue(request(AssistanceType::Payment, "payment"))
                .await
                .unwrap();
        }

        let (engine, mut rx, restored) = WorkflowEngine::restore(
            "session-1",
            "user-1",
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            Arc::new(LogNotifier),
        )
        .await
        .unwrap();

        assert!(restored);
        let state = engine.state().await;
        assert!(!state.processing);
        assert_eq!(state.requests.len(), 1);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::CheckpointRestored { .. })));
    }

    #[tokio::test]
    async fn test_restore_without_checkpoint_starts_fresh() {
        let store = Arc::new(MemoryStore::new());
        let (engine, _rx, restored) = WorkflowEngine::restore(
            "session-x",
            "user-x",
            store as Arc<dyn CheckpointStore>,
            Arc::new(LogNotifier),
        )
        .await
        .unwrap();

        assert!(!restored);
        assert!(engine.state().await.requests.is_empty());
    }
}
