//! Daemon wiring
//!
//! Owns the scheduler, the submission executor, and one workflow engine per
//! (session, user) pair. Fire signals flow in from the scheduler; barriers
//! flow out as assistance requests; parents get notified when retries run
//! out and the plan says to alert them.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{eyre, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::automation::{AutomationExecutor, OpenProbe};
use crate::clocksync::ClockSync;
use crate::config::Config;
use crate::domain::{AssistanceRequest, AttemptStatus, Priority, RegistrationPlan};
use crate::executor::{ExecutionOutcome, SubmissionExecutor};
use crate::notify::Notifier;
use crate::orchestrator::{WorkflowEngine, WorkflowEvent};
use crate::scheduler::{AttemptScheduler, FireSignal, SchedulerPhase};
use crate::store::{CheckpointStore, PlanStore};
use crate::telemetry::TelemetrySink;

/// Read-model snapshot of one plan, for status displays
#[derive(Debug, Clone, Serialize)]
pub struct PlanStatus {
    pub plan: RegistrationPlan,

    /// Current scheduler phase
    pub phase: SchedulerPhase,

    /// Attempts recorded so far
    pub attempts: usize,

    /// Status of the latest attempt, if any
    #[serde(rename = "last-attempt-status")]
    pub last_attempt_status: Option<AttemptStatus>,

    /// Confirmation id once registered
    #[serde(rename = "confirmation-id")]
    pub confirmation_id: Option<String>,

    /// Assistance queue summary, when a workflow exists for the plan
    pub workflow: Option<WorkflowSummary>,
}

/// Derived workflow counters
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,

    /// Completed percentage of the queue
    pub progress: f64,

    /// Sum of estimates for unprocessed steps, in ms
    #[serde(rename = "time-remaining-ms")]
    pub time_remaining_ms: u64,
}

/// The daemon: scheduler in, execution and assistance out
pub struct Daemon {
    config: Config,
    scheduler: AttemptScheduler,
    executor: SubmissionExecutor,
    plans: Arc<dyn PlanStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    notifier: Arc<dyn Notifier>,
    workflows: Mutex<HashMap<String, WorkflowEngine>>,
    fire_rx: Mutex<mpsc::Receiver<FireSignal>>,
    events_tx: mpsc::UnboundedSender<(String, WorkflowEvent)>,
}

fn workflow_key(session_id: &str, user_id: &str) -> String {
    format!("{session_id}/{user_id}")
}

impl Daemon {
    /// Wire up a daemon from its external interfaces. Workflow events from
    /// every session arrive on the returned receiver, tagged with the
    /// session/user key.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        clock: Arc<dyn ClockSync>,
        probe: Arc<dyn OpenProbe>,
        automation: Arc<dyn AutomationExecutor>,
        plans: Arc<dyn PlanStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        notifier: Arc<dyn Notifier>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> (Self, mpsc::UnboundedReceiver<(String, WorkflowEvent)>) {
        let (scheduler, fire_rx) = AttemptScheduler::new(config.scheduler.clone(), clock, probe);
        let executor = SubmissionExecutor::new(
            automation,
            Arc::clone(&plans),
            telemetry,
            config.retry.policy(),
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        (
            Self {
                config,
                scheduler,
                executor,
                plans,
                checkpoints,
                notifier,
                workflows: Mutex::new(HashMap::new()),
                fire_rx: Mutex::new(fire_rx),
                events_tx,
            },
            events_rx,
        )
    }

    /// Validate, persist, and arm a plan. Fails fast on preflight problems.
    pub async fn register_plan(&self, mut plan: RegistrationPlan) -> Result<String> {
        let problems = plan.preflight();
        if !problems.is_empty() {
            return Err(eyre!("plan failed preflight: {}", problems.join("; ")));
        }

        self.plans.save_plan(&plan).await?;
        self.scheduler.arm(&plan).await?;
        info!(plan_id = %plan.id, session_id = %plan.session_id, "plan registered and armed");
        Ok(plan.id)
    }

    /// Tear down a plan's timer and cancel any attempt still in flight.
    /// The assistance queue is left alone: a pending human step stays
    /// actionable even when the timer goes away.
    pub async fn cancel_plan(&self, plan_id: &str) -> Result<()> {
        let had_timer = self.scheduler.cancel(plan_id).await;

        let attempts = self.plans.load_attempts(plan_id).await?;
        if let Some(mut active) = attempts.into_iter().find(|a| !a.is_terminal()) {
            active.mark_cancelled();
            self.plans.append_attempt(&active).await?;
            info!(plan_id, attempt = active.attempt_number, "in-flight attempt cancelled");
        }

        info!(plan_id, had_timer, "plan cancelled");
        Ok(())
    }

    /// Process fire signals until the scheduler side shuts down
    pub async fn run(&self) -> Result<()> {
        info!("daemon running");
        loop {
            let signal = {
                let mut fire_rx = self.fire_rx.lock().await;
                fire_rx.recv().await
            };
            let Some(signal) = signal else {
                info!("fire channel closed, daemon stopping");
                return Ok(());
            };
            if let Err(e) = self.handle_fire(signal).await {
                warn!(error = %e, "fire handling failed");
            }
        }
    }

    /// Execute one fire signal end to end. A signal that sat in the channel
    /// while its plan was cancelled or re-armed is stale and gets dropped.
    async fn handle_fire(&self, signal: FireSignal) -> Result<()> {
        if !self.scheduler.acknowledge_fire(&signal.plan_id).await {
            debug!(plan_id = %signal.plan_id, "stale fire signal dropped");
            return Ok(());
        }

        let plan = self.plans.load_plan(&signal.plan_id).await?;
        info!(
            plan_id = %plan.id,
            drift_ms = signal.clock.drift_ms,
            synced = signal.clock.synced,
            "fire signal received"
        );

        match self.executor.execute(&plan, signal.clock).await? {
            ExecutionOutcome::Success { confirmation_id, attempts } => {
                let message = format!(
                    "Registered for {} after {attempts} attempt(s). Confirmation: {confirmation_id}",
                    plan.session_id
                );
                self.notify(&plan.user_id, &message, Priority::Medium).await;
            }
            ExecutionOutcome::Blocked { barrier, attempts } => {
                debug!(plan_id = %plan.id, %barrier, attempts, "routing barrier to assistance");
                self.route_barrier(&plan, barrier).await?;
            }
            ExecutionOutcome::Exhausted { attempts, last_error } => {
                self.handle_exhaustion(&plan, attempts, &last_error).await?;
            }
        }
        Ok(())
    }

    /// Turn a human barrier into an assistance request on the plan's workflow
    async fn route_barrier(&self, plan: &RegistrationPlan, barrier: crate::barrier::Barrier) -> Result<()> {
        let stage = format!("Resolve {barrier} for {}", plan.session_id);
        let Some(request) = AssistanceRequest::from_barrier(barrier, stage) else {
            warn!(plan_id = %plan.id, %barrier, "barrier needs no human step, nothing to route");
            return Ok(());
        };

        use std::collections::hash_map::Entry;

        let engine = {
            let mut workflows = self.workflows.lock().await;
            let key = workflow_key(&plan.session_id, &plan.user_id);
            match workflows.entry(key) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => entry
                    .insert(self.spawn_workflow(&plan.session_id, &plan.user_id, &plan.id))
                    .clone(),
            }
        };
        engine.enqueue(request).await?;
        Ok(())
    }

    /// Apply the plan's fallback strategy once retries run out
    async fn handle_exhaustion(
        &self,
        plan: &RegistrationPlan,
        attempts: u32,
        last_error: &str,
    ) -> Result<()> {
        use crate::domain::FallbackStrategy;

        match plan.fallback_strategy {
            FallbackStrategy::AlertParent => {
                let message = format!(
                    "Registration for {} failed after {attempts} attempt(s): {last_error}",
                    plan.session_id
                );
                self.notify(&plan.user_id, &message, Priority::High).await;
            }
            FallbackStrategy::KeepTrying => {
                // Re-arm so the polling cadence picks the plan back up
                info!(plan_id = %plan.id, "retries exhausted, re-arming per fallback strategy");
                self.scheduler.arm(plan).await?;
            }
        }
        Ok(())
    }

    /// Build a workflow engine and forward its events onto the daemon stream
    fn spawn_workflow(&self, session_id: &str, user_id: &str, plan_id: &str) -> WorkflowEngine {
        let (engine, mut engine_rx) = WorkflowEngine::new(
            session_id,
            user_id,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.notifier),
        );
        let engine = engine
            .with_plan_id(plan_id)
            .with_base_retry_delay_ms(self.config.retry.assist_base_delay_ms);

        let key = workflow_key(session_id, user_id);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let _ = events_tx.send((key.clone(), event));
            }
        });

        engine
    }

    /// Restore a workflow from its latest checkpoint, replacing any live
    /// engine for the pair. The restored engine comes back paused.
    pub async fn restore_workflow(&self, session_id: &str, user_id: &str) -> Result<bool> {
        let (engine, mut engine_rx, restored) = WorkflowEngine::restore(
            session_id,
            user_id,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.notifier),
        )
        .await?;

        let key = workflow_key(session_id, user_id);
        let events_tx = self.events_tx.clone();
        let forward_key = key.clone();
        tokio::spawn(async move {
            while let Some(event) = engine_rx.recv().await {
                let _ = events_tx.send((forward_key.clone(), event));
            }
        });

        self.workflows.lock().await.insert(key, engine);
        Ok(restored)
    }

    /// Complete the active assistance step for a session's workflow
    pub async fn complete_assistance(
        &self,
        session_id: &str,
        user_id: &str,
        response: Value,
    ) -> Result<()> {
        let engine = self.workflow(session_id, user_id).await?;
        engine.complete_current(response).await?;
        Ok(())
    }

    /// Fail the active assistance step
    pub async fn fail_assistance(
        &self,
        session_id: &str,
        user_id: &str,
        error: String,
    ) -> Result<()> {
        let engine = self.workflow(session_id, user_id).await?;
        engine.fail_current(error).await?;
        Ok(())
    }

    /// Pause a session's workflow
    pub async fn pause_workflow(&self, session_id: &str, user_id: &str) -> Result<()> {
        let engine = self.workflow(session_id, user_id).await?;
        engine.pause().await?;
        Ok(())
    }

    /// Resume a session's workflow
    pub async fn resume_workflow(&self, session_id: &str, user_id: &str) -> Result<()> {
        let engine = self.workflow(session_id, user_id).await?;
        engine.resume().await?;
        Ok(())
    }

    /// Put a terminally-failed assistance request back in the queue
    pub async fn retry_assistance(
        &self,
        session_id: &str,
        user_id: &str,
        request_id: &str,
    ) -> Result<bool> {
        let engine = self.workflow(session_id, user_id).await?;
        Ok(engine.retry_failed(request_id).await?)
    }

    async fn workflow(&self, session_id: &str, user_id: &str) -> Result<WorkflowEngine> {
        self.workflows
            .lock()
            .await
            .get(&workflow_key(session_id, user_id))
            .cloned()
            .ok_or_else(|| eyre!("no workflow for session {session_id} user {user_id}"))
    }

    /// Snapshot one plan for status display
    pub async fn plan_status(&self, plan_id: &str) -> Result<PlanStatus> {
        let plan = self.plans.load_plan(plan_id).await?;
        let phase = self.scheduler.phase(plan_id).await;
        let attempts = self.plans.load_attempts(plan_id).await?;

        let last = attempts.last();
        let confirmation_id = attempts
            .iter()
            .find_map(|a| a.confirmation_id.clone());

        let engine = {
            let workflows = self.workflows.lock().await;
            workflows
                .get(&workflow_key(&plan.session_id, &plan.user_id))
                .cloned()
        };
        let workflow = match engine {
            Some(engine) => {
                let state = engine.state().await;
                let (queued, active, completed, failed) = state.counts();
                Some(WorkflowSummary {
                    queued,
                    active,
                    completed,
                    failed,
                    progress: state.overall_progress(),
                    time_remaining_ms: state.estimated_time_remaining_ms(),
                })
            }
            None => None,
        };

        Ok(PlanStatus {
            phase,
            attempts: attempts.len(),
            last_attempt_status: last.map(|a| a.status),
            confirmation_id,
            workflow,
            plan,
        })
    }

    /// Plan ids with a live timer
    pub async fn armed_plans(&self) -> Vec<String> {
        self.scheduler.armed_plans().await
    }

    /// Notification failures are logged, never propagated
    async fn notify(&self, user_id: &str, message: &str, priority: Priority) {
        if let Err(e) = self.notifier.notify(user_id, message, priority).await {
            warn!(user_id, error = %e, "notification failed");
        }
    }
}
