//! Submission execution
//!
//! Runs the attempt loop for one plan after its fire signal arrives:
//! preconnect, submit with an idempotency nonce, interpret the outcome, and
//! either finish, hand a barrier to the assistance workflow, or back off and
//! retry. Every attempt leaves a terminal record and one telemetry event.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::automation::AutomationExecutor;
use crate::barrier::{classify, Barrier};
use crate::clocksync::ClockSample;
use crate::domain::{now_ms, AttemptRecord, AttemptStatus, RegistrationPlan};
use crate::retry::{FailureClass, RetryPolicy};
use crate::store::{PlanStore, StoreError};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Final result of one fire-signal execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Registration confirmed
    Success {
        confirmation_id: String,
        attempts: u32,
    },
    /// A barrier needing a human stopped the run
    Blocked { barrier: Barrier, attempts: u32 },
    /// Retries ran out without a confirmation
    Exhausted { attempts: u32, last_error: String },
}

/// Drives the attempt loop against the automation layer
pub struct SubmissionExecutor {
    automation: Arc<dyn AutomationExecutor>,
    store: Arc<dyn PlanStore>,
    telemetry: Arc<dyn TelemetrySink>,
    policy: RetryPolicy,
}

impl SubmissionExecutor {
    pub fn new(
        automation: Arc<dyn AutomationExecutor>,
        store: Arc<dyn PlanStore>,
        telemetry: Arc<dyn TelemetrySink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            automation,
            store,
            telemetry,
            policy,
        }
    }

    /// Run attempts for `plan` until success, a human barrier, or exhaustion.
    ///
    /// Attempt numbers continue from the plan's recorded history, so a plan
    /// re-fired after a restart does not reuse numbers. Store failures abort
    /// the run; automation failures feed the retry policy instead.
    pub async fn execute(
        &self,
        plan: &RegistrationPlan,
        clock: ClockSample,
    ) -> Result<ExecutionOutcome, StoreError> {
        let history = self.store.load_attempts(&plan.id).await?;
        let mut attempt_number = history.iter().map(|a| a.attempt_number).max().unwrap_or(0);
        let mut attempts_this_run = 0u32;
        let mut last_error = String::from("no attempts were made");

        loop {
            attempt_number += 1;
            attempts_this_run += 1;

            let (record, failure) = self.run_attempt(plan, attempt_number, clock).await?;
            self.emit_telemetry(&record).await;

            match record.status {
                AttemptStatus::Success => {
                    let confirmation_id = record.confirmation_id.unwrap_or_default();
                    info!(
                        plan_id = %plan.id,
                        attempt = attempt_number,
                        confirmation_id = %confirmation_id,
                        "registration confirmed"
                    );
                    return Ok(ExecutionOutcome::Success {
                        confirmation_id,
                        attempts: attempts_this_run,
                    });
                }
                AttemptStatus::Blocked if record.barrier.needs_human() => {
                    info!(
                        plan_id = %plan.id,
                        attempt = attempt_number,
                        barrier = %record.barrier,
                        "attempt blocked, handing off to assistance"
                    );
                    return Ok(ExecutionOutcome::Blocked {
                        barrier: record.barrier,
                        attempts: attempts_this_run,
                    });
                }
                _ => {
                    if let Some(error) = &record.error {
                        last_error = error.clone();
                    } else {
                        last_error = format!("barrier: {}", record.barrier);
                    }

                    let Some(failure) = failure else {
                        info!(
                            plan_id = %plan.id,
                            attempts = attempts_this_run,
                            last_error = %last_error,
                            "attempt failed without a retry path"
                        );
                        return Ok(ExecutionOutcome::Exhausted {
                            attempts: attempts_this_run,
                            last_error,
                        });
                    };

                    let decision = self.policy.decide(
                        attempts_this_run,
                        failure,
                        plan.retry_attempts,
                        plan.retry_delay_ms,
                    );
                    if !decision.retry {
                        info!(
                            plan_id = %plan.id,
                            attempts = attempts_this_run,
                            last_error = %last_error,
                            "retries exhausted"
                        );
                        return Ok(ExecutionOutcome::Exhausted {
                            attempts: attempts_this_run,
                            last_error,
                        });
                    }

                    info!(
                        plan_id = %plan.id,
                        attempt = attempt_number,
                        delay_ms = decision.delay_ms,
                        "backing off before retry"
                    );
                    tokio::time::sleep(Duration::from_millis(decision.delay_ms)).await;
                }
            }
        }
    }

    /// Run a single attempt through to its terminal record.
    ///
    /// The returned failure class is the retry-policy input; `None` means
    /// the record's status already decided the outcome (success, a human
    /// barrier, or a rejection that must not be retried).
    async fn run_attempt(
        &self,
        plan: &RegistrationPlan,
        attempt_number: u32,
        clock: ClockSample,
    ) -> Result<(AttemptRecord, Option<FailureClass>), StoreError> {
        let mut record = AttemptRecord::new(&plan.id, attempt_number);
        record.drift_ms = Some(clock.drift_ms);
        record.latency_ms = Some(clock.latency_ms);
        record.synced = clock.synced;
        self.store.append_attempt(&record).await?;

        record.status = AttemptStatus::Preconnect;
        self.store.append_attempt(&record).await?;
        if let Err(e) = self.automation.preconnect(plan).await {
            // Preconnect is best-effort; a cold connection just costs latency
            warn!(plan_id = %plan.id, error = %e, "preconnect failed");
        }

        record.status = AttemptStatus::Submitting;
        record.submitted_at = Some(now_ms());
        self.store.append_attempt(&record).await?;

        let failure = match self.automation.submit(plan, &record.nonce).await {
            Ok(outcome) => {
                record.queue_position = outcome.queue_position;
                if outcome.success_indicator {
                    record.mark_success(outcome.confirmation_id.unwrap_or_default());
                    None
                } else {
                    let barrier = classify(&outcome.signal);
                    record.queue_detected =
                        barrier == Barrier::Queue || outcome.queue_position.is_some();
                    match barrier {
                        Barrier::None => {
                            record.mark_failed("submission finished without a confirmation");
                            Some(FailureClass::Transient)
                        }
                        barrier if barrier.needs_human() => {
                            record.mark_blocked(barrier);
                            None
                        }
                        Barrier::Queue => {
                            record.mark_blocked(Barrier::Queue);
                            Some(FailureClass::Barrier(Barrier::Queue))
                        }
                        barrier => {
                            record.barrier = barrier;
                            record.mark_failed(format!("barrier: {barrier}"));
                            Some(FailureClass::Barrier(barrier))
                        }
                    }
                }
            }
            Err(e) => {
                record.barrier = Barrier::UnknownError;
                record.mark_failed(e.to_string());
                if e.is_transient() {
                    Some(FailureClass::Transient)
                } else {
                    None
                }
            }
        };

        self.store.append_attempt(&record).await?;
        Ok((record, failure))
    }

    /// Telemetry must never fail the attempt path
    async fn emit_telemetry(&self, record: &AttemptRecord) {
        let event = TelemetryEvent::from_attempt(record);
        if let Err(e) = self.telemetry.record(&event).await {
            warn!(plan_id = %record.plan_id, error = %e, "telemetry sink error");
        }
    }
}
