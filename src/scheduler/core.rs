//! Attempt scheduler implementation
//!
//! One lightweight tokio task per armed plan. The task walks the
//! idle -> armed -> preparing -> firing state machine and delivers a fire
//! signal over an mpsc channel; the daemon runs the submission executor on
//! the other end. Per-plan serialization: re-arming replaces the prior
//! timer atomically, and cancellation guarantees teardown before returning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::automation::OpenProbe;
use crate::clocksync::{ClockSample, ClockSync};
use crate::domain::{OpenStrategy, RegistrationPlan};

use super::config::SchedulerConfig;

/// Per-plan scheduler phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    /// No timer set
    #[default]
    Idle,
    /// Wake timer set for target minus lead
    Armed,
    /// Lead window reached; syncing clocks / polling for open
    Preparing,
    /// Fire signal sent
    Firing,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Armed => write!(f, "armed"),
            Self::Preparing => write!(f, "preparing"),
            Self::Firing => write!(f, "firing"),
        }
    }
}

/// Emitted when a plan's moment arrives
#[derive(Debug, Clone)]
pub struct FireSignal {
    /// Plan that should submit now
    pub plan_id: String,

    /// Drift/latency sample measured during the lead window
    pub clock: ClockSample,

    /// Unix ms when the signal was sent
    pub fired_at: i64,
}

/// One armed plan's timer task
struct ArmedEntry {
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
    phase_rx: watch::Receiver<SchedulerPhase>,
}

/// The AttemptScheduler owns every armed plan's timer task
pub struct AttemptScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn ClockSync>,
    probe: Arc<dyn OpenProbe>,
    fire_tx: mpsc::Sender<FireSignal>,
    armed: Mutex<HashMap<String, ArmedEntry>>,
}

impl AttemptScheduler {
    /// Create a scheduler. Fire signals arrive on the returned receiver.
    pub fn new(
        config: SchedulerConfig,
        clock: Arc<dyn ClockSync>,
        probe: Arc<dyn OpenProbe>,
    ) -> (Self, mpsc::Receiver<FireSignal>) {
        let (fire_tx, fire_rx) = mpsc::channel(config.channel_buffer);
        (
            Self {
                config,
                clock,
                probe,
                fire_tx,
                armed: Mutex::new(HashMap::new()),
            },
            fire_rx,
        )
    }

    /// Arm a plan. Replaces any prior timer for the same plan atomically.
    pub async fn arm(&self, plan: &RegistrationPlan) -> Result<()> {
        if plan.open_strategy.is_exact() && plan.target_open_at.is_none() {
            return Err(eyre!("plan {} has no target open time", plan.id));
        }
        if !plan.open_strategy.is_exact() && plan.detection_url.is_none() {
            return Err(eyre!("plan {} has no detection URL", plan.id));
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(SchedulerPhase::Armed);

        let task = PlanTimer {
            plan: plan.clone(),
            config: self.config.clone(),
            clock: Arc::clone(&self.clock),
            probe: Arc::clone(&self.probe),
            fire_tx: self.fire_tx.clone(),
            cancel_rx,
            phase_tx,
        };
        let handle = tokio::spawn(task.run());

        let mut armed = self.armed.lock().await;
        if let Some(prior) = armed.insert(
            plan.id.clone(),
            ArmedEntry {
                handle,
                cancel_tx,
                phase_rx,
            },
        ) {
            debug!(plan_id = %plan.id, "re-arm replaces prior timer");
            let _ = prior.cancel_tx.send(true);
            prior.handle.abort();
        }

        info!(plan_id = %plan.id, strategy = %plan.open_strategy, "plan armed");
        Ok(())
    }

    /// Cancel a plan's timer. Guarantees no fire after this returns.
    /// Returns whether a timer was actually torn down.
    pub async fn cancel(&self, plan_id: &str) -> bool {
        let mut armed = self.armed.lock().await;
        let Some(entry) = armed.remove(plan_id) else {
            debug!(plan_id, "cancel: no timer armed");
            return false;
        };

        let _ = entry.cancel_tx.send(true);
        entry.handle.abort();
        info!(plan_id, "plan timer torn down");
        true
    }

    /// Claim a delivered fire signal and retire its timer entry. Returns
    /// false when the plan was cancelled or re-armed after the signal was
    /// buffered; such signals are stale and must be dropped unexecuted.
    pub async fn acknowledge_fire(&self, plan_id: &str) -> bool {
        let mut armed = self.armed.lock().await;
        let firing = armed
            .get(plan_id)
            .map(|entry| *entry.phase_rx.borrow() == SchedulerPhase::Firing)
            .unwrap_or(false);
        if firing {
            armed.remove(plan_id);
        } else {
            debug!(plan_id, "fire signal not acknowledged, timer gone or re-armed");
        }
        firing
    }

    /// Current phase for a plan, Idle when nothing is armed
    pub async fn phase(&self, plan_id: &str) -> SchedulerPhase {
        let armed = self.armed.lock().await;
        armed
            .get(plan_id)
            .map(|e| *e.phase_rx.borrow())
            .unwrap_or(SchedulerPhase::Idle)
    }

    /// Plan ids with a live timer
    pub async fn armed_plans(&self) -> Vec<String> {
        let armed = self.armed.lock().await;
        armed.keys().cloned().collect()
    }
}

/// The per-plan timer task
struct PlanTimer {
    plan: RegistrationPlan,
    config: SchedulerConfig,
    clock: Arc<dyn ClockSync>,
    probe: Arc<dyn OpenProbe>,
    fire_tx: mpsc::Sender<FireSignal>,
    cancel_rx: watch::Receiver<bool>,
    phase_tx: watch::Sender<SchedulerPhase>,
}

impl PlanTimer {
    async fn run(mut self) {
        let lead = if self.plan.open_strategy.is_exact() {
            self.config.exact_lead()
        } else {
            self.config.poll_lead()
        };

        // Armed: wait until the lead window opens
        if let Some(target) = self.plan.target_open_at {
            let until_prep = (target - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .saturating_sub(lead);
            if !self.sleep_or_cancel(until_prep).await {
                return;
            }
        }

        let _ = self.phase_tx.send(SchedulerPhase::Preparing);
        debug!(plan_id = %self.plan.id, "lead window reached, preparing");

        let clock = self.prepare_clock().await;

        let fired = match self.plan.open_strategy {
            OpenStrategy::Manual => self.wait_for_exact_instant(clock).await,
            OpenStrategy::Published | OpenStrategy::Auto => self.poll_until_open().await,
        };

        if !fired {
            return;
        }

        let _ = self.phase_tx.send(SchedulerPhase::Firing);
        let signal = FireSignal {
            plan_id: self.plan.id.clone(),
            clock,
            fired_at: Utc::now().timestamp_millis(),
        };
        if self.fire_tx.send(signal).await.is_err() {
            warn!(plan_id = %self.plan.id, "fire channel closed, dropping signal");
        }
    }

    /// Probe the provider clock; fall back to an unsynced zero-drift sample
    async fn prepare_clock(&self) -> ClockSample {
        let Some(url) = self.plan.detection_url.as_deref() else {
            return ClockSample::unsynced();
        };
        match self.clock.probe(url).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(plan_id = %self.plan.id, error = %e, "clock sync failed, proceeding unsynced");
                ClockSample::unsynced()
            }
        }
    }

    /// Exact strategy: sleep until the drift-corrected target instant.
    /// Provider clock ahead of ours (positive drift) means the window opens
    /// earlier in local time, so fire at target minus drift.
    async fn wait_for_exact_instant(&mut self, clock: ClockSample) -> bool {
        let Some(target) = self.plan.target_open_at else {
            return false;
        };
        let corrected = target - chrono::Duration::milliseconds(clock.drift_ms);
        let remaining = (corrected - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(
            plan_id = %self.plan.id,
            drift_ms = clock.drift_ms,
            remaining_ms = remaining.as_millis() as u64,
            "waiting for exact instant"
        );
        self.sleep_or_cancel(remaining).await
    }

    /// Polling strategies: hit the detection URL until an open signal shows
    async fn poll_until_open(&mut self) -> bool {
        let Some(url) = self.plan.detection_url.clone() else {
            return false;
        };
        loop {
            match self.probe.is_open(&url).await {
                Ok(true) => {
                    debug!(plan_id = %self.plan.id, "open signal observed");
                    return true;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(plan_id = %self.plan.id, error = %e, "open probe failed");
                }
            }
            if !self.sleep_or_cancel(self.config.poll_interval()).await {
                return false;
            }
        }
    }

    /// Sleep for the duration unless cancelled. Returns false on cancel.
    async fn sleep_or_cancel(&mut self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        tokio::select! {
            _ = tokio::time::sleep_until(deadline.into()) => true,
            _ = self.cancel_rx.changed() => {
                debug!(plan_id = %self.plan.id, "timer cancelled");
                false
            }
        }
    }
}
