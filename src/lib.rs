//! regdaemon - Timed Registration and Assistance-Workflow Daemon
//!
//! Fires registration submissions at the exact instant a window opens,
//! corrects for clock drift against the provider, and turns the barriers a
//! submission hits (CAPTCHA, login, payment, queue) into a sequenced queue
//! of human-assistance steps with durable checkpoints.
//!
//! # Core Concepts
//!
//! - **Fire at T0**: The scheduler arms one timer per plan and corrects the
//!   local fire instant with a drift probe taken in the lead window
//! - **Attempts Are Append-Only**: Every try leaves an immutable terminal
//!   record with its drift, latency, and barrier
//! - **Humans in the Loop**: Barriers become assistance requests, processed
//!   FIFO with at most one active at a time
//! - **Checkpoint Everything**: The workflow snapshots at every transition
//!   and restores paused, never mid-flight
//!
//! # Modules
//!
//! - [`scheduler`] - When each plan fires
//! - [`executor`] - The attempt loop with retry/backoff
//! - [`orchestrator`] - The assistance workflow engine
//! - [`barrier`] - Signal-to-barrier classification
//! - [`clocksync`] - Drift and latency estimation
//! - [`store`] - Plan, attempt, and checkpoint persistence

pub mod automation;
pub mod barrier;
pub mod cli;
pub mod clocksync;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod executor;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod telemetry;

// Re-export commonly used types
pub use barrier::{classify, Barrier, ExecutionSignal};
pub use clocksync::{ClockSample, ClockSync, ClockSyncError, HttpClockSync};
pub use config::Config;
pub use daemon::{Daemon, PlanStatus, WorkflowSummary};
pub use domain::{
    AccountMode, AssistanceRequest, AssistanceStatus, AssistanceType, AttemptRecord, AttemptStatus,
    Checkpoint, FallbackStrategy, OpenStrategy, Priority, RecoveryMode, RegistrationPlan,
    WorkflowState,
};
pub use executor::{ExecutionOutcome, SubmissionExecutor};
pub use orchestrator::{WorkflowEngine, WorkflowEvent};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use scheduler::{AttemptScheduler, FireSignal, SchedulerConfig, SchedulerPhase};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryStore, PlanStore, StoreError};
