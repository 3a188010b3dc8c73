//! Domain types for registration plans, attempts, and assistance workflows

mod assistance;
mod attempt;
mod checkpoint;
mod id;
mod plan;
mod priority;
mod workflow;

pub use assistance::{AssistanceRequest, AssistanceStatus, AssistanceType};
pub use attempt::{AttemptRecord, AttemptStatus};
pub use checkpoint::Checkpoint;
pub use id::generate_id;
pub use plan::{
    AccountMode, FallbackStrategy, OpenStrategy, PreflightStatus, RecoveryMode, RegistrationPlan,
};
pub use priority::Priority;
pub use workflow::WorkflowState;

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
