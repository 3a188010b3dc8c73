//! Data-access interfaces
//!
//! The daemon consumes narrow store traits rather than owning a database.
//! A memory implementation backs tests and single-process runs; a JSONL
//! file store provides durable checkpoints.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{AttemptRecord, Checkpoint, RegistrationPlan};

/// Errors from a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("attempt {attempt_number} for plan {plan_id} is still active")]
    AttemptStillActive { plan_id: String, attempt_number: u32 },

    #[error("attempt records are append-only; {plan_id}/{attempt_number} is terminal")]
    TerminalAttemptImmutable { plan_id: String, attempt_number: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Plan and attempt persistence, at-least read-your-writes per plan
#[async_trait]
pub trait PlanStore: Send + Sync {
    /// Load a plan by id
    async fn load_plan(&self, id: &str) -> Result<RegistrationPlan, StoreError>;

    /// Save (upsert) a plan
    async fn save_plan(&self, plan: &RegistrationPlan) -> Result<(), StoreError>;

    /// Append an attempt record.
    ///
    /// Rejects a new non-terminal record while an earlier one is active,
    /// and rejects rewriting a terminal record with different contents.
    /// An update of the plan's latest non-terminal record (same attempt
    /// number) is how an attempt reaches its terminal state.
    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError>;

    /// All attempt records for a plan, ordered by attempt number
    async fn load_attempts(&self, plan_id: &str) -> Result<Vec<AttemptRecord>, StoreError>;
}

/// Checkpoint persistence for workflow resume
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// Most recent snapshot for (session, user), or None when there is no
    /// valid history - callers fall back to fresh initialization
    async fn load_latest_checkpoint(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError>;
}
