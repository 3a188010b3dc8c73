//! In-memory store for tests and single-process runs

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::domain::{AttemptRecord, Checkpoint, RegistrationPlan};

use super::{CheckpointStore, PlanStore, StoreError};

/// Internal state protected by mutex
#[derive(Default)]
struct MemoryInner {
    plans: HashMap<String, RegistrationPlan>,
    attempts: HashMap<String, Vec<AttemptRecord>>,
    checkpoints: Vec<Checkpoint>,
}

/// Memory-backed store implementing both store traits
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn load_plan(&self, id: &str) -> Result<RegistrationPlan, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .plans
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::PlanNotFound(id.to_string()))
    }

    async fn save_plan(&self, plan: &RegistrationPlan) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.plans.insert(plan.id.clone(), plan.clone());
        Ok(())
    }

    async fn append_attempt(&self, record: &AttemptRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let attempts = inner.attempts.entry(record.plan_id.clone()).or_default();

        if let Some(existing) = attempts.iter_mut().find(|a| a.attempt_number == record.attempt_number) {
            // Same attempt number: this is the active record reaching a new
            // state. Terminal records are immutable.
            if existing.is_terminal() {
                return Err(StoreError::TerminalAttemptImmutable {
                    plan_id: record.plan_id.clone(),
                    attempt_number: record.attempt_number,
                });
            }
            *existing = record.clone();
            return Ok(());
        }

        // New attempt number: refuse while an earlier attempt is active
        if let Some(active) = attempts.iter().find(|a| !a.is_terminal()) {
            return Err(StoreError::AttemptStillActive {
                plan_id: record.plan_id.clone(),
                attempt_number: active.attempt_number,
            });
        }

        attempts.push(record.clone());
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(())
    }

    async fn load_attempts(&self, plan_id: &str) -> Result<Vec<AttemptRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.attempts.get(plan_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn load_latest_checkpoint(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .checkpoints
            .iter()
            .filter(|c| c.session_id == session_id && c.user_id == user_id)
            .max_by_key(|c| c.created_at)
            .cloned())
    }
}
