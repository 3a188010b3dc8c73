//! JSONL-backed checkpoint store
//!
//! Appends one JSON line per checkpoint. Corrupt or partial lines are
//! skipped on read so a torn write never poisons resume.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::domain::Checkpoint;

use super::{CheckpointStore, StoreError};

/// File-backed checkpoint store
pub struct FileCheckpointStore {
    store_path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at the given directory
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
        }
    }

    fn checkpoints_file(&self) -> PathBuf {
        self.store_path.join("checkpoints.jsonl")
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.store_path).await?;
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let file = self.checkpoints_file();
        if !file.exists() {
            return Ok(vec![]);
        }

        let content = fs::read_to_string(&file).await?;
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Drop superseded checkpoints, keeping the latest `keep` per
    /// (session, user). Retention is the store's concern, not the engine's.
    pub async fn compact(&self, keep: usize) -> Result<usize, StoreError> {
        let mut all = self.read_all().await?;
        let original = all.len();

        all.sort_by_key(|c| std::cmp::Reverse(c.created_at));
        let mut counts: std::collections::HashMap<(String, String), usize> = std::collections::HashMap::new();
        let kept: Vec<Checkpoint> = all
            .into_iter()
            .filter(|c| {
                let count = counts.entry((c.session_id.clone(), c.user_id.clone())).or_insert(0);
                *count += 1;
                *count <= keep
            })
            .collect();

        let removed = original - kept.len();
        if removed > 0 {
            let content: String = kept
                .iter()
                .rev()
                .map(|c| serde_json::to_string(c).map(|s| s + "\n"))
                .collect::<Result<String, _>>()?;
            fs::write(self.checkpoints_file(), content).await?;
            debug!(removed, "compacted checkpoint store");
        }

        Ok(removed)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.ensure_dir().await?;

        let line = serde_json::to_string(checkpoint)? + "\n";
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.checkpoints_file())
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(checkpoint_id = %checkpoint.id, step = %checkpoint.step, "checkpoint written");
        Ok(())
    }

    async fn load_latest_checkpoint(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let all = self.read_all().await?;
        Ok(all
            .into_iter()
            .filter(|c| c.session_id == session_id && c.user_id == user_id)
            .max_by_key(|c| c.created_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkflowState;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_load_latest() {
        let temp = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        let wf = WorkflowState::new("session-1", "user-1");

        let mut cp1 = Checkpoint::capture(&wf, "first");
        cp1.created_at = 100;
        let mut cp2 = Checkpoint::capture(&wf, "second");
        cp2.created_at = 200;

        store.save_checkpoint(&cp1).await.unwrap();
        store.save_checkpoint(&cp2).await.unwrap();

        let latest = store
            .load_latest_checkpoint("session-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, "second");
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_not_error() {
        let temp = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        let latest = store.load_latest_checkpoint("s", "u").await.unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        let wf = WorkflowState::new("session-1", "user-1");
        store.save_checkpoint(&Checkpoint::capture(&wf, "good")).await.unwrap();

        // Simulate a torn write
        let mut content = fs::read_to_string(store.checkpoints_file()).await.unwrap();
        content.push_str("{\"id\": \"truncat");
        fs::write(store.checkpoints_file(), content).await.unwrap();

        let latest = store
            .load_latest_checkpoint("session-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, "good");
    }

    #[tokio::test]
    async fn test_compact_keeps_latest_per_pair() {
        let temp = tempdir().unwrap();
        let store = FileCheckpointStore::new(temp.path());
        let wf = WorkflowState::new("session-1", "user-1");

        for (i, step) in ["a", "b", "c"].iter().enumerate() {
            let mut cp = Checkpoint::capture(&wf, *step);
            cp.created_at = (i as i64 + 1) * 100;
            store.save_checkpoint(&cp).await.unwrap();
        }

        let removed = store.compact(1).await.unwrap();
        assert_eq!(removed, 2);

        let latest = store
            .load_latest_checkpoint("session-1", "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.step, "c");
    }
}
