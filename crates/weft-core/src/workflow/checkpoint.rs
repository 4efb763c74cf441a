//! Durable checkpoint manager for workflow runs.
//!
//! Wraps a `CheckpointStore` with the two operations the executor needs:
//! snapshot a run's progress, and restore a snapshot for resume. A failed
//! write is returned to the executor, which fails the run rather than
//! continuing without the checkpoint it was asked to take.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use weft_types::error::RepositoryError;
use weft_types::workflow::{Checkpoint, State};

use crate::repository::checkpoint::CheckpointStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying store operation failed.
    #[error("checkpoint store error: {0}")]
    Repository(#[from] RepositoryError),

    /// No checkpoint with this id (for restore operations).
    #[error("checkpoint not found: {0}")]
    NotFound(Uuid),
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Progress of a run at the moment a checkpoint is taken.
pub struct RunSnapshot<'a> {
    pub run_id: Uuid,
    pub workflow_name: &'a str,
    pub state: &'a State,
    pub completed_steps: &'a BTreeSet<String>,
    pub outputs: &'a BTreeMap<String, Value>,
    pub successors: &'a BTreeMap<String, Vec<String>>,
    pub iteration: u32,
}

/// Records and restores checkpoints through a shared store.
pub struct CheckpointManager<S: CheckpointStore> {
    store: Arc<S>,
}

impl<S: CheckpointStore> Clone for CheckpointManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CheckpointStore> CheckpointManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a fresh checkpoint of `snapshot`; returns its id.
    pub async fn write(&self, snapshot: RunSnapshot<'_>) -> Result<Uuid, CheckpointError> {
        let checkpoint = Checkpoint::new(
            snapshot.run_id,
            snapshot.workflow_name,
            snapshot.state.clone(),
            snapshot.completed_steps.clone(),
            snapshot.outputs.clone(),
            snapshot.iteration,
        )
        .with_successors(snapshot.successors.clone());

        if let Err(e) = self.store.save(&checkpoint).await {
            tracing::error!(run_id = %snapshot.run_id, error = %e, "checkpoint write failed");
            return Err(e.into());
        }

        tracing::debug!(
            run_id = %snapshot.run_id,
            checkpoint_id = %checkpoint.id,
            iteration = snapshot.iteration,
            completed = snapshot.completed_steps.len(),
            "checkpoint written"
        );

        Ok(checkpoint.id)
    }

    /// Load a checkpoint for resume.
    pub async fn restore(&self, id: Uuid) -> Result<Checkpoint, CheckpointError> {
        self.store
            .load(&id)
            .await?
            .ok_or(CheckpointError::NotFound(id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::checkpoint::InMemoryCheckpointStore;
    use serde_json::json;

    #[tokio::test]
    async fn write_then_restore() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let manager = CheckpointManager::new(Arc::clone(&store));
        let run_id = Uuid::now_v7();
        let state = json!({"n": 1}).as_object().cloned().unwrap();
        let completed = BTreeSet::from(["a".to_string()]);
        let outputs = BTreeMap::from([("a".to_string(), json!("out"))]);
        let successors = BTreeMap::from([("a".to_string(), vec!["c".to_string()])]);

        let id = manager
            .write(RunSnapshot {
                run_id,
                workflow_name: "wf",
                state: &state,
                completed_steps: &completed,
                outputs: &outputs,
                successors: &successors,
                iteration: 2,
            })
            .await
            .unwrap();

        let restored = manager.restore(id).await.unwrap();
        assert_eq!(restored.run_id, run_id);
        assert_eq!(restored.state, state);
        assert_eq!(restored.completed_steps, completed);
        assert_eq!(restored.outputs, outputs);
        assert_eq!(restored.successors, successors);
        assert_eq!(restored.iteration, 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn restore_missing_is_not_found() {
        let manager = CheckpointManager::new(Arc::new(InMemoryCheckpointStore::new()));
        let id = Uuid::now_v7();
        let err = manager.restore(id).await.unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(missing) if missing == id));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn repository_errors_convert() {
        let err: CheckpointError = RepositoryError::Query("disk full".to_string()).into();
        assert_eq!(err.to_string(), "checkpoint store error: query error: disk full");
    }
}
