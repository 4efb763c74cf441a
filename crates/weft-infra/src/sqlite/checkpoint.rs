//! SQLite checkpoint store.
//!
//! Implements `CheckpointStore` from `weft-core`. State, completed steps,
//! outputs and resolved successors are stored as JSON text columns; a save is a single upsert so a
//! reader never observes a partially written checkpoint.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;
use weft_core::repository::checkpoint::CheckpointStore;
use weft_types::error::RepositoryError;
use weft_types::workflow::{Checkpoint, State};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

const COLUMNS: &str =
    "id, run_id, workflow_name, state, completed_steps, outputs, successors, iteration, created_at";

/// SQLite-backed implementation of `CheckpointStore`.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct CheckpointRow {
    id: String,
    run_id: String,
    workflow_name: String,
    state: String,
    completed_steps: String,
    outputs: String,
    successors: String,
    iteration: i64,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            workflow_name: row.try_get("workflow_name")?,
            state: row.try_get("state")?,
            completed_steps: row.try_get("completed_steps")?,
            outputs: row.try_get("outputs")?,
            successors: row.try_get("successors")?,
            iteration: row.try_get("iteration")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let state: State = serde_json::from_str(&self.state)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint state: {e}")))?;
        let completed_steps: BTreeSet<String> = serde_json::from_str(&self.completed_steps)
            .map_err(|e| RepositoryError::Query(format!("invalid completed steps: {e}")))?;
        let outputs: BTreeMap<String, Value> = serde_json::from_str(&self.outputs)
            .map_err(|e| RepositoryError::Query(format!("invalid step outputs: {e}")))?;
        let successors: BTreeMap<String, Vec<String>> = serde_json::from_str(&self.successors)
            .map_err(|e| RepositoryError::Query(format!("invalid step successors: {e}")))?;
        let iteration = u32::try_from(self.iteration)
            .map_err(|_| RepositoryError::Query(format!("invalid iteration: {}", self.iteration)))?;

        Ok(Checkpoint {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            workflow_name: self.workflow_name,
            state,
            completed_steps,
            outputs,
            successors,
            iteration,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

fn decode_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Checkpoint>, RepositoryError> {
    rows.iter()
        .map(|row| {
            CheckpointRow::from_row(row)
                .map_err(query_error)?
                .into_checkpoint()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CheckpointStore impl
// ---------------------------------------------------------------------------

impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), RepositoryError> {
        let state = serde_json::to_string(&checkpoint.state).map_err(query_error)?;
        let completed = serde_json::to_string(&checkpoint.completed_steps).map_err(query_error)?;
        let outputs = serde_json::to_string(&checkpoint.outputs).map_err(query_error)?;
        let successors = serde_json::to_string(&checkpoint.successors).map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO checkpoints
               (id, run_id, workflow_name, state, completed_steps, outputs, successors,
                iteration, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 run_id = excluded.run_id,
                 workflow_name = excluded.workflow_name,
                 state = excluded.state,
                 completed_steps = excluded.completed_steps,
                 outputs = excluded.outputs,
                 successors = excluded.successors,
                 iteration = excluded.iteration,
                 created_at = excluded.created_at"#,
        )
        .bind(checkpoint.id.to_string())
        .bind(checkpoint.run_id.to_string())
        .bind(&checkpoint.workflow_name)
        .bind(&state)
        .bind(&completed)
        .bind(&outputs)
        .bind(&successors)
        .bind(i64::from(checkpoint.iteration))
        .bind(format_datetime(&checkpoint.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM checkpoints WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, run_id: Option<&Uuid>) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = match run_id {
            Some(run_id) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM checkpoints WHERE run_id = ? ORDER BY created_at DESC, id DESC"
                ))
                .bind(run_id.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM checkpoints ORDER BY created_at DESC, id DESC"
                ))
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(query_error)?;

        decode_rows(&rows)
    }

    async fn latest_for_run(&self, run_id: &Uuid) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM checkpoints WHERE run_id = ? ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(run_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = CheckpointRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune(&self, keep: usize) -> Result<usize, RepositoryError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"DELETE FROM checkpoints WHERE id IN (
                 SELECT id FROM (
                   SELECT id, ROW_NUMBER() OVER (
                     PARTITION BY run_id ORDER BY created_at DESC, id DESC
                   ) AS rn
                   FROM checkpoints
                 ) WHERE rn > ?
               )"#,
        )
        .bind(keep)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(result.rows_affected() as usize)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(&dir.path().join("test.db")).await.unwrap();
        (dir, SqliteCheckpointStore::new(pool))
    }

    fn checkpoint(run_id: Uuid, iteration: u32, age_secs: i64) -> Checkpoint {
        let mut cp = Checkpoint::new(
            run_id,
            "ingest",
            json!({"rows": iteration}).as_object().cloned().unwrap(),
            BTreeSet::from(["fetch".to_string()]),
            BTreeMap::from([("fetch".to_string(), json!({"ok": true}))]),
            iteration,
        )
        .with_successors(BTreeMap::from([("fetch".to_string(), vec!["parse".to_string()])]));
        cp.created_at = Utc::now() - Duration::seconds(age_secs);
        cp
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (_dir, store) = test_store().await;
        let cp = checkpoint(Uuid::now_v7(), 3, 0);
        store.save(&cp).await.unwrap();

        assert_eq!(store.load(&cp.id).await.unwrap(), Some(cp.clone()));
        assert!(store.load(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_same_id_is_last_write_wins() {
        let (_dir, store) = test_store().await;
        let mut cp = checkpoint(Uuid::now_v7(), 1, 0);
        store.save(&cp).await.unwrap();
        cp.iteration = 9;
        cp.state.insert("rows".to_string(), json!(99));
        store.save(&cp).await.unwrap();

        let loaded = store.load(&cp.id).await.unwrap().unwrap();
        assert_eq!(loaded.iteration, 9);
        assert_eq!(loaded.state["rows"], 99);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_filters_by_run() {
        let (_dir, store) = test_store().await;
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        let old = checkpoint(run_a, 1, 30);
        let new = checkpoint(run_a, 2, 10);
        let other = checkpoint(run_b, 1, 20);
        for cp in [&old, &new, &other] {
            store.save(cp).await.unwrap();
        }

        let all: Vec<Uuid> = store.list(None).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(all, vec![new.id, other.id, old.id]);

        let only_a: Vec<Uuid> = store
            .list(Some(&run_a))
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(only_a, vec![new.id, old.id]);
        assert_eq!(store.latest_for_run(&run_a).await.unwrap().unwrap().id, new.id);
        assert!(store.latest_for_run(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prune_keeps_newest_per_run() {
        let (_dir, store) = test_store().await;
        let run_a = Uuid::now_v7();
        let run_b = Uuid::now_v7();
        let a = [checkpoint(run_a, 1, 30), checkpoint(run_a, 2, 20), checkpoint(run_a, 3, 10)];
        let b = checkpoint(run_b, 1, 5);
        for cp in a.iter().chain(std::iter::once(&b)) {
            store.save(cp).await.unwrap();
        }

        assert_eq!(store.prune(1).await.unwrap(), 2);
        let left: Vec<Uuid> = store.list(None).await.unwrap().iter().map(|c| c.id).collect();
        assert_eq!(left, vec![b.id, a[2].id]);

        assert!(store.delete(&b.id).await.unwrap());
        assert!(!store.delete(&b.id).await.unwrap());
    }
}
