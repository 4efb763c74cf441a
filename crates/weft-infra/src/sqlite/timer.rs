//! SQLite timer store.
//!
//! Implements `TimerStore` from `weft-core`. Timestamps use the fixed-width
//! RFC 3339 encoding so `due` can compare `fire_at` in SQL.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;
use weft_core::repository::timer::TimerStore;
use weft_types::error::RepositoryError;
use weft_types::timer::{TimerKind, TimerRecord, TimerStatus};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid, query_error};

const COLUMNS: &str = "id, run_id, handler, kind, fire_at, cron, timezone, payload, status, \
                       created_at, fired_at, occurrence";

/// SQLite-backed implementation of `TimerStore`.
#[derive(Clone)]
pub struct SqliteTimerStore {
    pool: DatabasePool,
}

impl SqliteTimerStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row type
// ---------------------------------------------------------------------------

struct TimerRow {
    id: String,
    run_id: Option<String>,
    handler: String,
    kind: String,
    fire_at: String,
    cron: Option<String>,
    timezone: Option<String>,
    payload: String,
    status: String,
    created_at: String,
    fired_at: Option<String>,
    occurrence: i64,
}

impl TimerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            handler: row.try_get("handler")?,
            kind: row.try_get("kind")?,
            fire_at: row.try_get("fire_at")?,
            cron: row.try_get("cron")?,
            timezone: row.try_get("timezone")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            fired_at: row.try_get("fired_at")?,
            occurrence: row.try_get("occurrence")?,
        })
    }

    fn into_record(self) -> Result<TimerRecord, RepositoryError> {
        let kind: TimerKind = serde_json::from_value(Value::String(self.kind.clone()))
            .map_err(|_| RepositoryError::Query(format!("invalid timer kind: {}", self.kind)))?;
        let status: TimerStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let payload: Value = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid timer payload: {e}")))?;

        Ok(TimerRecord {
            id: parse_uuid(&self.id)?,
            run_id: self.run_id.as_deref().map(parse_uuid).transpose()?,
            handler: self.handler,
            kind,
            fire_at: parse_datetime(&self.fire_at)?,
            cron: self.cron,
            timezone: self.timezone,
            payload,
            status,
            created_at: parse_datetime(&self.created_at)?,
            fired_at: self.fired_at.as_deref().map(parse_datetime).transpose()?,
            occurrence: u32::try_from(self.occurrence).map_err(|_| {
                RepositoryError::Query(format!("invalid occurrence: {}", self.occurrence))
            })?,
        })
    }
}

fn decode_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<TimerRecord>, RepositoryError> {
    rows.iter()
        .map(|row| TimerRow::from_row(row).map_err(query_error)?.into_record())
        .collect()
}

// ---------------------------------------------------------------------------
// TimerStore impl
// ---------------------------------------------------------------------------

impl TimerStore for SqliteTimerStore {
    async fn save(&self, timer: &TimerRecord) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&timer.payload).map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO timers
               (id, run_id, handler, kind, fire_at, cron, timezone, payload, status,
                created_at, fired_at, occurrence)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 run_id = excluded.run_id,
                 handler = excluded.handler,
                 kind = excluded.kind,
                 fire_at = excluded.fire_at,
                 cron = excluded.cron,
                 timezone = excluded.timezone,
                 payload = excluded.payload,
                 status = excluded.status,
                 created_at = excluded.created_at,
                 fired_at = excluded.fired_at,
                 occurrence = excluded.occurrence"#,
        )
        .bind(timer.id.to_string())
        .bind(timer.run_id.map(|id| id.to_string()))
        .bind(&timer.handler)
        .bind(timer.kind.as_str())
        .bind(format_datetime(&timer.fire_at))
        .bind(&timer.cron)
        .bind(&timer.timezone)
        .bind(&payload)
        .bind(timer.status.as_str())
        .bind(format_datetime(&timer.created_at))
        .bind(timer.fired_at.as_ref().map(format_datetime))
        .bind(i64::from(timer.occurrence))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<TimerRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM timers WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = TimerRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, status: Option<TimerStatus>) -> Result<Vec<TimerRecord>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM timers WHERE status = ? ORDER BY fire_at ASC, id ASC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {COLUMNS} FROM timers ORDER BY fire_at ASC, id ASC"))
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_error)?;

        decode_rows(&rows)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<TimerRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM timers WHERE status = 'pending' AND fire_at <= ? ORDER BY fire_at ASC, id ASC"
        ))
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        decode_rows(&rows)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM timers WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn prune_fired(&self, older_than: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let result = sqlx::query(
            "DELETE FROM timers WHERE status = 'fired' AND fired_at IS NOT NULL AND fired_at < ?",
        )
        .bind(format_datetime(&older_than))
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
    use chrono::Duration;
    use serde_json::json;
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteTimerStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(&dir.path().join("test.db")).await.unwrap();
        (dir, SqliteTimerStore::new(pool))
    }

    fn timer(offset_secs: i64, status: TimerStatus) -> TimerRecord {
        let now = Utc::now();
        TimerRecord {
            id: Uuid::now_v7(),
            run_id: Some(Uuid::now_v7()),
            handler: "resume_run".to_string(),
            kind: TimerKind::Cron,
            fire_at: now + Duration::seconds(offset_secs),
            cron: Some("0 9 * * MON-FRI".to_string()),
            timezone: Some("America/New_York".to_string()),
            payload: json!({"step": "approve"}),
            status,
            created_at: now,
            fired_at: None,
            occurrence: 2,
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let (_dir, store) = test_store().await;
        let t = timer(60, TimerStatus::Pending);
        store.save(&t).await.unwrap();
        assert_eq!(store.load(&t.id).await.unwrap(), Some(t.clone()));

        let mut fired = t.clone();
        fired.status = TimerStatus::Fired;
        fired.fired_at = Some(Utc::now());
        store.save(&fired).await.unwrap();
        assert_eq!(store.load(&t.id).await.unwrap(), Some(fired));
    }

    #[tokio::test]
    async fn due_returns_overdue_pending_earliest_first() {
        let (_dir, store) = test_store().await;
        let late = timer(-5, TimerStatus::Pending);
        let later = timer(-60, TimerStatus::Pending);
        let future = timer(60, TimerStatus::Pending);
        let cancelled = timer(-30, TimerStatus::Cancelled);
        for t in [&late, &later, &future, &cancelled] {
            store.save(t).await.unwrap();
        }

        let due: Vec<Uuid> = store.due(Utc::now()).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(due, vec![later.id, late.id]);

        let pending = store.list(Some(TimerStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert_eq!(store.list(None).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn prune_fired_respects_cutoff() {
        let (_dir, store) = test_store().await;
        let mut old = timer(-100, TimerStatus::Fired);
        old.fired_at = Some(Utc::now() - Duration::hours(3));
        let mut recent = timer(-10, TimerStatus::Fired);
        recent.fired_at = Some(Utc::now());
        let pending = timer(-100, TimerStatus::Pending);
        for t in [&old, &recent, &pending] {
            store.save(t).await.unwrap();
        }

        let removed = store.prune_fired(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(&old.id).await.unwrap().is_none());
        assert!(store.delete(&pending.id).await.unwrap());
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }
}
