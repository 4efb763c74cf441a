//! Timer store port and the in-memory implementation.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;
use weft_types::error::RepositoryError;
use weft_types::timer::{TimerRecord, TimerStatus};

/// Storage for timers. Same contract as the checkpoint store: a saved
/// record is visible to the next `load`, writes to one id are
/// last-write-wins.
pub trait TimerStore: Send + Sync {
    /// Insert or replace a timer by id.
    fn save(&self, timer: &TimerRecord) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn load(
        &self,
        id: &Uuid,
    ) -> impl Future<Output = Result<Option<TimerRecord>, RepositoryError>> + Send;

    /// Timers ordered by fire time, optionally filtered by status.
    fn list(
        &self,
        status: Option<TimerStatus>,
    ) -> impl Future<Output = Result<Vec<TimerRecord>, RepositoryError>> + Send;

    /// Pending timers whose fire time is at or before `now`, earliest first.
    fn due(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<TimerRecord>, RepositoryError>> + Send;

    /// Delete by id. Returns `true` if it existed.
    fn delete(&self, id: &Uuid) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remove fired timers that fired before `older_than`; returns the count.
    fn prune_fired(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize, RepositoryError>> + Send;
}

/// Process-lifetime timer store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTimerStore {
    timers: Arc<DashMap<Uuid, TimerRecord>>,
}

impl InMemoryTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn collect(&self, keep: impl Fn(&TimerRecord) -> bool) -> Vec<TimerRecord> {
        let mut out: Vec<TimerRecord> = self
            .timers
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}

impl TimerStore for InMemoryTimerStore {
    async fn save(&self, timer: &TimerRecord) -> Result<(), RepositoryError> {
        self.timers.insert(timer.id, timer.clone());
        Ok(())
    }

    async fn load(&self, id: &Uuid) -> Result<Option<TimerRecord>, RepositoryError> {
        Ok(self.timers.get(id).map(|e| e.value().clone()))
    }

    async fn list(&self, status: Option<TimerStatus>) -> Result<Vec<TimerRecord>, RepositoryError> {
        Ok(self.collect(|t| status.is_none_or(|s| t.status == s)))
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<TimerRecord>, RepositoryError> {
        Ok(self.collect(|t| t.is_due(now)))
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.timers.remove(id).is_some())
    }

    async fn prune_fired(&self, older_than: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let before = self.timers.len();
        self.timers.retain(|_, t| {
            !(t.status == TimerStatus::Fired && t.fired_at.is_some_and(|at| at < older_than))
        });
        Ok(before.saturating_sub(self.timers.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Value;
    use weft_types::timer::TimerKind;

    fn timer(offset_secs: i64, status: TimerStatus) -> TimerRecord {
        let now = Utc::now();
        TimerRecord {
            id: Uuid::now_v7(),
            run_id: None,
            handler: "wake".to_string(),
            kind: TimerKind::Delay,
            fire_at: now + Duration::seconds(offset_secs),
            cron: None,
            timezone: None,
            payload: Value::Null,
            status,
            created_at: now,
            fired_at: None,
            occurrence: 1,
        }
    }

    #[tokio::test]
    async fn save_load_and_list() {
        let store = InMemoryTimerStore::new();
        let later = timer(60, TimerStatus::Pending);
        let soon = timer(5, TimerStatus::Pending);
        let cancelled = timer(1, TimerStatus::Cancelled);
        for t in [&later, &soon, &cancelled] {
            store.save(t).await.unwrap();
        }

        assert_eq!(store.load(&soon.id).await.unwrap(), Some(soon.clone()));
        let pending = store.list(Some(TimerStatus::Pending)).await.unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![soon.id, later.id]);
        assert_eq!(store.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn due_only_returns_overdue_pending() {
        let store = InMemoryTimerStore::new();
        let overdue = timer(-10, TimerStatus::Pending);
        let future = timer(60, TimerStatus::Pending);
        let fired = timer(-20, TimerStatus::Fired);
        for t in [&overdue, &future, &fired] {
            store.save(t).await.unwrap();
        }

        let due = store.due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, overdue.id);
    }

    #[tokio::test]
    async fn prune_only_drops_old_fired_timers() {
        let store = InMemoryTimerStore::new();
        let mut old = timer(-100, TimerStatus::Fired);
        old.fired_at = Some(Utc::now() - Duration::hours(2));
        let mut recent = timer(-5, TimerStatus::Fired);
        recent.fired_at = Some(Utc::now());
        let pending = timer(-100, TimerStatus::Pending);
        for t in [&old, &recent, &pending] {
            store.save(t).await.unwrap();
        }

        let removed = store.prune_fired(Utc::now() - Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load(&old.id).await.unwrap().is_none());
        assert!(store.delete(&recent.id).await.unwrap());
        assert_eq!(store.len(), 1);
    }
}
