//! Priority job scheduler.
//!
//! Queued run requests are dequeued by priority (highest first), then by
//! enqueue time, then by enqueue sequence. Named cron jobs enqueue a fresh
//! request at each occurrence; `tick` owns advancing every job to its next
//! occurrence.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::queue::QueueItem;

use crate::cron::{CronError, CronSchedule};

/// Upper bound on missed occurrences counted for a single log line.
const MISSED_SCAN_LIMIT: usize = 10_000;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Cron expression or timezone rejected at registration.
    #[error("invalid schedule for cron job '{name}': {error}")]
    InvalidSchedule {
        name: String,
        #[source]
        error: CronError,
    },

    #[error("cron job '{0}' has no upcoming occurrence")]
    NoOccurrence(String),

    #[error("cron job already registered: {0}")]
    DuplicateJob(String),

    #[error("cron job not registered: {0}")]
    UnknownJob(String),
}

// ---------------------------------------------------------------------------
// Queue ordering
// ---------------------------------------------------------------------------

/// Heap entry: the greatest entry is the next to run.
struct Queued(QueueItem);

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.enqueued_at.cmp(&self.0.enqueued_at))
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

// ---------------------------------------------------------------------------
// Cron jobs
// ---------------------------------------------------------------------------

struct CronJob {
    schedule: CronSchedule,
    source: String,
    timezone: String,
    priority: i32,
    payload: Value,
    next_run: Option<DateTime<Utc>>,
    last_enqueued: Option<DateTime<Utc>>,
}

/// Read-only view of a registered cron job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronJobInfo {
    pub name: String,
    pub schedule: String,
    pub timezone: String,
    pub priority: i32,
    pub next_run: Option<DateTime<Utc>>,
    pub last_enqueued: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// JobScheduler
// ---------------------------------------------------------------------------

/// Shared priority queue of run requests plus the cron jobs feeding it.
///
/// Share it behind an `Arc`; any number of workers may call
/// [`dequeue_next`](Self::dequeue_next) or [`next`](Self::next) concurrently
/// and no item is ever handed out twice.
#[derive(Default)]
pub struct JobScheduler {
    queue: Mutex<BinaryHeap<Queued>>,
    sequence: AtomicU64,
    available: Notify,
    cron_jobs: Mutex<BTreeMap<String, CronJob>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a run request and wake one waiting worker.
    pub fn enqueue(&self, priority: i32, payload: Value) -> QueueItem {
        self.push(priority, payload, None)
    }

    fn push(&self, priority: i32, payload: Value, source: Option<String>) -> QueueItem {
        let item = QueueItem {
            id: Uuid::now_v7(),
            priority,
            enqueued_at: Utc::now(),
            sequence: self.sequence.fetch_add(1, AtomicOrdering::SeqCst),
            source,
            payload,
        };
        lock(&self.queue).push(Queued(item.clone()));
        self.available.notify_one();
        tracing::debug!(item_id = %item.id, priority, sequence = item.sequence, "run request queued");
        item
    }

    /// Remove and return the highest-priority item, if any.
    pub fn dequeue_next(&self) -> Option<QueueItem> {
        lock(&self.queue).pop().map(|Queued(item)| item)
    }

    /// Wait for the next item. Returns `None` once `cancel` trips.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<QueueItem> {
        loop {
            let mut notified = std::pin::pin!(self.available.notified());
            notified.as_mut().enable();

            if let Some(item) = self.dequeue_next() {
                return Some(item);
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Register a named cron job that enqueues `payload` at `priority` on
    /// every occurrence. The schedule is validated here.
    pub fn register_cron_job(
        &self,
        name: impl Into<String>,
        schedule: &str,
        timezone: &str,
        priority: i32,
        payload: Value,
    ) -> Result<CronJobInfo, SchedulerError> {
        let name = name.into();
        let parsed =
            CronSchedule::new(schedule, timezone).map_err(|error| SchedulerError::InvalidSchedule {
                name: name.clone(),
                error,
            })?;
        let next_run = parsed
            .next_after(Utc::now())
            .ok_or_else(|| SchedulerError::NoOccurrence(name.clone()))?;

        let mut jobs = lock(&self.cron_jobs);
        if jobs.contains_key(&name) {
            return Err(SchedulerError::DuplicateJob(name));
        }
        let job = CronJob {
            schedule: parsed,
            source: schedule.trim().to_string(),
            timezone: timezone.to_string(),
            priority,
            payload,
            next_run: Some(next_run),
            last_enqueued: None,
        };
        let info = job.info(&name);
        jobs.insert(name.clone(), job);

        tracing::info!(job = %name, %next_run, "cron job registered");
        Ok(info)
    }

    pub fn unregister_cron_job(&self, name: &str) -> Result<(), SchedulerError> {
        lock(&self.cron_jobs)
            .remove(name)
            .map(|_| tracing::info!(job = name, "cron job unregistered"))
            .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))
    }

    /// Registered cron jobs, by name.
    pub fn cron_jobs(&self) -> Vec<CronJobInfo> {
        lock(&self.cron_jobs)
            .iter()
            .map(|(name, job)| job.info(name))
            .collect()
    }

    /// Enqueue every cron job due at `now` exactly once and advance it to
    /// its next occurrence after `now`. Returns the items enqueued.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        let mut due = Vec::new();
        {
            let mut jobs = lock(&self.cron_jobs);
            for (name, job) in jobs.iter_mut() {
                let Some(scheduled) = job.next_run.filter(|at| *at <= now) else {
                    continue;
                };

                let missed = job.missed_between(scheduled, now);
                if missed > 0 {
                    tracing::warn!(job = %name, missed, "missed cron occurrences collapsed into one run");
                }

                job.next_run = job.schedule.next_after(now);
                job.last_enqueued = Some(now);
                if job.next_run.is_none() {
                    tracing::info!(job = %name, "cron job has no further occurrences");
                }
                due.push((name.clone(), job.priority, job.payload.clone()));
            }
        }

        due.into_iter()
            .map(|(name, priority, payload)| {
                tracing::info!(job = %name, priority, "cron job fired");
                self.push(priority, payload, Some(name))
            })
            .collect()
    }

    /// Drive [`tick`](Self::tick) until `cancel` trips.
    pub async fn run(&self, cancel: CancellationToken, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_ms = poll_interval.as_millis() as u64, "job scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now());
                }
            }
        }

        tracing::info!("job scheduler stopped");
    }
}

impl CronJob {
    fn info(&self, name: &str) -> CronJobInfo {
        CronJobInfo {
            name: name.to_string(),
            schedule: self.source.clone(),
            timezone: self.timezone.clone(),
            priority: self.priority,
            next_run: self.next_run,
            last_enqueued: self.last_enqueued,
        }
    }

    /// Occurrences strictly after `scheduled` and at or before `now`.
    fn missed_between(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        let mut cursor = scheduled;
        while count < MISSED_SCAN_LIMIT {
            match self.schedule.next_after(cursor) {
                Some(at) if at <= now => {
                    count += 1;
                    cursor = at;
                }
                _ => break,
            }
        }
        count
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use serde_json::json;

    #[test]
    fn dequeues_by_priority_then_fifo() {
        let scheduler = JobScheduler::new();
        for (i, priority) in [1, 5, 3, 5, 2].into_iter().enumerate() {
            scheduler.enqueue(priority, json!(i));
        }
        assert_eq!(scheduler.len(), 5);

        let drained: Vec<(i32, Value)> = std::iter::from_fn(|| scheduler.dequeue_next())
            .map(|item| (item.priority, item.payload))
            .collect();
        assert_eq!(
            drained,
            vec![
                (5, json!(1)),
                (5, json!(3)),
                (3, json!(2)),
                (2, json!(4)),
                (1, json!(0)),
            ]
        );
        assert!(scheduler.is_empty());
        assert!(scheduler.dequeue_next().is_none());
    }

    #[test]
    fn sequence_breaks_timestamp_ties() {
        let now = Utc::now();
        let item = |sequence| QueueItem {
            id: Uuid::now_v7(),
            priority: 1,
            enqueued_at: now,
            sequence,
            source: None,
            payload: Value::Null,
        };
        assert!(Queued(item(1)) > Queued(item(2)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_dequeue_never_duplicates() {
        let scheduler = Arc::new(JobScheduler::new());
        for i in 0..200 {
            scheduler.enqueue(i % 7, json!(i));
        }

        let mut workers = Vec::new();
        for _ in 0..8 {
            let scheduler = Arc::clone(&scheduler);
            workers.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                while let Some(item) = scheduler.dequeue_next() {
                    taken.push(item.id);
                    tokio::task::yield_now().await;
                }
                taken
            }));
        }

        let mut seen = HashSet::new();
        for worker in workers {
            for id in worker.await.unwrap() {
                assert!(seen.insert(id), "item dequeued twice");
            }
        }
        assert_eq!(seen.len(), 200);
    }

    #[tokio::test]
    async fn next_waits_for_enqueue_and_stops_on_cancel() {
        let scheduler = Arc::new(JobScheduler::new());
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.next(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.enqueue(1, json!("late"));
        let item = waiter.await.unwrap().unwrap();
        assert_eq!(item.payload, json!("late"));

        let waiter = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.next(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn cron_jobs_validate_eagerly() {
        let scheduler = JobScheduler::new();
        let err = scheduler
            .register_cron_job("bad", "0 25 * * *", "UTC", 1, Value::Null)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { ref name, .. } if name == "bad"));

        let err = scheduler
            .register_cron_job("never", "0 0 30 2 *", "UTC", 1, Value::Null)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NoOccurrence(_)));

        scheduler
            .register_cron_job("nightly", "@daily", "Europe/Berlin", 1, Value::Null)
            .unwrap();
        let err = scheduler
            .register_cron_job("nightly", "@daily", "UTC", 1, Value::Null)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateJob(_)));

        assert_eq!(scheduler.cron_jobs().len(), 1);
        scheduler.unregister_cron_job("nightly").unwrap();
        assert!(scheduler.cron_jobs().is_empty());
        assert!(matches!(
            scheduler.unregister_cron_job("nightly").unwrap_err(),
            SchedulerError::UnknownJob(_)
        ));
    }

    #[test]
    fn tick_enqueues_each_occurrence_once() {
        let scheduler = JobScheduler::new();
        let info = scheduler
            .register_cron_job("report", "*/5 * * * *", "UTC", 7, json!({"kind": "report"}))
            .unwrap();
        let first = info.next_run.unwrap();

        assert!(scheduler.tick(first - chrono::Duration::seconds(1)).is_empty());

        let fired = scheduler.tick(first);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].priority, 7);
        assert_eq!(fired[0].source.as_deref(), Some("report"));
        assert!(scheduler.tick(first).is_empty());

        let info = &scheduler.cron_jobs()[0];
        assert_eq!(info.next_run, Some(first + chrono::Duration::minutes(5)));
        assert_eq!(info.last_enqueued, Some(first));

        // Three occurrences passed; they collapse into a single run.
        let later = first + chrono::Duration::minutes(15);
        assert_eq!(scheduler.tick(later).len(), 1);
        assert_eq!(
            scheduler.cron_jobs()[0].next_run,
            Some(later + chrono::Duration::minutes(5))
        );
        assert_eq!(scheduler.len(), 2);
    }

    #[tokio::test]
    async fn run_feeds_the_queue() {
        let scheduler = Arc::new(JobScheduler::new());
        scheduler
            .register_cron_job("pulse", "* * * * * *", "UTC", 1, json!("pulse"))
            .unwrap();

        let cancel = CancellationToken::new();
        let driver = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            async move { scheduler.run(cancel, Duration::from_millis(20)).await }
        });

        let item = tokio::time::timeout(Duration::from_secs(3), scheduler.next(&cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.source.as_deref(), Some("pulse"));

        cancel.cancel();
        driver.await.unwrap();
    }
}
