//! Timer manager: persists timer requests and fires them when due.
//!
//! Every timer is written to the store before `schedule` returns, so a
//! process restart loses nothing. On startup `run` fires everything that
//! came due while the process was down, then polls on a fixed interval.
//! A timer is marked fired only after its handler returns, so a crash
//! mid-fire re-fires it on the next start (at-least-once).
//!
//! Each timer is re-read right before its handler runs, so a cancel that
//! lands after the due list was loaded still wins. Cancelling a run
//! cancels its pending timers and suppresses any later ones for that run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures_util::FutureExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::config::TimerSection;
use weft_types::timer::{TimerKind, TimerRecord, TimerStatus};

use super::handler::{TimerContext, TimerHandler, TimerHandlerDyn};
use super::request::{FireAt, TimerRequest};
use super::TimerError;
use crate::cron::CronSchedule;
use crate::repository::timer::TimerStore;

const DEFAULT_TIMEZONE: &str = "UTC";

/// Schedules, cancels and fires durable timers.
pub struct TimerManager<S: TimerStore> {
    store: Arc<S>,
    handlers: Arc<DashMap<String, Arc<dyn TimerHandlerDyn>>>,
    cancelled_runs: Arc<DashSet<Uuid>>,
    poll_interval: Duration,
    retention: Duration,
}

impl<S: TimerStore> Clone for TimerManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            handlers: Arc::clone(&self.handlers),
            cancelled_runs: Arc::clone(&self.cancelled_runs),
            poll_interval: self.poll_interval,
            retention: self.retention,
        }
    }
}

impl<S: TimerStore + 'static> TimerManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &TimerSection::default())
    }

    pub fn with_config(store: Arc<S>, config: &TimerSection) -> Self {
        Self {
            store,
            handlers: Arc::new(DashMap::new()),
            cancelled_runs: Arc::new(DashSet::new()),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register (or replace) the handler invoked for timers naming `name`.
    pub fn register_handler(&self, name: impl Into<String>, handler: impl TimerHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Persist a timer. The returned record is already durable.
    ///
    /// Cron expressions and timezones are validated here, not at fire time.
    pub async fn schedule(&self, request: TimerRequest) -> Result<TimerRecord, TimerError> {
        let now = Utc::now();
        let (fire_at, cron, timezone) = match request.fire_at {
            FireAt::After(delay) => {
                let delay = chrono::Duration::from_std(delay)
                    .map_err(|e| TimerError::InvalidDelay(e.to_string()))?;
                let at = now
                    .checked_add_signed(delay)
                    .ok_or_else(|| TimerError::InvalidDelay(format!("{delay} overflows")))?;
                (at, None, None)
            }
            FireAt::At(at) => (at, None, None),
            FireAt::Cron {
                expression,
                timezone,
            } => {
                let schedule = CronSchedule::new(&expression, &timezone)?;
                let at = schedule
                    .next_after(now)
                    .ok_or_else(|| TimerError::NoOccurrence(expression.clone()))?;
                (at, Some(expression), Some(timezone))
            }
        };

        let record = TimerRecord {
            id: Uuid::now_v7(),
            run_id: request.run_id,
            handler: request.handler,
            kind: request.kind,
            fire_at,
            cron,
            timezone,
            payload: request.payload,
            status: TimerStatus::Pending,
            created_at: now,
            fired_at: None,
            occurrence: 1,
        };
        self.store.save(&record).await?;

        if !self.has_handler(&record.handler) {
            tracing::warn!(
                timer_id = %record.id,
                handler = %record.handler,
                "timer scheduled for unregistered handler"
            );
        }
        tracing::info!(
            timer_id = %record.id,
            kind = record.kind.as_str(),
            fire_at = %record.fire_at,
            "timer scheduled"
        );
        Ok(record)
    }

    /// Mark a pending timer cancelled. Returns `false` if it already fired
    /// or was cancelled before.
    pub async fn cancel(&self, id: Uuid) -> Result<bool, TimerError> {
        let mut timer = self
            .store
            .load(&id)
            .await?
            .ok_or(TimerError::NotFound(id))?;
        if timer.status != TimerStatus::Pending {
            return Ok(false);
        }
        timer.status = TimerStatus::Cancelled;
        self.store.save(&timer).await?;
        tracing::info!(timer_id = %id, "timer cancelled");
        Ok(true)
    }

    /// Cancel every pending timer owned by `run_id` and refuse to fire any
    /// that show up for it later. Returns how many timers were cancelled.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<usize, TimerError> {
        self.cancelled_runs.insert(run_id);
        let mut cancelled = 0;
        for mut timer in self.store.list(Some(TimerStatus::Pending)).await? {
            if timer.run_id != Some(run_id) {
                continue;
            }
            timer.status = TimerStatus::Cancelled;
            self.store.save(&timer).await?;
            cancelled += 1;
        }
        tracing::info!(run_id = %run_id, count = cancelled, "run timers cancelled");
        Ok(cancelled)
    }

    /// Cancel the run's timers once `token` trips. Pass the token the run
    /// executes under so cancelling the run also stops its timers.
    pub fn cancel_run_on(&self, run_id: Uuid, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Err(e) = manager.cancel_run(run_id).await {
                tracing::error!(run_id = %run_id, error = %e, "failed to cancel run timers");
            }
        })
    }

    pub fn is_run_cancelled(&self, run_id: Uuid) -> bool {
        self.cancelled_runs.contains(&run_id)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TimerRecord>, TimerError> {
        Ok(self.store.load(&id).await?)
    }

    pub async fn list(&self, status: Option<TimerStatus>) -> Result<Vec<TimerRecord>, TimerError> {
        Ok(self.store.list(status).await?)
    }

    /// Fire every pending timer due at `now`, earliest first. Returns how
    /// many fired. Stops early (leaving the rest pending) once `cancel` trips.
    pub async fn fire_due(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<usize, TimerError> {
        let due = self.store.due(now).await?;
        let mut fired = 0;
        for timer in due {
            if cancel.is_cancelled() {
                break;
            }
            if self.fire(timer, now, cancel).await? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Fire everything that came due while the process was down.
    pub async fn recover(&self, cancel: &CancellationToken) -> Result<usize, TimerError> {
        let fired = self.fire_due(Utc::now(), cancel).await?;
        if fired > 0 {
            tracing::info!(count = fired, "fired overdue timers on startup");
        }
        Ok(fired)
    }

    /// Drop fired timers older than the retention window.
    pub async fn prune(&self, now: DateTime<Utc>) -> Result<usize, TimerError> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| TimerError::InvalidDelay(e.to_string()))?;
        let removed = self.store.prune_fired(now - retention).await?;
        if removed > 0 {
            tracing::debug!(count = removed, "pruned fired timers");
        }
        Ok(removed)
    }

    /// Recover, then poll until `cancel` trips. Store errors inside the
    /// loop are logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), TimerError> {
        self.recover(&cancel).await?;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_ms = self.poll_interval.as_millis() as u64, "timer manager started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Err(e) = self.fire_due(now, &cancel).await {
                        tracing::error!(error = %e, "timer poll failed");
                    }
                    if let Err(e) = self.prune(now).await {
                        tracing::warn!(error = %e, "timer prune failed");
                    }
                }
            }
        }

        tracing::info!("timer manager stopped");
        Ok(())
    }

    /// Returns `false` when the timer was skipped instead of fired.
    async fn fire(
        &self,
        timer: TimerRecord,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool, TimerError> {
        // The due list may be stale by now.
        let Some(mut timer) = self.store.load(&timer.id).await? else {
            return Ok(false);
        };
        if timer.status != TimerStatus::Pending {
            tracing::debug!(timer_id = %timer.id, status = timer.status.as_str(), "skipping timer no longer pending");
            return Ok(false);
        }
        if let Some(run_id) = timer.run_id.filter(|id| self.cancelled_runs.contains(id)) {
            timer.status = TimerStatus::Cancelled;
            self.store.save(&timer).await?;
            tracing::info!(timer_id = %timer.id, run_id = %run_id, "timer belongs to a cancelled run; not firing");
            return Ok(false);
        }

        let handler = self
            .handlers
            .get(&timer.handler)
            .map(|entry| Arc::clone(entry.value()));

        match handler {
            Some(handler) => {
                let ctx = TimerContext::new(timer.clone(), cancel.child_token());
                let outcome = AssertUnwindSafe(handler.fire_boxed(ctx)).catch_unwind().await;
                match outcome {
                    Ok(Ok(())) => tracing::info!(
                        timer_id = %timer.id,
                        handler = %timer.handler,
                        lateness_ms = (now - timer.fire_at).num_milliseconds(),
                        "timer fired"
                    ),
                    Ok(Err(e)) => tracing::warn!(
                        timer_id = %timer.id,
                        handler = %timer.handler,
                        error = %e,
                        "timer handler failed"
                    ),
                    Err(_) => tracing::error!(
                        timer_id = %timer.id,
                        handler = %timer.handler,
                        "timer handler panicked"
                    ),
                }
            }
            None => tracing::warn!(
                timer_id = %timer.id,
                handler = %timer.handler,
                "no handler registered; marking timer fired"
            ),
        }

        timer.status = TimerStatus::Fired;
        timer.fired_at = Some(Utc::now());
        self.store.save(&timer).await?;

        if timer.kind == TimerKind::Cron {
            self.rearm(&timer, now).await?;
        }
        Ok(true)
    }

    /// Persist the next occurrence of a cron timer as a new pending record.
    /// Occurrences missed during downtime collapse into the single fire
    /// that just happened.
    async fn rearm(&self, fired: &TimerRecord, now: DateTime<Utc>) -> Result<(), TimerError> {
        let Some(expression) = fired.cron.as_deref() else {
            tracing::error!(timer_id = %fired.id, "cron timer has no expression; not rescheduled");
            return Ok(());
        };
        let timezone = fired.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE);
        let schedule = match CronSchedule::new(expression, timezone) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::error!(timer_id = %fired.id, error = %e, "stored cron timer is invalid");
                return Ok(());
            }
        };
        let after = now.max(fired.fire_at);
        let Some(fire_at) = schedule.next_after(after) else {
            tracing::info!(timer_id = %fired.id, "cron timer has no further occurrences");
            return Ok(());
        };

        let next = TimerRecord {
            id: Uuid::now_v7(),
            fire_at,
            status: TimerStatus::Pending,
            created_at: Utc::now(),
            fired_at: None,
            occurrence: fired.occurrence.saturating_add(1),
            ..fired.clone()
        };
        self.store.save(&next).await?;
        tracing::debug!(
            timer_id = %next.id,
            previous = %fired.id,
            occurrence = next.occurrence,
            fire_at = %next.fire_at,
            "cron timer rescheduled"
        );
        Ok(())
    }
}
