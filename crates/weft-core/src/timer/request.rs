//! Timer requests accepted by [`TimerManager::schedule`](super::TimerManager::schedule).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;
use weft_types::timer::TimerKind;
use weft_types::workflow::State;

/// When a requested timer should fire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FireAt {
    After(Duration),
    Cron { expression: String, timezone: String },
    At(DateTime<Utc>),
}

/// A single-fire timer to schedule. Cron timers re-arm themselves after
/// each fire.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerRequest {
    pub(crate) handler: String,
    pub(crate) kind: TimerKind,
    pub(crate) fire_at: FireAt,
    pub(crate) run_id: Option<Uuid>,
    pub(crate) payload: Value,
}

impl TimerRequest {
    fn new(handler: impl Into<String>, kind: TimerKind, fire_at: FireAt) -> Self {
        Self {
            handler: handler.into(),
            kind,
            fire_at,
            run_id: None,
            payload: Value::Null,
        }
    }

    /// Fire once, `delay` from now.
    pub fn delay(handler: impl Into<String>, delay: Duration) -> Self {
        Self::new(handler, TimerKind::Delay, FireAt::After(delay))
    }

    /// Fire once after a delay computed from run state, e.g. an exponential
    /// backoff stored under a state key.
    pub fn computed_delay<F>(handler: impl Into<String>, state: &State, compute: F) -> Self
    where
        F: FnOnce(&State) -> Duration,
    {
        Self::new(handler, TimerKind::ComputedDelay, FireAt::After(compute(state)))
    }

    /// Fire at every occurrence of a cron expression in `timezone`.
    pub fn cron(
        handler: impl Into<String>,
        expression: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Self::new(
            handler,
            TimerKind::Cron,
            FireAt::Cron {
                expression: expression.into(),
                timezone: timezone.into(),
            },
        )
    }

    /// Fire once at an absolute instant. Past instants fire on the next poll.
    pub fn until(handler: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self::new(handler, TimerKind::Until, FireAt::At(at))
    }

    pub fn for_run(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}
