//! Timer handlers, registered by name because closures cannot be persisted.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::timer::TimerRecord;

use super::TimerError;

/// What a handler sees when its timer fires.
#[derive(Debug, Clone)]
pub struct TimerContext {
    timer: TimerRecord,
    cancel: CancellationToken,
}

impl TimerContext {
    pub(crate) fn new(timer: TimerRecord, cancel: CancellationToken) -> Self {
        Self { timer, cancel }
    }

    pub fn timer_id(&self) -> Uuid {
        self.timer.id
    }

    /// The run that requested the wait, if any.
    pub fn run_id(&self) -> Option<Uuid> {
        self.timer.run_id
    }

    pub fn payload(&self) -> &Value {
        &self.timer.payload
    }

    /// When the timer was due (may be well in the past after downtime).
    pub fn scheduled_for(&self) -> DateTime<Utc> {
        self.timer.fire_at
    }

    /// 1-based occurrence number of a recurring cron timer.
    pub fn occurrence(&self) -> u32 {
        self.timer.occurrence
    }

    pub fn record(&self) -> &TimerRecord {
        &self.timer
    }

    /// Tripped when the timer manager is shutting down.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Logic invoked when a timer fires.
pub trait TimerHandler: Send + Sync {
    fn fire(&self, ctx: TimerContext) -> impl Future<Output = Result<(), TimerError>> + Send;
}

/// Object-safe version of [`TimerHandler`] with a boxed future.
pub trait TimerHandlerDyn: Send + Sync {
    fn fire_boxed<'a>(
        &'a self,
        ctx: TimerContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + 'a>>;
}

impl<T: TimerHandler> TimerHandlerDyn for T {
    fn fire_boxed<'a>(
        &'a self,
        ctx: TimerContext,
    ) -> Pin<Box<dyn Future<Output = Result<(), TimerError>> + Send + 'a>> {
        Box::pin(self.fire(ctx))
    }
}

/// Adapts an async closure into a [`TimerHandler`].
pub struct FnTimerHandler<F> {
    f: F,
}

impl<F> FnTimerHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TimerHandler for FnTimerHandler<F>
where
    F: Fn(TimerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TimerError>> + Send,
{
    fn fire(&self, ctx: TimerContext) -> impl Future<Output = Result<(), TimerError>> + Send {
        (self.f)(ctx)
    }
}
