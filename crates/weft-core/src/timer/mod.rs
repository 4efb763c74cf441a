//! Durable timers: delays, computed delays, cron waits and absolute deadlines.
//!
//! - `request` -- what to schedule
//! - `handler` -- named handlers invoked when a timer fires
//! - `manager` -- scheduling, cancellation, recovery and the polling loop

pub mod handler;
pub mod manager;
pub mod request;

pub use handler::{FnTimerHandler, TimerContext, TimerHandler};
pub use manager::TimerManager;
pub use request::TimerRequest;

use uuid::Uuid;
use weft_types::error::RepositoryError;

use crate::cron::CronError;

/// Errors from timer scheduling and firing.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// Underlying store operation failed.
    #[error("timer store error: {0}")]
    Repository(#[from] RepositoryError),

    /// Cron expression or timezone rejected at schedule time.
    #[error("invalid cron timer: {0}")]
    Cron(#[from] CronError),

    #[error("cron schedule '{0}' has no upcoming occurrence")]
    NoOccurrence(String),

    #[error("delay out of range: {0}")]
    InvalidDelay(String),

    #[error("timer not found: {0}")]
    NotFound(Uuid),

    /// Returned by a handler to report a failed fire.
    #[error("timer handler failed: {0}")]
    Handler(String),
}

impl TimerError {
    pub fn handler(message: impl Into<String>) -> Self {
        TimerError::Handler(message.into())
    }
}
