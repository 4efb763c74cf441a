//! Cron expression engine.
//!
//! - `normalize` -- presets and human-readable schedules to 6-field cron
//! - `expression` -- parsing and occurrence search, backed by `croner`
//! - `schedule` -- an expression bound to an IANA timezone

pub mod expression;
pub mod normalize;
pub mod schedule;

pub use expression::CronExpression;
pub use normalize::normalize_schedule;
pub use schedule::CronSchedule;

/// Errors produced while parsing a cron expression or timezone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CronError {
    #[error("empty cron expression")]
    Empty,

    #[error("unrecognized schedule format: '{0}'")]
    UnrecognizedSchedule(String),

    #[error("expected 5 or 6 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Rejected by the cron parser.
    #[error("invalid cron expression '{expression}': {reason}")]
    Invalid { expression: String, reason: String },

    #[error("unknown timezone: '{0}'")]
    UnknownTimezone(String),
}
