//! Timer records: persisted, single-fire waits requested by workflow steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a timer's fire time was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Fixed delay from the moment of scheduling.
    Delay,
    /// Delay computed from run state at schedule time.
    ComputedDelay,
    /// Next occurrence of a cron expression (recurring).
    Cron,
    /// Absolute timestamp.
    Until,
}

impl TimerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerKind::Delay => "delay",
            TimerKind::ComputedDelay => "computed_delay",
            TimerKind::Cron => "cron",
            TimerKind::Until => "until",
        }
    }
}

/// Lifecycle status of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerStatus {
    Pending,
    Fired,
    Cancelled,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Pending => "pending",
            TimerStatus::Fired => "fired",
            TimerStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for TimerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TimerStatus::Pending),
            "fired" => Ok(TimerStatus::Fired),
            "cancelled" => Ok(TimerStatus::Cancelled),
            other => Err(format!("unknown timer status: '{other}'")),
        }
    }
}

/// A persisted timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerRecord {
    /// UUIDv7 timer id.
    pub id: Uuid,
    /// The run that requested the wait, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Name of the registered handler invoked when the timer fires.
    pub handler: String,
    /// How the fire time was determined.
    pub kind: TimerKind,
    /// When the timer is due.
    pub fire_at: DateTime<Utc>,
    /// Cron expression for `Cron` timers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// IANA timezone the cron expression is evaluated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Opaque data handed to the handler.
    #[serde(default)]
    pub payload: Value,
    /// Current status.
    pub status: TimerStatus,
    /// When the timer was scheduled.
    pub created_at: DateTime<Utc>,
    /// When the timer fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    /// 1-based occurrence counter for recurring cron timers.
    #[serde(default = "first_occurrence")]
    pub occurrence: u32,
}

fn first_occurrence() -> u32 {
    1
}

impl TimerRecord {
    /// Whether the timer is pending and its fire time has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TimerStatus::Pending && self.fire_at <= now
    }
}
