//! Queue items for the priority job scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A pending run request waiting in the priority queue.
///
/// Ordered by `priority` descending, then `enqueued_at` ascending, then
/// `sequence` ascending (tie-break when timestamps collide).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// UUIDv7 item id.
    pub id: Uuid,
    /// Higher runs first.
    pub priority: i32,
    /// When the item was enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic enqueue counter assigned by the scheduler.
    pub sequence: u64,
    /// Name of the cron job that produced this item, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Opaque run payload.
    pub payload: Value,
}
