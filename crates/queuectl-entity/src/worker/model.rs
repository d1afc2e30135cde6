//! Worker registry row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A worker process that has registered with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkerRecord {
    /// Worker identity, also used as the job lock holder.
    pub id: String,
    /// Operating system process id.
    pub pid: i64,
    /// When the worker registered.
    pub started_at: DateTime<Utc>,
    /// Last time the worker checked in.
    pub heartbeat_at: DateTime<Utc>,
    /// Whether the worker has been asked to drain and stop.
    pub stop_requested: bool,
}

impl WorkerRecord {
    /// Whether the worker checked in within `window` of `now`.
    pub fn is_alive(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.heartbeat_at <= window
    }
}
