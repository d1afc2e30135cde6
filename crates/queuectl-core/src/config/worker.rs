//! Background worker configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Worker loop and worker manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue has no eligible job, in milliseconds.
    #[validate(range(min = 10, max = 60000))]
    pub poll_interval_ms: u64,
    /// Back-off after a store error before the worker retries, in milliseconds.
    #[validate(range(min = 10, max = 600000))]
    pub error_backoff_ms: u64,
    /// Age after which a `processing` lock is considered abandoned.
    #[validate(range(min = 1))]
    pub stale_lock_seconds: u64,
    /// How long the manager waits for workers to drain before killing them.
    pub shutdown_grace_seconds: u64,
    /// Interval between worker registry heartbeats.
    #[validate(range(min = 1, max = 3600))]
    pub heartbeat_interval_seconds: u64,
    /// Cron expression (with seconds) for the periodic stale-lock sweep.
    #[validate(length(min = 1))]
    pub reclaim_schedule: String,
    /// Lost acquisition races tolerated per `acquire` call.
    #[validate(range(min = 1, max = 1000))]
    pub contention_retries: u32,
    /// Path to the worker executable. Defaults to `queuectl-worker` next to
    /// the running binary.
    pub binary: Option<String>,
}

impl WorkerConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Error back-off as a [`Duration`].
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Stale-lock threshold as a [`Duration`].
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_seconds)
    }

    /// Shutdown grace period as a [`Duration`].
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            error_backoff_ms: default_error_backoff(),
            stale_lock_seconds: default_stale_lock(),
            shutdown_grace_seconds: default_shutdown_grace(),
            heartbeat_interval_seconds: default_heartbeat_interval(),
            reclaim_schedule: default_reclaim_schedule(),
            contention_retries: default_contention_retries(),
            binary: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_error_backoff() -> u64 {
    5_000
}

fn default_stale_lock() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_reclaim_schedule() -> String {
    "0 * * * * *".to_string()
}

fn default_contention_retries() -> u32 {
    8
}
