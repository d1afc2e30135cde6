//! Job entity model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::status::JobState;

/// A queued unit of shell work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Job {
    /// Caller-supplied identity.
    pub id: String,
    /// Shell command line to execute.
    pub command: String,
    /// Current lifecycle state.
    pub state: JobState,
    /// Execution attempts made so far.
    pub attempts: i64,
    /// Retries allowed before the job moves to the dead letter queue.
    pub max_retries: i64,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job row last changed.
    pub updated_at: DateTime<Utc>,
    /// Last failure message.
    pub error: Option<String>,
    /// Captured stdout/stderr of the last attempt.
    pub output: Option<String>,
    /// The job is not eligible for acquisition before this time.
    pub run_at: Option<DateTime<Utc>>,
    /// Execution time limit in seconds.
    pub timeout: Option<i64>,
    /// Worker currently holding the job.
    pub locked_by: Option<String>,
    /// When the current lock was taken.
    pub locked_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Whether a pending job may be acquired at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at.is_none_or(|at| at <= now)
    }

    /// Whether the job is held by a worker.
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for a worker.
    pub pending: i64,
    /// Jobs held by a worker.
    pub processing: i64,
    /// Jobs that finished successfully.
    pub completed: i64,
    /// Jobs in the legacy failed state.
    pub failed: i64,
    /// Jobs in the dead letter queue.
    pub dead: i64,
}

impl QueueStats {
    /// Record `count` jobs in `state`.
    pub fn set(&mut self, state: JobState, count: i64) {
        match state {
            JobState::Pending => self.pending = count,
            JobState::Processing => self.processing = count,
            JobState::Completed => self.completed = count,
            JobState::Failed => self.failed = count,
            JobState::Dead => self.dead = count,
        }
    }

    /// Count of jobs in `state`.
    pub fn get(&self, state: JobState) -> i64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    /// Total number of jobs.
    pub fn total(&self) -> i64 {
        JobState::ALL.iter().map(|s| self.get(*s)).sum()
    }
}
