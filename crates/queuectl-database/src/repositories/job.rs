//! Job repository: the durable job table and its locking protocol.
//!
//! This is the only code that mutates job rows. Acquisition is optimistic:
//! a worker picks the oldest eligible pending row, then tries a conditional
//! `pending -> processing` write on that row. If the write matches nothing,
//! another worker got there first and the selection is repeated.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use queuectl_core::error::{AppError, ErrorKind};
use queuectl_core::result::AppResult;
use queuectl_entity::job::retry::{self, RetryDecision};
use queuectl_entity::job::{Job, JobSpec, JobState, QueueStats};

use super::settings::SettingsRepository;
use super::{CasOutcome, db_error, retry_lost};
use crate::timestamp;

/// Lost races tolerated per `acquire` or outcome write before giving up.
pub const DEFAULT_CONTENTION_RETRIES: u32 = 8;

/// Repository for job persistence and queue operations.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
    settings: SettingsRepository,
    contention_retries: u32,
}

impl JobRepository {
    /// Create a new job repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            settings: SettingsRepository::new(pool.clone()),
            pool,
            contention_retries: DEFAULT_CONTENTION_RETRIES,
        }
    }

    /// Override how many lost races a single call tolerates.
    pub fn with_contention_retries(mut self, retries: u32) -> Self {
        self.contention_retries = retries.max(1);
        self
    }

    /// Find a job by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Job>> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to find job"))
    }

    /// Insert a new pending job.
    ///
    /// Fails with `Conflict` when a job with the same id already exists and
    /// with `Validation` when the spec is malformed. A spec without
    /// `max_retries` takes the current `max-retries` setting.
    pub async fn enqueue(&self, spec: &JobSpec) -> AppResult<Job> {
        spec.check()?;

        let id = spec
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_retries = match spec.max_retries {
            Some(n) => n,
            None => self.settings.max_retries().await?,
        };
        let now = timestamp::encode(Utc::now());

        let job = sqlx::query_as::<_, Job>(
            "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, run_at, timeout) \
             VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5, ?6, ?7) RETURNING *",
        )
        .bind(&id)
        .bind(&spec.command)
        .bind(JobState::Pending)
        .bind(max_retries)
        .bind(&now)
        .bind(spec.run_at.map(timestamp::encode))
        .bind(spec.timeout)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            err if err.kind == ErrorKind::Conflict => {
                AppError::conflict(format!("Job '{id}' already exists"))
            }
            err => AppError {
                message: format!("Failed to enqueue job: {}", err.message),
                ..err
            },
        })?;

        tracing::info!(
            job_id = %job.id,
            max_retries = job.max_retries,
            run_at = ?job.run_at,
            timeout = ?job.timeout,
            "Enqueued job"
        );

        Ok(job)
    }

    /// Acquire the oldest eligible job for `worker_id`.
    ///
    /// Locks older than `stale_after` are reclaimed first. Returns `None` when
    /// nothing is eligible, or when every candidate was taken by other
    /// workers within the contention budget; the caller polls again either
    /// way.
    pub async fn acquire(&self, worker_id: &str, stale_after: Duration) -> AppResult<Option<Job>> {
        self.reclaim_stale_locks(stale_after).await?;

        let acquired = retry_lost(self.contention_retries, || self.claim_next(worker_id)).await?;

        match acquired {
            Some(Some(job)) => {
                tracing::debug!(job_id = %job.id, worker_id, "Acquired job");
                Ok(Some(job))
            }
            Some(None) => Ok(None),
            None => {
                tracing::debug!(
                    worker_id,
                    retries = self.contention_retries,
                    "Every candidate was taken by another worker"
                );
                Ok(None)
            }
        }
    }

    /// One pass of the acquisition protocol: select, then conditionally claim.
    async fn claim_next(&self, worker_id: &str) -> AppResult<CasOutcome<Option<Job>>> {
        let now = Utc::now();

        let candidate: Option<String> = sqlx::query_scalar(
            "SELECT id FROM jobs \
             WHERE state = 'pending' AND (run_at IS NULL OR run_at <= ?1) \
             ORDER BY created_at ASC, rowid ASC \
             LIMIT 1",
        )
        .bind(timestamp::encode(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to select next job"))?;

        let Some(job_id) = candidate else {
            return Ok(CasOutcome::Applied(None));
        };

        Ok(match self.try_claim(&job_id, worker_id, now).await? {
            CasOutcome::Applied(job) => CasOutcome::Applied(Some(job)),
            CasOutcome::Lost => CasOutcome::Lost,
        })
    }

    /// Conditionally move `job_id` from `pending` to `processing`.
    ///
    /// The write only applies while the row is still pending and eligible at
    /// `now`; otherwise it reports [`CasOutcome::Lost`].
    pub async fn try_claim(
        &self,
        job_id: &str,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<CasOutcome<Job>> {
        let now = timestamp::encode(now);

        let claimed = sqlx::query_as::<_, Job>(
            "UPDATE jobs \
             SET state = 'processing', locked_by = ?2, locked_at = ?3, updated_at = ?3 \
             WHERE id = ?1 AND state = 'pending' AND (run_at IS NULL OR run_at <= ?3) \
             RETURNING *",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to claim job"))?;

        Ok(CasOutcome::from_returning(claimed))
    }

    /// Record a successful attempt: `processing -> completed`.
    ///
    /// Only the worker holding the lock may report. Terminal jobs are
    /// immutable; reporting on a job that is not processing, or whose lock
    /// has passed to another worker, fails with `InvalidState`.
    pub async fn report_success(
        &self,
        job_id: &str,
        worker_id: &str,
        output: Option<&str>,
    ) -> AppResult<Job> {
        let now = timestamp::encode(Utc::now());

        let completed = sqlx::query_as::<_, Job>(
            "UPDATE jobs \
             SET state = 'completed', output = ?3, locked_by = NULL, locked_at = NULL, updated_at = ?4 \
             WHERE id = ?1 AND state = 'processing' AND locked_by = ?2 \
             RETURNING *",
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(output)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to complete job"))?;

        match completed {
            Some(job) => {
                tracing::info!(job_id, worker_id, attempts = job.attempts, "Job completed");
                Ok(job)
            }
            None => Err(self.report_rejection(job_id, worker_id).await),
        }
    }

    /// Record a failed attempt reported by the lock holder.
    ///
    /// Increments `attempts` and asks the retry policy what happens next,
    /// using the `backoff-base` setting as it is right now. The job goes back
    /// to `pending` with `run_at = now + delay`, or to `dead` once its retry
    /// budget is spent.
    pub async fn report_failure(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        output: Option<&str>,
    ) -> AppResult<Job> {
        retry_lost(self.contention_retries, || {
            self.fail_once(job_id, worker_id, error, output)
        })
            .await?
            .ok_or_else(|| {
                AppError::store_unavailable(format!(
                    "Gave up recording failure of job '{job_id}' after repeated concurrent updates"
                ))
            })
    }

    /// Read the attempt count, decide, then write guarded by that count and
    /// by the lock holder.
    async fn fail_once(
        &self,
        job_id: &str,
        worker_id: &str,
        error: &str,
        output: Option<&str>,
    ) -> AppResult<CasOutcome<Job>> {
        let job = self
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Job '{job_id}' not found")))?;

        if let Some(reason) = not_held_by(&job, worker_id) {
            return Err(reason);
        }

        let attempts = job.attempts + 1;
        let base = self.settings.backoff_base().await?;
        let now = Utc::now();

        let (state, run_at) = match retry::decide(attempts, base, job.max_retries) {
            RetryDecision::Retry { delay } => {
                (JobState::Pending, Some(timestamp::after(now, delay)))
            }
            RetryDecision::Terminal => (JobState::Dead, None),
        };

        let updated = sqlx::query_as::<_, Job>(
            "UPDATE jobs \
             SET state = ?3, attempts = ?4, error = ?5, output = ?6, run_at = ?7, \
                 locked_by = NULL, locked_at = NULL, updated_at = ?8 \
             WHERE id = ?1 AND state = 'processing' AND attempts = ?2 AND locked_by = ?9 \
             RETURNING *",
        )
        .bind(job_id)
        .bind(job.attempts)
        .bind(state)
        .bind(attempts)
        .bind(error)
        .bind(output)
        .bind(run_at.map(timestamp::encode))
        .bind(timestamp::encode(now))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to record job failure"))?;

        if let Some(job) = &updated {
            match job.state {
                JobState::Dead => tracing::warn!(
                    job_id,
                    attempts,
                    error,
                    "Job exhausted its retries, moved to DLQ"
                ),
                _ => tracing::info!(
                    job_id,
                    attempts,
                    max_retries = job.max_retries,
                    run_at = ?job.run_at,
                    "Job failed, retry scheduled"
                ),
            }
        }

        Ok(CasOutcome::from_returning(updated))
    }

    /// Move a dead job back to `pending` with a fresh retry budget.
    ///
    /// Resets `attempts` to 0 and clears `error`, `output`, `run_at` and the
    /// lock fields.
    pub async fn dlq_retry(&self, job_id: &str) -> AppResult<Job> {
        let now = timestamp::encode(Utc::now());

        let revived = sqlx::query_as::<_, Job>(
            "UPDATE jobs \
             SET state = 'pending', attempts = 0, error = NULL, output = NULL, run_at = NULL, \
                 locked_by = NULL, locked_at = NULL, updated_at = ?2 \
             WHERE id = ?1 AND state = 'dead' \
             RETURNING *",
        )
        .bind(job_id)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to retry job"))?;

        match revived {
            Some(job) => {
                tracing::info!(job_id, "Job moved from DLQ back to pending");
                Ok(job)
            }
            None => Err(self.rejection(job_id, JobState::Dead).await),
        }
    }

    /// List jobs, newest first, optionally filtered by state.
    pub async fn list(&self, state: Option<JobState>, limit: i64) -> AppResult<Vec<Job>> {
        let query = match state {
            Some(state) => sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs WHERE state = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )
            .bind(state)
            .bind(limit),
            None => sqlx::query_as::<_, Job>(
                "SELECT * FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
            )
            .bind(limit),
        };

        query
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list jobs"))
    }

    /// Release locks held longer than `stale_after`.
    ///
    /// Abandoned jobs go back to `pending` without being charged an attempt,
    /// since their outcome was never observed. Only rows that are still
    /// `processing` with an old enough `locked_at` are touched.
    pub async fn reclaim_stale_locks(&self, stale_after: Duration) -> AppResult<u64> {
        let now = Utc::now();
        let cutoff = timestamp::before(now, stale_after);

        let reclaimed: Vec<String> = sqlx::query_scalar(
            "UPDATE jobs \
             SET state = 'pending', locked_by = NULL, locked_at = NULL, updated_at = ?1 \
             WHERE state = 'processing' AND locked_at < ?2 \
             RETURNING id",
        )
        .bind(timestamp::encode(now))
        .bind(timestamp::encode(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("Failed to reclaim stale locks"))?;

        for job_id in &reclaimed {
            tracing::warn!(job_id = %job_id, "Reclaimed stale lock, job is pending again");
        }

        Ok(reclaimed.len() as u64)
    }

    /// Count jobs in a given state.
    pub async fn count_by_state(&self, state: JobState) -> AppResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE state = ?1")
            .bind(state)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count jobs"))
    }

    /// Job counts for every state.
    pub async fn stats(&self) -> AppResult<QueueStats> {
        let rows: Vec<(JobState, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error("Failed to compute queue stats"))?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            stats.set(state, count);
        }
        Ok(stats)
    }

    /// Delete terminal jobs in `states` whose last update is before `before`.
    pub async fn cleanup(&self, before: DateTime<Utc>, states: &[JobState]) -> AppResult<u64> {
        if let Some(state) = states.iter().find(|s| !s.is_terminal()) {
            return Err(AppError::validation(format!(
                "Refusing to delete {state} jobs; only completed and dead jobs can be cleaned up"
            )));
        }

        let cutoff = timestamp::encode(before);
        let mut deleted = 0;
        for state in states {
            deleted += sqlx::query("DELETE FROM jobs WHERE state = ?1 AND updated_at < ?2")
                .bind(*state)
                .bind(&cutoff)
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to clean up jobs"))?
                .rows_affected();
        }

        tracing::info!(deleted, before = %cutoff, "Cleaned up old jobs");
        Ok(deleted)
    }

    /// Explain why a conditional write on `job_id` matched nothing.
    async fn rejection(&self, job_id: &str, expected: JobState) -> AppError {
        match self.find_by_id(job_id).await {
            Ok(None) => AppError::not_found(format!("Job '{job_id}' not found")),
            Ok(Some(job)) => AppError::invalid_state(format!(
                "Job '{job_id}' is {}, expected {expected}",
                job.state
            )),
            Err(e) => e,
        }
    }

    async fn report_rejection(&self, job_id: &str, worker_id: &str) -> AppError {
        match self.find_by_id(job_id).await {
            Ok(None) => AppError::not_found(format!("Job '{job_id}' not found")),
            Ok(Some(job)) => not_held_by(&job, worker_id).unwrap_or_else(|| {
                AppError::invalid_state(format!("Job '{job_id}' changed while reporting"))
            }),
            Err(e) => e,
        }
    }
}

/// Why `worker_id` may not report on `job`, if it may not.
fn not_held_by(job: &Job, worker_id: &str) -> Option<AppError> {
    if job.state != JobState::Processing {
        return Some(AppError::invalid_state(format!(
            "Job '{}' is {}, expected processing",
            job.id, job.state
        )));
    }
    match job.locked_by.as_deref() {
        Some(holder) if holder == worker_id => None,
        holder => Some(AppError::invalid_state(format!(
            "Job '{}' is held by '{}', not '{worker_id}'",
            job.id,
            holder.unwrap_or("nobody")
        ))),
    }
}
