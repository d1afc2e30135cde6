//! Cron scheduler for the periodic stale-lock sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use queuectl_core::error::AppError;
use queuectl_database::repositories::job::JobRepository;

/// Runs `reclaim_stale_locks` on a cron schedule, independent of any
/// single worker.
pub struct ReclaimScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Job repository to sweep
    jobs: Arc<JobRepository>,
    /// Lock age after which a job is reclaimed
    stale_after: Duration,
}

impl std::fmt::Debug for ReclaimScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimScheduler")
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl ReclaimScheduler {
    /// Create a new scheduler
    pub async fn new(jobs: Arc<JobRepository>, stale_after: Duration) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            jobs,
            stale_after,
        })
    }

    /// Register the sweep on `schedule` (six-field cron, seconds first).
    pub async fn register(&self, schedule: &str) -> Result<(), AppError> {
        let jobs = Arc::clone(&self.jobs);
        let stale_after = self.stale_after;

        let job = CronJob::new_async(schedule, move |_uuid, _lock| {
            let jobs = Arc::clone(&jobs);
            Box::pin(async move {
                match jobs.reclaim_stale_locks(stale_after).await {
                    Ok(0) => tracing::trace!("Stale-lock sweep found nothing"),
                    Ok(count) => tracing::info!(count, "Stale-lock sweep reclaimed jobs"),
                    Err(e) => tracing::error!(error = %e, "Stale-lock sweep failed"),
                }
            })
        })
        .map_err(|e| {
            AppError::configuration(format!("Invalid reclaim schedule '{schedule}': {e}"))
        })?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add reclaim schedule: {e}")))?;

        tracing::info!(
            schedule,
            stale_after_seconds = stale_after.as_secs(),
            "Registered: stale-lock sweep"
        );
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> Result<(), AppError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {e}")))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> Result<(), AppError> {
        // `JobScheduler::shutdown` needs `&mut self`; the handle is a cheap clone.
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {e}")))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }
}
