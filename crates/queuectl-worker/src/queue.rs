//! Worker-side view of the job store.

use std::sync::Arc;
use std::time::Duration;

use queuectl_core::result::AppResult;
use queuectl_database::repositories::job::JobRepository;
use queuectl_database::repositories::worker::WorkerRepository;
use queuectl_entity::job::Job;

/// Job queue bound to one worker identity.
///
/// Every call goes straight to the store; the queue itself holds no job
/// state.
#[derive(Debug, Clone)]
pub struct JobQueue {
    /// Job repository for database persistence
    jobs: Arc<JobRepository>,
    /// Worker registry
    workers: Arc<WorkerRepository>,
    /// Identity stamped into `locked_by`
    worker_id: String,
    /// Lock age after which a `processing` job is reclaimed
    stale_after: Duration,
}

impl JobQueue {
    /// Create a new job queue
    pub fn new(
        jobs: Arc<JobRepository>,
        workers: Arc<WorkerRepository>,
        worker_id: impl Into<String>,
        stale_after: Duration,
    ) -> Self {
        Self {
            jobs,
            workers,
            worker_id: worker_id.into(),
            stale_after,
        }
    }

    /// The worker identity this queue acquires jobs for.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Acquire the next eligible job, if any.
    pub async fn dequeue(&self) -> AppResult<Option<Job>> {
        self.jobs.acquire(&self.worker_id, self.stale_after).await
    }

    /// Mark a job held by this worker as completed.
    pub async fn complete(&self, job_id: &str, output: Option<&str>) -> AppResult<Job> {
        self.jobs
            .report_success(job_id, &self.worker_id, output)
            .await
    }

    /// Record a failed attempt of a job held by this worker.
    pub async fn fail(&self, job_id: &str, error: &str, output: Option<&str>) -> AppResult<Job> {
        self.jobs
            .report_failure(job_id, &self.worker_id, error, output)
            .await
    }

    /// Look a job up by id.
    pub async fn find(&self, job_id: &str) -> AppResult<Option<Job>> {
        self.jobs.find_by_id(job_id).await
    }

    /// Register this worker; returns whether a stop was already requested.
    pub async fn register(&self) -> AppResult<bool> {
        self.workers
            .register(&self.worker_id, std::process::id())
            .await
            .map(|record| record.stop_requested)
    }

    /// Check in with the registry; returns whether a stop was requested.
    pub async fn heartbeat(&self) -> AppResult<bool> {
        self.workers
            .heartbeat(&self.worker_id, std::process::id())
            .await
    }

    /// Remove this worker from the registry.
    pub async fn deregister(&self) -> AppResult<()> {
        self.workers.deregister(&self.worker_id).await
    }
}
