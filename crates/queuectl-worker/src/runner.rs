//! Worker runner: the per-process loop that acquires, executes and
//! reports jobs.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::time;

use queuectl_core::config::WorkerConfig;
use queuectl_core::result::AppResult;
use queuectl_entity::job::Job;

use crate::executor::{ExecutionError, ExecutionResult, ShellExecutor};
use crate::queue::JobQueue;

/// Lifecycle of a worker.
///
/// `Idle -> Acquiring -> Executing -> Reporting -> Idle`, left through
/// `Draining -> Stopped` once shutdown is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Waiting between polls.
    Idle,
    /// Asking the store for a job.
    Acquiring,
    /// Running a job command.
    Executing,
    /// Writing the outcome back to the store.
    Reporting,
    /// Shutdown observed; no new jobs will be acquired.
    Draining,
    /// The loop has exited.
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counts of what a worker did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Jobs acquired and executed.
    pub processed: u64,
    /// Attempts reported as successful.
    pub succeeded: u64,
    /// Attempts reported as failed.
    pub failed: u64,
}

/// Runs one job at a time until told to stop.
#[derive(Debug)]
pub struct WorkerRunner {
    /// Job queue for acquiring and reporting
    queue: Arc<JobQueue>,
    /// Shell executor for job commands
    executor: ShellExecutor,
    /// Worker configuration
    config: WorkerConfig,
    /// Current lifecycle state
    state: watch::Sender<WorkerState>,
}

impl WorkerRunner {
    /// Create a new worker runner
    pub fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            executor: ShellExecutor::new(),
            config,
            state,
        }
    }

    /// The worker identity.
    pub fn worker_id(&self) -> &str {
        self.queue.worker_id()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribe to lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    fn transition(&self, next: WorkerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::trace!(worker_id = self.worker_id(), from = %previous, to = %next, "Worker state change");
        }
    }

    /// Run until `shutdown` turns true or a stop is requested through the
    /// worker registry.
    ///
    /// Shutdown is only observed between jobs: a job that has been acquired
    /// is always executed and its outcome reported before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> RunSummary {
        let mut summary = RunSummary::default();

        tracing::info!(
            worker_id = self.worker_id(),
            poll_interval_ms = self.config.poll_interval_ms,
            stale_lock_seconds = self.config.stale_lock_seconds,
            "Worker started"
        );

        let Some(mut stop_pending) = self.register(&mut shutdown).await else {
            self.transition(WorkerState::Stopped);
            return summary;
        };

        let heartbeat_every = self.config.heartbeat_interval();
        let mut last_heartbeat = Instant::now();

        loop {
            if stop_pending {
                tracing::info!(worker_id = self.worker_id(), "Stop requested through registry");
                break;
            }

            if *shutdown.borrow() {
                tracing::info!(worker_id = self.worker_id(), "Shutdown signal received");
                break;
            }

            if last_heartbeat.elapsed() >= heartbeat_every {
                last_heartbeat = Instant::now();
                stop_pending = self.stop_requested().await;
                if stop_pending {
                    continue;
                }
            }

            self.transition(WorkerState::Acquiring);
            match self.queue.dequeue().await {
                Ok(Some(job)) => {
                    let succeeded = self.process(job).await;
                    summary.processed += 1;
                    if succeeded {
                        summary.succeeded += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Ok(None) => {
                    self.transition(WorkerState::Idle);
                    if pause(&mut shutdown, self.config.poll_interval()).await {
                        tracing::info!(worker_id = self.worker_id(), "Shutdown signal received");
                        break;
                    }
                }
                Err(e) => {
                    self.transition(WorkerState::Idle);
                    tracing::error!(
                        worker_id = self.worker_id(),
                        error = %e,
                        backoff_ms = self.config.error_backoff_ms,
                        "Failed to acquire job, backing off"
                    );
                    if pause(&mut shutdown, self.config.error_backoff()).await {
                        break;
                    }
                }
            }
        }

        self.transition(WorkerState::Draining);
        if let Err(e) = self.queue.deregister().await {
            tracing::warn!(worker_id = self.worker_id(), error = %e, "Failed to deregister worker");
        }
        self.transition(WorkerState::Stopped);

        tracing::info!(
            worker_id = self.worker_id(),
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Worker stopped"
        );

        summary
    }

    /// Register with the store, retrying store errors until shutdown.
    /// Returns whether a stop was already requested, or `None` on shutdown.
    async fn register(&self, shutdown: &mut watch::Receiver<bool>) -> Option<bool> {
        loop {
            match self.queue.register().await {
                Ok(stop_pending) => return Some(stop_pending),
                Err(e) => {
                    tracing::error!(worker_id = self.worker_id(), error = %e, "Failed to register worker");
                    if pause(shutdown, self.config.error_backoff()).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn stop_requested(&self) -> bool {
        match self.queue.heartbeat().await {
            Ok(requested) => requested,
            Err(e) => {
                tracing::warn!(worker_id = self.worker_id(), error = %e, "Heartbeat failed");
                false
            }
        }
    }

    /// Execute one acquired job and report its outcome. Returns whether the
    /// attempt succeeded.
    async fn process(&self, job: Job) -> bool {
        self.transition(WorkerState::Executing);
        tracing::info!(
            worker_id = self.worker_id(),
            job_id = %job.id,
            command = %job.command,
            attempt = job.attempts + 1,
            max_retries = job.max_retries,
            "Processing job"
        );

        let outcome = self.execute_with_heartbeat(&job).await;

        self.transition(WorkerState::Reporting);
        let succeeded = outcome.is_ok();
        match &outcome {
            Ok(result) => tracing::info!(
                worker_id = self.worker_id(),
                job_id = %job.id,
                duration_ms = result.duration_ms,
                "Job succeeded"
            ),
            Err(e) => tracing::warn!(
                worker_id = self.worker_id(),
                job_id = %job.id,
                error = %e,
                "Job failed"
            ),
        }

        loop {
            match self.report(&job, &outcome).await {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    tracing::error!(
                        worker_id = self.worker_id(),
                        job_id = %job.id,
                        error = %e,
                        backoff_ms = self.config.error_backoff_ms,
                        "Failed to report job outcome, retrying"
                    );
                    time::sleep(self.config.error_backoff()).await;
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = self.worker_id(),
                        job_id = %job.id,
                        error = %e,
                        "Job outcome rejected, job is no longer held by this worker"
                    );
                    break;
                }
            }
        }

        self.transition(WorkerState::Idle);
        succeeded
    }

    /// Run the command while keeping the registry heartbeat fresh.
    async fn execute_with_heartbeat(&self, job: &Job) -> Result<ExecutionResult, ExecutionError> {
        let execution = self.executor.execute(job);
        tokio::pin!(execution);

        let heartbeat_every = self.config.heartbeat_interval();
        let mut ticker = time::interval_at(time::Instant::now() + heartbeat_every, heartbeat_every);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut execution => return outcome,
                _ = ticker.tick() => {
                    // A stop request is picked up after the job, by the main loop.
                    let _ = self.stop_requested().await;
                }
            }
        }
    }

    async fn report(
        &self,
        job: &Job,
        outcome: &Result<ExecutionResult, ExecutionError>,
    ) -> AppResult<()> {
        match outcome {
            Ok(result) => self
                .queue
                .complete(&job.id, result.output.as_deref())
                .await
                .map(|_| ()),
            Err(e) => self
                .queue
                .fail(&job.id, &e.to_string(), e.output())
                .await
                .map(|_| ()),
        }
    }
}

/// Sleep for `period`, waking early on shutdown. Returns whether shutdown
/// was signalled.
async fn pause(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        _ = time::sleep(period) => *shutdown.borrow(),
        Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => true,
    }
}
