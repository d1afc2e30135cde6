//! Worker manager: spawns worker processes and shuts them down.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time;

use queuectl_core::config::{AppConfig, ENV_PREFIX};
use queuectl_core::error::{AppError, ErrorKind};
use queuectl_core::result::AppResult;
use queuectl_database::repositories::job::JobRepository;
use queuectl_database::repositories::worker::WorkerRepository;

use crate::scheduler::ReclaimScheduler;

/// File name of the worker executable.
pub const WORKER_BINARY: &str = "queuectl-worker";

/// How often the manager checks on its children.
const MONITOR_INTERVAL: Duration = Duration::from_millis(250);

/// A spawned worker process.
#[derive(Debug)]
struct WorkerProcess {
    id: String,
    child: Child,
}

/// What happened to the workers by the time the manager returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerReport {
    /// Worker ids that were spawned.
    pub spawned: Vec<String>,
    /// Workers that exited on their own or after draining.
    pub exited: usize,
    /// Workers that had to be force-killed after the grace period.
    pub killed: usize,
}

/// Spawns `count` worker processes and supervises them.
///
/// Workers share nothing with the manager but the store. Shutdown is
/// propagated through the worker registry; workers that have not exited
/// within the grace period are killed, which is reported as an error.
#[derive(Debug)]
pub struct WorkerManager {
    /// Loaded application configuration
    config: AppConfig,
    /// Configuration file forwarded to each worker
    config_path: PathBuf,
    /// Worker executable
    binary: PathBuf,
    /// Job repository used by the stale-lock sweep
    jobs: Arc<JobRepository>,
    /// Worker registry
    workers: Arc<WorkerRepository>,
    /// Running children
    children: Vec<WorkerProcess>,
    /// Accumulated report
    report: ManagerReport,
}

impl WorkerManager {
    /// Create a manager.
    ///
    /// The worker executable is `worker.binary` from the configuration, or
    /// `queuectl-worker` next to the running executable.
    pub fn new(
        config: AppConfig,
        config_path: impl Into<PathBuf>,
        jobs: Arc<JobRepository>,
        workers: Arc<WorkerRepository>,
    ) -> AppResult<Self> {
        let binary = match &config.worker.binary {
            Some(path) => PathBuf::from(path),
            None => sibling_binary()?,
        };

        Ok(Self {
            config,
            config_path: config_path.into(),
            binary,
            jobs,
            workers,
            children: Vec::new(),
            report: ManagerReport::default(),
        })
    }

    /// Use a specific worker executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Ids of the workers currently supervised.
    pub fn worker_ids(&self) -> Vec<String> {
        self.children.iter().map(|w| w.id.clone()).collect()
    }

    /// Spawn `count` worker processes, each with a fresh `worker-<8 hex>` id.
    pub async fn spawn(&mut self, count: usize) -> AppResult<Vec<String>> {
        if !self.binary.exists() {
            return Err(AppError::configuration(format!(
                "Worker executable not found at '{}'",
                self.binary.display()
            )));
        }

        let liveness = self.config.worker.heartbeat_interval() * 3;
        self.workers.prune_dead(liveness).await?;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let id = new_worker_id();
            let child = self.command(&id).spawn().map_err(|e| {
                AppError::with_source(
                    ErrorKind::Internal,
                    format!("Failed to spawn worker '{id}': {e}"),
                    e,
                )
            })?;

            // Record the child now so a stop sent before it registers
            // itself still reaches it.
            if let Some(pid) = child.id() {
                self.workers.register(&id, pid).await?;
            }

            tracing::info!(worker_id = %id, pid = ?child.id(), "Spawned worker");
            self.report.spawned.push(id.clone());
            ids.push(id.clone());
            self.children.push(WorkerProcess { id, child });
        }

        tracing::info!(count, binary = %self.binary.display(), "Started workers");
        Ok(ids)
    }

    fn command(&self, id: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--id")
            .arg(id)
            .arg("--config")
            .arg(&self.config_path)
            .env(
                format!("{ENV_PREFIX}__DATABASE__PATH"),
                &self.config.database.path,
            )
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Supervise the workers until they all exit or `shutdown` turns true,
    /// then stop them. The stale-lock sweep runs for as long as this does.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<ManagerReport> {
        let scheduler = ReclaimScheduler::new(
            Arc::clone(&self.jobs),
            self.config.worker.stale_after(),
        )
        .await?;
        scheduler.register(&self.config.worker.reclaim_schedule).await?;
        scheduler.start().await?;

        let mut ticker = time::interval(MONITOR_INTERVAL);
        loop {
            tokio::select! {
                Ok(()) = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
                    tracing::info!("Shutdown signal received, stopping workers");
                    break;
                }
                _ = ticker.tick() => {
                    self.reap();
                    if self.children.is_empty() {
                        tracing::info!("All workers exited");
                        break;
                    }
                }
            }
        }

        let stopped = self.stop().await;
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Failed to stop reclaim scheduler");
        }
        stopped?;

        Ok(self.report.clone())
    }

    /// Ask every worker to drain, wait out the grace period, and kill
    /// whatever is still running.
    pub async fn stop(&mut self) -> AppResult<()> {
        if self.children.is_empty() {
            return Ok(());
        }

        let ids = self.worker_ids();
        self.workers.request_stop(Some(&ids)).await?;

        let grace = self.config.worker.shutdown_grace();
        tracing::info!(workers = ids.len(), grace_seconds = grace.as_secs(), "Waiting for workers to drain");

        let deadline = time::Instant::now() + grace;
        while !self.children.is_empty() && time::Instant::now() < deadline {
            time::sleep(MONITOR_INTERVAL.min(deadline.saturating_duration_since(time::Instant::now()))).await;
            self.reap();
        }

        if self.children.is_empty() {
            tracing::info!("All workers stopped");
            return Ok(());
        }

        let survivors = self.worker_ids();
        for mut worker in self.children.drain(..) {
            tracing::error!(worker_id = %worker.id, "Worker did not stop within grace period, killing");
            if let Err(e) = worker.child.kill().await {
                tracing::error!(worker_id = %worker.id, error = %e, "Failed to kill worker");
            }
            self.report.killed += 1;
        }
        for id in &survivors {
            if let Err(e) = self.workers.deregister(id).await {
                tracing::warn!(worker_id = %id, error = %e, "Failed to deregister killed worker");
            }
        }

        Err(AppError::internal(format!(
            "{} worker(s) were force-killed after {}s: {}",
            survivors.len(),
            grace.as_secs(),
            survivors.join(", ")
        )))
    }

    /// Drop children that have exited.
    fn reap(&mut self) {
        let report = &mut self.report;
        self.children.retain_mut(|worker| match worker.child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    tracing::info!(worker_id = %worker.id, "Worker exited");
                } else {
                    tracing::warn!(worker_id = %worker.id, status = %status, "Worker exited abnormally");
                }
                report.exited += 1;
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(worker_id = %worker.id, error = %e, "Failed to poll worker");
                true
            }
        });
    }
}

/// A fresh worker identity.
pub fn new_worker_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("worker-{}", &hex[..8])
}

fn sibling_binary() -> AppResult<PathBuf> {
    let exe = std::env::current_exe()?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    Ok(dir.join(format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX)))
}
