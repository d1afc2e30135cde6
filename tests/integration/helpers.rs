//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use queuectl_core::config::{AppConfig, DatabaseConfig, WorkerConfig};
use queuectl_database::{DatabasePool, JobRepository, SettingsRepository, WorkerRepository, timestamp};
use queuectl_entity::job::{Job, JobState};

/// A throwaway store in its own temp directory.
pub struct TestStore {
    /// Keeps the directory alive for the duration of the test
    pub dir: TempDir,
    /// Open pool on the store file
    pub db: DatabasePool,
    /// Job repository
    pub jobs: JobRepository,
    /// Settings repository
    pub settings: SettingsRepository,
    /// Worker registry
    pub workers: WorkerRepository,
}

impl TestStore {
    /// Create and migrate a fresh store.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = DatabasePool::open(&database_config(&dir))
            .await
            .expect("Failed to open test store");
        let pool = db.pool().clone();

        Self {
            jobs: JobRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool.clone()),
            workers: WorkerRepository::new(pool),
            db,
            dir,
        }
    }

    /// Raw pool for direct queries.
    pub fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Path of the store file.
    pub fn db_path(&self) -> String {
        database_config(&self.dir).path
    }

    /// Open a second, independent pool on the same file, the way another
    /// worker process would.
    pub async fn reopen(&self) -> DatabasePool {
        DatabasePool::connect(&database_config(&self.dir))
            .await
            .expect("Failed to reopen test store")
    }

    /// Fetch a job that must exist.
    pub async fn job(&self, id: &str) -> Job {
        self.jobs
            .find_by_id(id)
            .await
            .expect("Failed to load job")
            .unwrap_or_else(|| panic!("job {id} missing"))
    }

    /// Move a timestamp column of `id` into the past by `age`.
    pub async fn backdate(&self, id: &str, column: &str, age: Duration) {
        let at = timestamp::before(Utc::now(), age);
        let sql = format!("UPDATE jobs SET {column} = ?1 WHERE id = ?2");
        sqlx::query(&sql)
            .bind(timestamp::encode(at))
            .bind(id)
            .execute(self.pool())
            .await
            .expect("Failed to backdate job");
    }

    /// Make a job scheduled for later eligible now.
    pub async fn make_due(&self, id: &str) {
        self.backdate(id, "run_at", Duration::from_secs(1)).await;
    }

    /// Poll until every listed job is in a terminal state.
    pub async fn wait_terminal(&self, ids: &[&str], within: Duration) -> Vec<Job> {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let mut jobs = Vec::with_capacity(ids.len());
            for id in ids {
                jobs.push(self.job(id).await);
            }
            if jobs.iter().all(|j| j.state.is_terminal()) {
                return jobs;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "jobs did not finish in time: {:?}",
                jobs.iter().map(|j| (&j.id, j.state)).collect::<Vec<_>>()
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Poll until `state` holds `count` jobs.
    pub async fn wait_count(&self, state: JobState, count: i64, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            let current = self.jobs.count_by_state(state).await.expect("Failed to count jobs");
            if current == count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {state} jobs, found {current}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// An application config pointing at this store with fast timings.
    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            database: database_config(&self.dir),
            worker: fast_worker_config(),
            ..Default::default()
        }
    }

    /// Write `app_config()` to a TOML file a worker process can load.
    pub fn write_config_file(&self, grace_seconds: u64) -> PathBuf {
        let path = self.dir.path().join("queuectl.toml");
        let config = self.app_config();
        let toml = format!(
            "[database]\npath = {path:?}\n\n\
             [worker]\npoll_interval_ms = {poll}\nerror_backoff_ms = {backoff}\n\
             heartbeat_interval_seconds = {heartbeat}\nshutdown_grace_seconds = {grace_seconds}\n\n\
             [logging]\nlevel = \"warn\"\n",
            path = config.database.path,
            poll = config.worker.poll_interval_ms,
            backoff = config.worker.error_backoff_ms,
            heartbeat = config.worker.heartbeat_interval_seconds,
        );
        std::fs::write(&path, toml).expect("Failed to write config file");
        path
    }
}

/// Store settings for a database file inside `dir`.
pub fn database_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("queue.db").to_string_lossy().into_owned(),
        ..Default::default()
    }
}

/// Worker settings tuned for tests.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval_ms: 50,
        error_backoff_ms: 100,
        heartbeat_interval_seconds: 1,
        ..Default::default()
    }
}

/// Repositories on an independent pool, shared the way a worker shares them.
pub fn repositories(db: &DatabasePool) -> (Arc<JobRepository>, Arc<WorkerRepository>) {
    (
        Arc::new(JobRepository::new(db.pool().clone())),
        Arc::new(WorkerRepository::new(db.pool().clone())),
    )
}

/// Whether `pid` is a live process. Zombies count as gone; without a
/// `/proc` filesystem every process counts as gone.
pub fn process_running(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}
