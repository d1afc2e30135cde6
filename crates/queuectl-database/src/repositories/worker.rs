//! Worker registry repository.

use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;

use queuectl_core::result::AppResult;
use queuectl_entity::worker::WorkerRecord;

use super::db_error;
use crate::timestamp;

/// Registry of running worker processes.
///
/// Workers check in periodically; the row doubles as the channel through
/// which `queuectl worker stop` asks them to drain.
#[derive(Debug, Clone)]
pub struct WorkerRepository {
    pool: SqlitePool,
}

impl WorkerRepository {
    /// Create a new worker repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Register a worker, or refresh its pid and heartbeat if a row for it
    /// already exists.
    ///
    /// A stop already requested for the id is kept: the manager records its
    /// children before they start, and a stop sent in that window must still
    /// reach them.
    pub async fn register(&self, id: &str, pid: u32) -> AppResult<WorkerRecord> {
        let now = timestamp::encode(Utc::now());

        let record = sqlx::query_as::<_, WorkerRecord>(
            "INSERT INTO workers (id, pid, started_at, heartbeat_at, stop_requested) \
             VALUES (?1, ?2, ?3, ?3, 0) \
             ON CONFLICT(id) DO UPDATE SET pid = excluded.pid, heartbeat_at = excluded.heartbeat_at \
             RETURNING *",
        )
        .bind(id)
        .bind(i64::from(pid))
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to register worker"))?;

        tracing::info!(worker_id = id, pid, "Worker registered");
        Ok(record)
    }

    /// Record a heartbeat and return whether a stop has been requested.
    ///
    /// A worker whose row has been pruned is registered again.
    pub async fn heartbeat(&self, id: &str, pid: u32) -> AppResult<bool> {
        let now = timestamp::encode(Utc::now());

        sqlx::query_scalar::<_, bool>(
            "INSERT INTO workers (id, pid, started_at, heartbeat_at, stop_requested) \
             VALUES (?1, ?2, ?3, ?3, 0) \
             ON CONFLICT(id) DO UPDATE SET heartbeat_at = excluded.heartbeat_at \
             RETURNING stop_requested",
        )
        .bind(id)
        .bind(i64::from(pid))
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error("Failed to record heartbeat"))
    }

    /// Ask workers to drain and stop. `None` targets every registered worker.
    pub async fn request_stop(&self, ids: Option<&[String]>) -> AppResult<u64> {
        let requested = match ids {
            None => sqlx::query("UPDATE workers SET stop_requested = 1 WHERE stop_requested = 0")
                .execute(&self.pool)
                .await
                .map_err(db_error("Failed to request worker stop"))?
                .rows_affected(),
            Some(ids) => {
                let mut requested = 0;
                for id in ids {
                    requested += sqlx::query(
                        "UPDATE workers SET stop_requested = 1 WHERE id = ?1 AND stop_requested = 0",
                    )
                    .bind(id)
                    .execute(&self.pool)
                    .await
                    .map_err(db_error("Failed to request worker stop"))?
                    .rows_affected();
                }
                requested
            }
        };

        tracing::info!(requested, "Worker stop requested");
        Ok(requested)
    }

    /// Remove a worker from the registry.
    pub async fn deregister(&self, id: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM workers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to deregister worker"))?;

        tracing::info!(worker_id = id, "Worker deregistered");
        Ok(())
    }

    /// All registered workers, oldest first.
    pub async fn list(&self) -> AppResult<Vec<WorkerRecord>> {
        sqlx::query_as::<_, WorkerRecord>("SELECT * FROM workers ORDER BY started_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list workers"))
    }

    /// Workers that checked in within `within`.
    pub async fn count_active(&self, within: Duration) -> AppResult<i64> {
        let cutoff = timestamp::before(Utc::now(), within);

        sqlx::query_scalar("SELECT COUNT(*) FROM workers WHERE heartbeat_at >= ?1")
            .bind(timestamp::encode(cutoff))
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to count workers"))
    }

    /// Drop registry rows that have not checked in within `within`.
    pub async fn prune_dead(&self, within: Duration) -> AppResult<u64> {
        let cutoff = timestamp::before(Utc::now(), within);

        let pruned = sqlx::query("DELETE FROM workers WHERE heartbeat_at < ?1")
            .bind(timestamp::encode(cutoff))
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to prune workers"))?
            .rows_affected();

        if pruned > 0 {
            tracing::info!(pruned, "Pruned silent workers from registry");
        }
        Ok(pruned)
    }
}
