//! Runtime settings repository (`config` table).

use sqlx::SqlitePool;

use queuectl_core::error::{AppError, ErrorKind};
use queuectl_core::result::AppResult;
use queuectl_entity::settings::SettingKey;

use super::db_error;

/// Reads and writes the integer settings consulted by the retry policy.
///
/// Values are never cached: every read goes to the store so a change made
/// with `queuectl config set` is seen by the next retry decision.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    /// Create a new settings repository.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Current value of `key`, or its default when unset.
    pub async fn get(&self, key: SettingKey) -> AppResult<i64> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?1")
            .bind(key.storage_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to read setting"))?;

        match raw {
            None => Ok(key.default_value()),
            Some(raw) => raw.trim().parse::<i64>().map_err(|e| {
                AppError::with_source(
                    ErrorKind::Configuration,
                    format!("Stored value for {key} is not an integer: '{raw}'"),
                    e,
                )
            }),
        }
    }

    /// Store `value` for `key` after validating it.
    pub async fn set(&self, key: SettingKey, value: i64) -> AppResult<()> {
        key.validate(value)?;

        sqlx::query(
            "INSERT INTO config (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key.storage_key())
        .bind(value.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to write setting"))?;

        tracing::info!(key = %key, value, "Setting updated");
        Ok(())
    }

    /// Every setting with its current value.
    pub async fn all(&self) -> AppResult<Vec<(SettingKey, i64)>> {
        let mut values = Vec::with_capacity(SettingKey::ALL.len());
        for key in SettingKey::ALL {
            values.push((key, self.get(key).await?));
        }
        Ok(values)
    }

    /// Default retry budget for new jobs.
    pub async fn max_retries(&self) -> AppResult<i64> {
        self.get(SettingKey::MaxRetries).await
    }

    /// Backoff base in seconds.
    pub async fn backoff_base(&self) -> AppResult<i64> {
        self.get(SettingKey::BackoffBase).await
    }
}
