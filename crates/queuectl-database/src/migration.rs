//! Schema migrations embedded from the workspace `migrations/` directory.

use sqlx::SqlitePool;
use sqlx::migrate::Migrator;

use queuectl_core::error::{AppError, ErrorKind};

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Bring the store schema up to date. Safe to call on every open; applied
/// versions are skipped.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    let latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or_default();
    tracing::debug!(latest, "Applying store migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::StoreUnavailable,
            format!("Store schema migration failed: {e}"),
            e,
        )
    })?;

    tracing::debug!(latest, "Store schema is current");
    Ok(())
}
