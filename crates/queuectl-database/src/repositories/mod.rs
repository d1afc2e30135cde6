//! Concrete repository implementations.

pub mod job;
pub mod settings;
pub mod worker;

use std::future::Future;

use queuectl_core::error::AppError;
use queuectl_core::result::AppResult;

/// Result of a single conditional write.
///
/// `Lost` means the row no longer matched the write's precondition because
/// another process changed it first. It is an expected outcome under
/// contention, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// The write matched its precondition and was applied.
    Applied(T),
    /// Zero rows matched; someone else won the race.
    Lost,
}

impl<T> CasOutcome<T> {
    /// Build an outcome from an optional `RETURNING` row.
    pub fn from_returning(row: Option<T>) -> Self {
        match row {
            Some(value) => Self::Applied(value),
            None => Self::Lost,
        }
    }
}

/// Run `op` until it applies, retrying lost races up to `max_attempts` times.
///
/// Returns `Ok(None)` once the budget is exhausted. Real errors abort the
/// loop immediately.
pub async fn retry_lost<T, F, Fut>(max_attempts: u32, mut op: F) -> AppResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<CasOutcome<T>>>,
{
    for attempt in 1..=max_attempts.max(1) {
        match op().await? {
            CasOutcome::Applied(value) => return Ok(Some(value)),
            CasOutcome::Lost => {
                tracing::debug!(attempt, max_attempts, "Conditional write lost a race, retrying");
            }
        }
    }
    Ok(None)
}

/// Map a sqlx error into an [`AppError`] that keeps its kind and adds `context`.
pub(crate) fn db_error(context: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |err| {
        let mapped = AppError::from(err);
        AppError {
            message: format!("{context}: {}", mapped.message),
            ..mapped
        }
    }
}
