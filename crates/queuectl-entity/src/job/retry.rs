//! Exponential backoff retry policy.
//!
//! A failed attempt either schedules the job again after
//! `base ^ attempts` seconds or, once `attempts` exceeds `max_retries`,
//! sends it to the dead letter queue.

use std::time::Duration;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Make the job eligible again after `delay`.
    Retry {
        /// Backoff before the next attempt.
        delay: Duration,
    },
    /// Retries exhausted; move the job to `dead`.
    Terminal,
}

/// Decide what happens to a job after its `attempts_after_failure`-th failure.
///
/// `base` and `max_retries` are passed in by the caller at decision time;
/// the policy holds no state.
pub fn decide(attempts_after_failure: i64, base: i64, max_retries: i64) -> RetryDecision {
    if attempts_after_failure > max_retries {
        return RetryDecision::Terminal;
    }

    let exponent = u32::try_from(attempts_after_failure.max(0)).unwrap_or(u32::MAX);
    let base = u64::try_from(base.max(0)).unwrap_or(0);

    RetryDecision::Retry {
        delay: Duration::from_secs(base.saturating_pow(exponent)),
    }
}
