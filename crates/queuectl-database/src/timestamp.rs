//! Timestamp encoding for TEXT columns.
//!
//! Every timestamp is written as RFC 3339 UTC with exactly six fractional
//! digits and a `Z` suffix, so comparing the stored strings gives the same
//! answer as comparing the instants. Computed instants are clamped to
//! years 1..=9999 so they stay within the four-digit year format.

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeDelta, Utc};

/// Encode `at` for storage or comparison in SQL.
pub fn encode(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Latest instant that keeps a four-digit year.
pub fn latest() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_micro_opt(23, 59, 59, 999_999))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Earliest instant that keeps a four-digit year.
pub fn earliest() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `at + delay`, clamped to [`latest`].
pub fn after(at: DateTime<Utc>, delay: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .map_or_else(latest, |t| t.min(latest()))
}

/// `at - age`, clamped to [`earliest`].
pub fn before(at: DateTime<Utc>, age: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|d| at.checked_sub_signed(d))
        .map_or_else(earliest, |t| t.max(earliest()))
}
