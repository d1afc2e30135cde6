//! Runtime-tunable queue settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use queuectl_core::error::AppError;
use queuectl_core::result::AppResult;

/// A setting stored in the `config` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettingKey {
    /// Default retry budget for newly enqueued jobs.
    MaxRetries,
    /// Base of the exponential backoff, in seconds.
    BackoffBase,
}

impl SettingKey {
    /// Every known setting.
    pub const ALL: [SettingKey; 2] = [Self::MaxRetries, Self::BackoffBase];

    /// Name used on the command line.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MaxRetries => "max-retries",
            Self::BackoffBase => "backoff-base",
        }
    }

    /// Row key in the `config` table.
    pub fn storage_key(&self) -> &'static str {
        match self {
            Self::MaxRetries => "max_retries",
            Self::BackoffBase => "backoff_base",
        }
    }

    /// Value used when the row is missing.
    pub fn default_value(&self) -> i64 {
        match self {
            Self::MaxRetries => 3,
            Self::BackoffBase => 2,
        }
    }

    /// Check that `value` is acceptable for this setting.
    pub fn validate(&self, value: i64) -> AppResult<()> {
        let min = match self {
            Self::MaxRetries => 0,
            Self::BackoffBase => 1,
        };
        if value < min {
            return Err(AppError::validation(format!(
                "{} must be at least {min}, got {value}",
                self.display_name()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SettingKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.display_name() == s || k.storage_key() == s)
            .ok_or_else(|| {
                AppError::validation(format!(
                    "Unknown config key: {s} (available keys: max-retries, backoff-base)"
                ))
            })
    }
}
