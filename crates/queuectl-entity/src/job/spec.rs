//! Validated job submission payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use queuectl_core::error::AppError;
use queuectl_core::result::AppResult;

/// Data required to enqueue a new job.
///
/// Parsed and validated before any row is created; unknown fields are
/// rejected rather than silently ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Job identity. A random UUID is assigned when omitted.
    #[validate(length(min = 1, max = 255))]
    pub id: Option<String>,
    /// Shell command line.
    #[validate(length(min = 1))]
    pub command: String,
    /// Retries allowed; defaults to the store's `max-retries` setting.
    #[validate(range(min = 0, max = 1000))]
    pub max_retries: Option<i64>,
    /// Earliest execution time.
    pub run_at: Option<DateTime<Utc>>,
    /// Execution time limit in seconds.
    #[validate(range(min = 1))]
    pub timeout: Option<i64>,
}

impl JobSpec {
    /// Create a spec for `command` with every optional field unset.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Set the job id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: i64) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Schedule the job for later.
    pub fn with_run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// Set the execution timeout in seconds.
    pub fn with_timeout(mut self, seconds: i64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// Parse and validate a JSON job payload.
    pub fn from_json(payload: &str) -> AppResult<Self> {
        let spec: Self = serde_json::from_str(payload)
            .map_err(|e| AppError::with_source(
                queuectl_core::error::ErrorKind::Validation,
                format!("Invalid job JSON: {e}"),
                e,
            ))?;
        spec.check()?;
        Ok(spec)
    }

    /// Run field validation plus the checks the derive cannot express.
    pub fn check(&self) -> AppResult<()> {
        self.validate()?;

        if self.command.trim().is_empty() {
            return Err(AppError::validation("Job command must not be blank"));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() || id.chars().any(char::is_control) {
                return Err(AppError::validation(format!("Invalid job id '{id}'")));
            }
        }

        Ok(())
    }
}
