//! Database configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// SQLite store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Created on first use.
    #[validate(length(min = 1))]
    pub path: String,
    /// Maximum number of connections in the pool.
    #[validate(range(min = 1, max = 64))]
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_path() -> String {
    "queuectl.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_busy_timeout() -> u64 {
    5_000
}
