//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section. Runtime-tunable retry settings (`max-retries`,
//! `backoff-base`) are not part of this file-based configuration; they
//! live in the store and are read fresh on every retry decision.

pub mod database;
pub mod logging;
pub mod worker;

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use self::database::DatabaseConfig;
pub use self::logging::LoggingConfig;
pub use self::worker::WorkerConfig;

use crate::error::AppError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "QUEUECTL";

/// Root application configuration.
///
/// Top-level deserialization target for the merged TOML configuration
/// (base file + optional environment overlay + `QUEUECTL__*` variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite store settings.
    #[validate(nested)]
    pub database: DatabaseConfig,
    /// Worker loop and manager settings.
    #[validate(nested)]
    pub worker: WorkerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    ///
    /// Merges the given file (optional, defaults apply when it is missing),
    /// an overlay named after `QUEUECTL_ENV` next to it (e.g.
    /// `config/production.toml`), and environment variables prefixed with
    /// `QUEUECTL__` using `__` as the section separator.
    pub fn load(config_path: &str) -> Result<Self, AppError> {
        let mut builder =
            config::Config::builder().add_source(config::File::from(Path::new(config_path)).required(false));

        if let Ok(env) = std::env::var(format!("{ENV_PREFIX}_ENV")) {
            let overlay = Path::new(config_path)
                .with_file_name(format!("{env}.toml"));
            builder = builder.add_source(config::File::from(overlay).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config
            .validate()
            .map_err(|e| AppError::configuration(format!("Invalid configuration: {e}")))?;

        Ok(config)
    }
}
