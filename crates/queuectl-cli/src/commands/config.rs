//! Runtime settings CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};
use queuectl_core::error::AppError;
use queuectl_database::SettingsRepository;
use queuectl_entity::settings::SettingKey;

/// Arguments for config commands
#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show one setting, or all of them
    Get {
        /// Setting name (max-retries, backoff-base)
        key: Option<String>,
    },
    /// Change a setting
    Set {
        /// Setting name (max-retries, backoff-base)
        key: String,
        /// Integer value
        value: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct SettingRow {
    /// Key
    #[tabled(rename = "Key")]
    key: String,
    /// Value
    #[tabled(rename = "Value")]
    value: i64,
}

/// Execute config commands
pub async fn execute(args: &ConfigArgs, ctx: &Context) -> Result<(), AppError> {
    // Parse before touching the store so typos never create a database file.
    let request = match &args.command {
        ConfigCommand::Get { key } => {
            let key = key.as_deref().map(str::parse::<SettingKey>).transpose()?;
            (key, None)
        }
        ConfigCommand::Set { key, value } => {
            let key: SettingKey = key.parse()?;
            let value = parse_value(key, value)?;
            (Some(key), Some(value))
        }
    };

    let db = ctx.open_store().await?;
    let settings = SettingsRepository::new(db.pool().clone());

    match request {
        (Some(key), Some(value)) => {
            settings.set(key, value).await?;
            output::print_success(&format!("{key} = {value}"));
        }
        (Some(key), None) => {
            let value = settings.get(key).await?;
            match ctx.format {
                OutputFormat::Json => output::print_json(&SettingRow {
                    key: key.to_string(),
                    value,
                }),
                OutputFormat::Table => println!("{key}: {value}"),
            }
        }
        (None, _) => {
            let rows: Vec<SettingRow> = settings
                .all()
                .await?
                .into_iter()
                .map(|(key, value)| SettingRow {
                    key: key.to_string(),
                    value,
                })
                .collect();
            output::print_list(&rows, ctx.format, "No settings.");
        }
    }

    db.close().await;
    Ok(())
}

fn parse_value(key: SettingKey, raw: &str) -> Result<i64, AppError> {
    let value = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::validation(format!("Value for {key} must be an integer, got '{raw}'")))?;
    key.validate(value)?;
    Ok(value)
}
