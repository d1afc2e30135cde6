//! CLI command definitions and dispatch.

pub mod cleanup;
pub mod config;
pub mod dlq;
pub mod enqueue;
pub mod list;
pub mod reclaim;
pub mod status;
pub mod worker;

pub use worker::WorkerCommand;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use queuectl_core::config::AppConfig;
use queuectl_core::error::AppError;
use queuectl_database::DatabasePool;
use queuectl_entity::job::Job;

/// queuectl: a persistent job queue with retries and a dead letter queue
#[derive(Debug, Parser)]
#[command(name = "queuectl", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Enqueue a job from a JSON payload
    Enqueue(enqueue::EnqueueArgs),
    /// Start or stop workers
    Worker(worker::WorkerArgs),
    /// Show job counts and active workers
    Status,
    /// List jobs
    List(list::ListArgs),
    /// Dead letter queue operations
    Dlq(dlq::DlqArgs),
    /// Runtime settings
    Config(config::ConfigArgs),
    /// Delete old finished jobs
    Cleanup(cleanup::CleanupArgs),
    /// Release stale job locks now
    Reclaim(reclaim::ReclaimArgs),
}

/// Everything a command needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration
    pub config: AppConfig,
    /// Path the configuration was loaded from
    pub config_path: String,
    /// Output format
    pub format: OutputFormat,
}

impl Context {
    /// Open the store, creating and migrating it if needed.
    pub async fn open_store(&self) -> Result<DatabasePool, AppError> {
        DatabasePool::open(&self.config.database).await
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        let ctx = Context {
            config,
            config_path: self.config.clone(),
            format: self.format,
        };

        match &self.command {
            Commands::Enqueue(args) => enqueue::execute(args, &ctx).await,
            Commands::Worker(args) => worker::execute(args, &ctx).await,
            Commands::Status => status::execute(&ctx).await,
            Commands::List(args) => list::execute(args, &ctx).await,
            Commands::Dlq(args) => dlq::execute(args, &ctx).await,
            Commands::Config(args) => config::execute(args, &ctx).await,
            Commands::Cleanup(args) => cleanup::execute(args, &ctx).await,
            Commands::Reclaim(args) => reclaim::execute(args, &ctx).await,
        }
    }
}

/// Table row for a job listing.
#[derive(Debug, Serialize, Tabled)]
pub struct JobRow {
    /// Job ID
    #[tabled(rename = "ID")]
    id: String,
    /// Command
    #[tabled(rename = "Command")]
    command: String,
    /// State
    #[tabled(rename = "State")]
    state: String,
    /// Attempts over retry budget
    #[tabled(rename = "Attempts")]
    attempts: String,
    /// Next eligible time
    #[tabled(rename = "Run At")]
    run_at: String,
    /// Creation time
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            command: output::truncate(&job.command, 50),
            state: job.state.to_string(),
            attempts: format!("{}/{}", job.attempts, job.max_retries),
            run_at: job
                .run_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            created: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Print jobs as a table, or the full rows as JSON.
pub fn print_jobs(jobs: &[Job], format: OutputFormat, empty: &str) {
    match format {
        OutputFormat::Json => output::print_json(jobs),
        OutputFormat::Table => {
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
            output::print_list(&rows, format, empty);
        }
    }
}
