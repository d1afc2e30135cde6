//! Dead letter queue CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};
use queuectl_core::error::AppError;
use queuectl_database::JobRepository;
use queuectl_entity::job::{Job, JobState};

/// Arguments for DLQ commands
#[derive(Debug, Args)]
pub struct DlqArgs {
    /// DLQ subcommand
    #[command(subcommand)]
    pub command: DlqCommand,
}

/// DLQ subcommands
#[derive(Debug, Subcommand)]
pub enum DlqCommand {
    /// List dead jobs
    List {
        /// Maximum number of jobs to show
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Move a dead job back to pending with a fresh retry budget
    Retry {
        /// Job ID
        job_id: String,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct DeadJobRow {
    /// Job ID
    #[tabled(rename = "ID")]
    id: String,
    /// Command
    #[tabled(rename = "Command")]
    command: String,
    /// Attempts
    #[tabled(rename = "Attempts")]
    attempts: i64,
    /// Last error
    #[tabled(rename = "Last Error")]
    error: String,
}

impl From<&Job> for DeadJobRow {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            command: output::truncate(&job.command, 40),
            attempts: job.attempts,
            error: output::truncate(job.error.as_deref().unwrap_or("Unknown"), 60),
        }
    }
}

/// Execute DLQ commands
pub async fn execute(args: &DlqArgs, ctx: &Context) -> Result<(), AppError> {
    let db = ctx.open_store().await?;
    let jobs = JobRepository::new(db.pool().clone());

    match &args.command {
        DlqCommand::List { limit } => {
            let dead = jobs.list(Some(JobState::Dead), *limit).await?;
            match ctx.format {
                OutputFormat::Json => output::print_json(&dead),
                OutputFormat::Table => {
                    let rows: Vec<DeadJobRow> = dead.iter().map(DeadJobRow::from).collect();
                    output::print_list(&rows, ctx.format, "DLQ is empty.");
                }
            }
        }
        DlqCommand::Retry { job_id } => {
            let job = jobs.dlq_retry(job_id).await?;
            match ctx.format {
                OutputFormat::Json => output::print_json(&job),
                OutputFormat::Table => {
                    output::print_success(&format!("Job {} moved back to pending", job.id))
                }
            }
        }
    }

    db.close().await;
    Ok(())
}
