//! Worker management CLI commands.

use std::sync::Arc;

use clap::{Args, Subcommand};

use super::Context;
use crate::output;
use queuectl_core::error::AppError;
use queuectl_database::{JobRepository, WorkerRepository};
use queuectl_worker::WorkerManager;
use queuectl_worker::signal::shutdown_channel;

/// Arguments for worker commands
#[derive(Debug, Args)]
pub struct WorkerArgs {
    /// Worker subcommand
    #[command(subcommand)]
    pub command: WorkerCommand,
}

/// Worker subcommands
#[derive(Debug, Subcommand)]
pub enum WorkerCommand {
    /// Start worker processes in the foreground; Ctrl+C stops them gracefully
    Start {
        /// Number of workers to start
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
        count: u16,
    },
    /// Ask every running worker to finish its current job and exit
    Stop,
}

/// Execute worker commands
pub async fn execute(args: &WorkerArgs, ctx: &Context) -> Result<(), AppError> {
    let db = ctx.open_store().await?;
    let workers = Arc::new(WorkerRepository::new(db.pool().clone()));

    match &args.command {
        WorkerCommand::Start { count } => {
            let jobs = Arc::new(
                JobRepository::new(db.pool().clone())
                    .with_contention_retries(ctx.config.worker.contention_retries),
            );
            let mut manager = WorkerManager::new(
                ctx.config.clone(),
                &ctx.config_path,
                jobs,
                Arc::clone(&workers),
            )?;

            println!("→ Starting {count} worker(s)...");
            manager.spawn(usize::from(*count)).await?;
            output::print_success("Workers started. Press Ctrl+C to stop gracefully.");

            let report = manager.run(shutdown_channel()).await?;
            output::print_success(&format!(
                "All workers stopped ({} started)",
                report.spawned.len()
            ));
        }
        WorkerCommand::Stop => {
            let requested = workers.request_stop(None).await?;
            if requested == 0 {
                output::print_warning("No running workers found");
            } else {
                output::print_success(&format!("Stop requested for {requested} worker(s)"));
            }
        }
    }

    db.close().await;
    Ok(())
}
