//! queuectl worker process.
//!
//! Runs exactly one worker loop against the configured store. Started by
//! `queuectl worker start`, but can also be run by hand.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use queuectl_core::config::AppConfig;
use queuectl_core::error::AppError;
use queuectl_database::{DatabasePool, JobRepository, WorkerRepository};
use queuectl_worker::manager::new_worker_id;
use queuectl_worker::signal::shutdown_channel;
use queuectl_worker::{JobQueue, WorkerRunner};

/// Run a single queuectl worker
#[derive(Debug, Parser)]
#[command(name = "queuectl-worker", version, about, long_about = None)]
struct Args {
    /// Worker identity used for job locks (random when omitted)
    #[arg(long)]
    id: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,
}

fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start runtime");
            std::process::exit(1);
        }
    };

    let worker_id = args.id.unwrap_or_else(new_worker_id);
    if let Err(e) = runtime.block_on(run(config, worker_id)) {
        tracing::error!(error = %e, "Worker error");
        std::process::exit(1);
    }
}

/// Initialize tracing. Each worker's log lines carry its id, so the output
/// of several workers under one manager can be told apart.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.is_json() {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        fmt()
            .compact()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

async fn run(config: AppConfig, worker_id: String) -> Result<(), AppError> {
    tracing::info!(
        worker_id = %worker_id,
        database = %config.database.path,
        "Starting queuectl-worker v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = DatabasePool::open(&config.database).await?;

    let jobs = Arc::new(
        JobRepository::new(db.pool().clone())
            .with_contention_retries(config.worker.contention_retries),
    );
    let workers = Arc::new(WorkerRepository::new(db.pool().clone()));
    let queue = Arc::new(JobQueue::new(
        jobs,
        workers,
        worker_id,
        config.worker.stale_after(),
    ));
    let runner = WorkerRunner::new(queue, config.worker.clone());

    runner.run(shutdown_channel()).await;

    db.close().await;
    Ok(())
}
