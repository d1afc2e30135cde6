//! `queuectl status`.

use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::output::{self, OutputFormat};
use queuectl_core::error::AppError;
use queuectl_database::{JobRepository, WorkerRepository};
use queuectl_entity::job::{JobState, QueueStats};

#[derive(Debug, Serialize, Tabled)]
struct StateRow {
    /// State
    #[tabled(rename = "State")]
    state: String,
    /// Count
    #[tabled(rename = "Count")]
    count: i64,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    jobs: QueueStats,
    active_workers: i64,
}

/// Execute status
pub async fn execute(ctx: &Context) -> Result<(), AppError> {
    let db = ctx.open_store().await?;
    let jobs = JobRepository::new(db.pool().clone());
    let workers = WorkerRepository::new(db.pool().clone());

    let stats = jobs.stats().await?;
    let liveness = ctx.config.worker.heartbeat_interval() * 3;
    let active_workers = workers.count_active(liveness).await?;

    match ctx.format {
        OutputFormat::Json => output::print_json(&StatusReport {
            jobs: stats,
            active_workers,
        }),
        OutputFormat::Table => {
            let rows: Vec<StateRow> = JobState::ALL
                .iter()
                .map(|state| StateRow {
                    state: state.to_string(),
                    count: stats.get(*state),
                })
                .collect();
            println!("Queue Status:");
            output::print_list(&rows, ctx.format, "No jobs.");
            println!();
            output::print_kv("Total jobs", &stats.total().to_string());
            output::print_kv("Active workers", &active_workers.to_string());
        }
    }

    db.close().await;
    Ok(())
}
