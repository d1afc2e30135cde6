//! `queuectl reclaim`.

use std::time::Duration;

use clap::Args;

use super::Context;
use crate::output;
use queuectl_core::error::AppError;
use queuectl_database::JobRepository;

/// Arguments for reclaim
#[derive(Debug, Args)]
pub struct ReclaimArgs {
    /// Lock age in seconds after which a job is reclaimed
    /// (defaults to worker.stale_lock_seconds)
    #[arg(long)]
    pub stale_seconds: Option<u64>,
}

/// Execute reclaim
pub async fn execute(args: &ReclaimArgs, ctx: &Context) -> Result<(), AppError> {
    let stale_after = args
        .stale_seconds
        .map(Duration::from_secs)
        .unwrap_or_else(|| ctx.config.worker.stale_after());

    let db = ctx.open_store().await?;
    let reclaimed = JobRepository::new(db.pool().clone())
        .reclaim_stale_locks(stale_after)
        .await?;

    output::print_success(&format!("Reclaimed {reclaimed} stale job(s)"));

    db.close().await;
    Ok(())
}
