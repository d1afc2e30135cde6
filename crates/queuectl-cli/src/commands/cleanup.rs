//! `queuectl cleanup`.

use chrono::{Duration, Utc};
use clap::Args;

use super::Context;
use crate::output;
use queuectl_core::error::AppError;
use queuectl_database::JobRepository;
use queuectl_entity::job::JobState;

/// Arguments for cleanup
#[derive(Debug, Args)]
pub struct CleanupArgs {
    /// Delete completed jobs last updated more than this many days ago
    #[arg(long, default_value_t = 7)]
    pub days: u32,

    /// Also delete dead jobs
    #[arg(long)]
    pub include_dead: bool,
}

/// Execute cleanup
pub async fn execute(args: &CleanupArgs, ctx: &Context) -> Result<(), AppError> {
    let mut states = vec![JobState::Completed];
    if args.include_dead {
        states.push(JobState::Dead);
    }
    let before = Utc::now() - Duration::days(i64::from(args.days));

    let db = ctx.open_store().await?;
    let deleted = JobRepository::new(db.pool().clone())
        .cleanup(before, &states)
        .await?;

    output::print_success(&format!("Deleted {deleted} old job(s)"));

    db.close().await;
    Ok(())
}
