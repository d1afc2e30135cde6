//! `queuectl list`.

use clap::Args;

use super::Context;
use queuectl_core::error::AppError;
use queuectl_database::JobRepository;
use queuectl_entity::job::JobState;

/// Arguments for list
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only show jobs in this state (pending, processing, completed, failed, dead)
    #[arg(long)]
    pub state: Option<JobState>,

    /// Maximum number of jobs to show
    #[arg(long, default_value_t = 50)]
    pub limit: i64,
}

/// Execute list
pub async fn execute(args: &ListArgs, ctx: &Context) -> Result<(), AppError> {
    let db = ctx.open_store().await?;
    let jobs = JobRepository::new(db.pool().clone())
        .list(args.state, args.limit)
        .await?;

    super::print_jobs(&jobs, ctx.format, "No jobs found.");

    db.close().await;
    Ok(())
}
