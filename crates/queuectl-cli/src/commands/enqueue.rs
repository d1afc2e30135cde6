//! `queuectl enqueue`.

use clap::Args;

use super::Context;
use crate::output::{self, OutputFormat};
use queuectl_core::error::AppError;
use queuectl_database::JobRepository;
use queuectl_entity::job::JobSpec;

/// Arguments for enqueue
#[derive(Debug, Args)]
pub struct EnqueueArgs {
    /// Job as JSON, e.g. '{"id":"job1","command":"sleep 2"}'.
    /// Optional fields: max_retries, run_at (RFC 3339), timeout (seconds).
    pub job_json: String,
}

/// Execute enqueue
pub async fn execute(args: &EnqueueArgs, ctx: &Context) -> Result<(), AppError> {
    let spec = JobSpec::from_json(&args.job_json)?;

    let db = ctx.open_store().await?;
    let jobs = JobRepository::new(db.pool().clone());
    let job = jobs.enqueue(&spec).await?;

    match ctx.format {
        OutputFormat::Json => output::print_json(&job),
        OutputFormat::Table => output::print_success(&format!("Job {} enqueued", job.id)),
    }

    db.close().await;
    Ok(())
}
