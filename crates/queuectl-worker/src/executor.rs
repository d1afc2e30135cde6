//! Shell execution of job commands.
//!
//! Runs each job command as a child shell in its own process group, with
//! stdout and stderr captured and its timeout enforced on the whole group.

use std::process::Stdio;
use std::time::{Duration, Instant};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use queuectl_entity::job::Job;

/// Longest stderr excerpt carried into an error message.
const MAX_ERROR_CHARS: usize = 2000;

/// Time a timed-out process group gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Why an execution attempt failed.
///
/// The display string is what gets recorded as the job's `error`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The command ran past the job's timeout and was killed.
    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    /// The command exited with a non-zero code.
    #[error("{}", exit_message(*code, stderr))]
    ProcessFailed {
        /// The exit code
        code: i32,
        /// Standard error output
        stderr: String,
        /// Combined captured output
        output: Option<String>,
    },

    /// The command was terminated by a signal.
    #[error("Process terminated by signal")]
    Killed {
        /// Combined captured output
        output: Option<String>,
    },

    /// The shell could not be started.
    #[error("Execution error: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ExecutionError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::ProcessFailed { output, .. } | Self::Killed { output } => output.as_deref(),
            Self::Timeout(_) | Self::Spawn(_) => None,
        }
    }
}

fn exit_message(code: i32, stderr: &str) -> String {
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        format!("Exit code {code}")
    } else {
        let excerpt: String = stderr.chars().take(MAX_ERROR_CHARS).collect();
        format!("Exit code {code}: {excerpt}")
    }
}

/// Result of a successful execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Combined stdout and stderr, `None` when both were empty
    pub output: Option<String>,
    /// Duration of the attempt
    pub duration_ms: u64,
}

/// Runs job commands through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    /// Create a new shell executor
    pub fn new() -> Self {
        Self
    }

    /// Run `job.command` once, bounded by `job.timeout` when set.
    ///
    /// On timeout the whole process group is terminated, so commands the
    /// shell started do not outlive the attempt. A non-zero exit, a signal,
    /// a timeout and a spawn failure are all reported as [`ExecutionError`].
    pub async fn execute(&self, job: &Job) -> Result<ExecutionResult, ExecutionError> {
        let start = Instant::now();

        let mut cmd = shell_command(&job.command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.group_spawn()?;
        let stdout = drain(child.inner().stdout.take());
        let stderr = drain(child.inner().stderr.take());

        let limit = job
            .timeout
            .and_then(|secs| u64::try_from(secs).ok())
            .filter(|secs| *secs > 0);

        let status = match limit {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    tracing::warn!(job_id = %job.id, timeout = secs, "Job timed out, terminating process group");
                    terminate_process_group(&mut child, KILL_GRACE).await;
                    return Err(ExecutionError::Timeout(secs));
                }
            },
            None => child.wait().await?,
        };

        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        let combined = combine(&stdout, &stderr);

        if status.success() {
            tracing::debug!(job_id = %job.id, duration_ms, "Command exited successfully");
            return Ok(ExecutionResult {
                output: combined,
                duration_ms,
            });
        }

        match status.code() {
            Some(code) => {
                tracing::debug!(job_id = %job.id, code, duration_ms, "Command exited with failure");
                Err(ExecutionError::ProcessFailed {
                    code,
                    stderr,
                    output: combined,
                })
            }
            None => Err(ExecutionError::Killed { output: combined }),
        }
    }
}

/// Read a captured pipe to the end on its own task, so a chatty command
/// cannot block on a full pipe while we wait for it.
fn drain<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                tracing::warn!(error = %e, "Failed to read command output");
            }
            buf
        })
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => String::from_utf8_lossy(&handle.await.unwrap_or_default()).into_owned(),
        None => String::new(),
    }
}

/// SIGTERM the group, give it `grace` to exit, then SIGKILL and reap.
#[cfg(unix)]
async fn terminate_process_group(child: &mut AsyncGroupChild, grace: Duration) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.inner().id() else {
        return;
    };
    let pgid = Pid::from_raw(pid as i32);

    if let Err(e) = killpg(pgid, Signal::SIGTERM)
        && e != Errno::ESRCH
    {
        tracing::warn!(pid, error = ?e, "SIGTERM to process group failed");
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if child.inner().try_wait().ok().flatten().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // The shell may be gone while something it started still runs.
    if let Err(e) = killpg(pgid, Signal::SIGKILL)
        && e != Errno::ESRCH
    {
        tracing::warn!(pid, error = ?e, "SIGKILL to process group failed");
    }

    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate_process_group(child: &mut AsyncGroupChild, _grace: Duration) {
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

fn combine(stdout: &str, stderr: &str) -> Option<String> {
    let combined = format!("{stdout}{stderr}");
    if combined.is_empty() { None } else { Some(combined) }
}
