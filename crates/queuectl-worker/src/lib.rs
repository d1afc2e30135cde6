//! Job execution for queuectl.
//!
//! This crate provides:
//! - A worker runner that acquires, executes and reports jobs one at a time
//! - A shell executor that runs job commands under their timeout
//! - A manager that spawns and supervises worker processes
//! - A cron scheduler for the periodic stale-lock sweep
//! - Ctrl+C / SIGTERM handling for the binaries

pub mod executor;
pub mod manager;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod signal;

pub use executor::ShellExecutor;
pub use manager::WorkerManager;
pub use queue::JobQueue;
pub use runner::WorkerRunner;
pub use scheduler::ReclaimScheduler;
