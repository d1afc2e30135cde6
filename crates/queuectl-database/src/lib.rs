//! # queuectl-database
//!
//! SQLite connection management and concrete repository implementations
//! for the job table, the runtime settings table and the worker registry.
//! Every state transition is a conditional write scoped to one row.

pub mod connection;
pub mod migration;
pub mod repositories;
pub mod timestamp;

pub use connection::DatabasePool;
pub use repositories::job::JobRepository;
pub use repositories::settings::SettingsRepository;
pub use repositories::worker::WorkerRepository;
