//! Job domain entities.

pub mod model;
pub mod retry;
pub mod spec;
pub mod status;

pub use model::{Job, QueueStats};
pub use retry::RetryDecision;
pub use spec::JobSpec;
pub use status::JobState;
