//! Worker registry entities.

pub mod model;

pub use model::WorkerRecord;
