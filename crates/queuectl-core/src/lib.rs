//! # queuectl-core
//!
//! Core crate for queuectl. Contains the configuration schemas, the
//! unified error system and the result alias shared by every other crate.
//!
//! This crate has **no** internal dependencies on other queuectl crates.

pub mod config;
pub mod error;
pub mod result;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
