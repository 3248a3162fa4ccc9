#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod backend;
mod config;
mod error;

pub use backend::StorageBackend;
pub use config::StorageConfig;
pub use error::{StorageError, StorageResult};

/// Tracing target for storage operations.
pub const TRACING_TARGET: &str = "docket_opendal";
