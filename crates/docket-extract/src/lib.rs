#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod client;

#[cfg(feature = "mock")]
pub mod mock;

pub use client::{ExtractorConfig, HttpExtractor};

/// Tracing target for extraction client operations.
pub const TRACING_TARGET: &str = "docket_extract";
