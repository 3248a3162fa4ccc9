#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod handler;
pub mod service;

pub use handler::routes;
pub use service::{ProviderConfig, ServiceConfig, ServiceState};
