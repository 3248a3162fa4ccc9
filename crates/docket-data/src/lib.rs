#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod model;
pub mod store;

pub use model::{
    CleanupLog, CleanupStatus, Job, JobStatus, Session, SessionProgress, SessionStatus,
};
pub use store::{BoxedStore, MemoryStore, SessionStore};
