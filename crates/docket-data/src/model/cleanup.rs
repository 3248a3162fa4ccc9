//! Cleanup run records.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a cleanup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupStatus {
    Completed,
    PartialFailure,
}

/// One append-only record per cleanup invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupLog {
    /// Unique log row identifier.
    pub id: Uuid,
    /// When the run started.
    pub started_at: Timestamp,
    /// When the run finished.
    pub completed_at: Option<Timestamp>,
    /// Sessions marked expired by this run.
    pub sessions_expired: u32,
    /// Jobs marked expired by this run.
    pub jobs_expired: u32,
    /// Blobs deleted by this run.
    pub blobs_deleted: u32,
    /// Overall outcome.
    pub status: CleanupStatus,
    /// Free-text error notes for partial failures.
    pub errors: Option<String>,
}

impl CleanupLog {
    /// Starts a new run record at the current instant.
    pub fn start() -> Self {
        Self {
            id: Uuid::now_v7(),
            started_at: Timestamp::now(),
            completed_at: None,
            sessions_expired: 0,
            jobs_expired: 0,
            blobs_deleted: 0,
            status: CleanupStatus::Completed,
            errors: None,
        }
    }

    /// Stamps the completion time, recording any accumulated errors.
    pub fn finish(mut self, errors: Vec<String>) -> Self {
        self.completed_at = Some(Timestamp::now());
        if !errors.is_empty() {
            self.status = CleanupStatus::PartialFailure;
            self.errors = Some(errors.join("; "));
        }
        self
    }
}
