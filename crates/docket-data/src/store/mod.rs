//! Session persistence seam.
//!
//! Every mutation is conditional: callers state the status they expect and
//! the store applies the change only when it still holds, so no schedule
//! can double-count a job or walk a state machine backwards. A relational
//! implementation would express the same methods as compare-and-set row
//! updates; the in-process [`MemoryStore`] holds the write lock across
//! check and write instead.

mod memory;

use std::sync::Arc;

pub use memory::MemoryStore;
use uuid::Uuid;

use docket_core::{OperationId, Result};

use crate::model::{CleanupLog, Job, JobStatus, Session, SessionProgress, SessionStatus};

/// Type alias for a shared store handle.
pub type BoxedStore = Arc<dyn SessionStore>;

/// Tracing target for store operations.
pub const TRACING_TARGET: &str = "docket_data::store";

/// Persistence operations for sessions, jobs, credits and cleanup logs.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session row.
    async fn create_session(&self, session: Session) -> Result<()>;

    /// Fetches a session by id.
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>>;

    /// Inserts job rows (parents and children).
    async fn insert_jobs(&self, jobs: Vec<Job>) -> Result<()>;

    /// Fetches a job by id.
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    /// All jobs of a session in insertion order.
    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>>;

    /// Moves a session from one of `from` to `to`; false when the current
    /// status does not match or the transition is not allowed.
    async fn try_transition_session(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<bool>;

    /// Moves a job from one of `from` to `to` under the same CAS contract.
    async fn try_transition_job(&self, id: Uuid, from: &[JobStatus], to: JobStatus)
    -> Result<bool>;

    /// Records the provider operation handle and moves the job to
    /// `Polling`. Accepts `Processing` (first submission) and `Polling`
    /// (resubmission after a transient provider failure); false otherwise.
    async fn record_job_submitted(&self, id: Uuid, operation_id: OperationId) -> Result<bool>;

    /// Terminal CAS: marks the job `Completed` with its extracted fields
    /// and counts the page, exactly once. Returns the session progress
    /// observed under the same guard, or `None` when the CAS lost.
    async fn complete_job(
        &self,
        id: Uuid,
        fields: serde_json::Value,
    ) -> Result<Option<SessionProgress>>;

    /// Terminal CAS: marks the job `Failed` with an error code and counts
    /// the page, exactly once.
    async fn fail_job(&self, id: Uuid, error: String) -> Result<Option<SessionProgress>>;

    /// Terminal CAS: marks the job `Cancelled` and counts the page.
    async fn cancel_job(&self, id: Uuid) -> Result<Option<SessionProgress>>;

    /// Records the renamed artifact on a completed job.
    async fn set_processed_file(
        &self,
        id: Uuid,
        processed_file_url: String,
        new_file_name: String,
    ) -> Result<bool>;

    /// Stamps the post-processing start time on the session.
    async fn begin_post_processing(&self, session_id: Uuid) -> Result<()>;

    /// Stamps the post-processing completion time on the session.
    async fn finish_post_processing(&self, session_id: Uuid) -> Result<()>;

    /// Increments the session's post-processed counter.
    async fn bump_post_processed(&self, session_id: Uuid) -> Result<()>;

    /// Records the exported archive location.
    async fn set_zip_url(&self, session_id: Uuid, zip_url: String) -> Result<()>;

    /// Rewrites the session expiry (used by expiry speed-up).
    async fn set_expires_at(&self, session_id: Uuid, expires_at: jiff::Timestamp) -> Result<()>;

    /// The durable `(session, expiresAt)` schedule for non-expired rows.
    async fn list_expiry_schedule(&self) -> Result<Vec<(Uuid, jiff::Timestamp)>>;

    /// Remaining credits for a user.
    async fn credits(&self, user_id: &str) -> Result<i64>;

    /// Debits `amount` credits; false when the balance is insufficient.
    async fn try_debit_credits(&self, user_id: &str, amount: i64) -> Result<bool>;

    /// Returns `amount` credits to a user (failed session creation).
    async fn refund_credits(&self, user_id: &str, amount: i64) -> Result<()>;

    /// Appends one cleanup log row.
    async fn append_cleanup_log(&self, log: CleanupLog) -> Result<()>;

    /// All cleanup log rows in append order.
    async fn cleanup_logs(&self) -> Result<Vec<CleanupLog>>;
}
