//! Job record and state machine.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docket_core::OperationId;

/// Lifecycle states of a single job.
///
/// Within one job the order is strict:
/// `QUEUED ≤ UPLOADING ≤ PROCESSING ≤ POLLING ≤ (COMPLETED | FAILED)`,
/// with `EXPIRED`/`CANCELLED` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Uploading,
    Processing,
    Polling,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    /// Returns true for states the job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    /// Position in the strict per-job order; terminal states share rank.
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Uploading => 1,
            Self::Processing => 2,
            Self::Polling => 3,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled => 4,
        }
    }

    /// Whether moving to `next` respects the per-job order.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Cancelled | Self::Expired) {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// The processing unit for one page (child) or one uploaded file (parent).
///
/// Parent jobs carry file-level metadata (`page_count`) and are never
/// dispatched; child jobs always have `split_page_number` set and exactly
/// one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Parent job within the same session, for child jobs.
    pub parent_job_id: Option<Uuid>,
    /// Stored name at the blob path (page payload, or the original).
    pub file_name: String,
    /// 1-based page number; `None` for parent jobs.
    pub split_page_number: Option<u32>,
    /// Current state.
    pub status: JobStatus,
    /// Input blob path.
    pub blob_url: Option<String>,
    /// Renamed output blob path, set only after post-processing succeeds.
    pub processed_file_url: Option<String>,
    /// External long-running-operation handle, set on submit.
    pub operation_id: Option<OperationId>,
    /// Normalized extracted fields plus the `_confidence` key.
    pub extracted_fields: Option<serde_json::Value>,
    /// Canonical file name derived from extracted fields.
    pub new_file_name: Option<String>,
    /// Page count (parents: pages in the file; children: always 1).
    pub page_count: u32,
    /// Pages of this job that reached a terminal state.
    pub pages_processed: u32,
    /// Failure code and detail; set only on `Failed`.
    pub error: Option<String>,
    /// Creation instant.
    pub created_at: Timestamp,
}

impl Job {
    /// Creates a parent job for one uploaded file.
    pub fn parent(session_id: Uuid, file_name: impl Into<String>, page_count: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id,
            parent_job_id: None,
            file_name: file_name.into(),
            split_page_number: None,
            status: JobStatus::Uploading,
            blob_url: None,
            processed_file_url: None,
            operation_id: None,
            extracted_fields: None,
            new_file_name: None,
            page_count,
            pages_processed: 0,
            error: None,
            created_at: Timestamp::now(),
        }
    }

    /// Creates a child job for one page of a parent file.
    pub fn child(parent: &Job, file_name: impl Into<String>, page_number: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            session_id: parent.session_id,
            parent_job_id: Some(parent.id),
            file_name: file_name.into(),
            split_page_number: Some(page_number),
            status: JobStatus::Queued,
            blob_url: None,
            processed_file_url: None,
            operation_id: None,
            extracted_fields: None,
            new_file_name: None,
            page_count: 1,
            pages_processed: 0,
            error: None,
            created_at: Timestamp::now(),
        }
    }

    /// Returns true for dispatchable per-page jobs.
    pub fn is_child(&self) -> bool {
        self.split_page_number.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_job_order_is_strict() {
        use JobStatus::*;

        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Polling));
        assert!(Polling.can_transition_to(Completed));
        assert!(Polling.can_transition_to(Failed));

        assert!(!Polling.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Cancelled));
    }

    #[test]
    fn cancel_and_expire_from_any_non_terminal() {
        use JobStatus::*;
        for status in [Queued, Uploading, Processing, Polling] {
            assert!(status.can_transition_to(Cancelled));
            assert!(status.can_transition_to(Expired));
        }
    }

    #[test]
    fn children_reference_their_parent() {
        let parent = Job::parent(Uuid::now_v7(), "scan.pdf", 3);
        let child = Job::child(&parent, "scan_page_2.pdf", 2);

        assert!(!parent.is_child());
        assert!(child.is_child());
        assert_eq!(child.parent_job_id, Some(parent.id));
        assert_eq!(child.session_id, parent.session_id);
        assert_eq!(child.page_count, 1);
        assert_eq!(child.split_page_number, Some(2));
    }
}
