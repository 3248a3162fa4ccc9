//! Session record and state machine.

use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docket_core::SessionPrefix;

/// Lifecycle states of a processing session.
///
/// Transitions are monotonic:
///
/// ```text
/// UPLOADING → PROCESSING → POST_PROCESSING → COMPLETED
///       ↘ FAILED                    ↘ FAILED
/// (any state) → EXPIRED
/// (any pre-terminal) → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Uploading,
    Processing,
    PostProcessing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    /// Returns true for states no forward transition leaves, expiry aside.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Expired | Self::Cancelled
        )
    }

    /// Whether moving to `next` respects the monotonic state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        // Expiry is reachable from everywhere but itself.
        if next == Self::Expired {
            return self != Self::Expired;
        }
        // Cancellation is reachable from any pre-terminal state.
        if next == Self::Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Self::Uploading, Self::Processing)
                | (Self::Uploading, Self::Failed)
                | (Self::Processing, Self::PostProcessing)
                | (Self::Processing, Self::Failed)
                | (Self::PostProcessing, Self::Completed)
                | (Self::PostProcessing, Self::Failed)
        )
    }
}

/// A user-scoped unit of work: one batch of uploaded files sharing a
/// retention window and a single state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Current state.
    pub status: SessionStatus,
    /// Number of uploaded files.
    pub total_files: u32,
    /// Total page count across all files.
    pub total_pages: u32,
    /// Child jobs that reached a terminal state so far.
    pub processed_pages: u32,
    /// Deterministic path root for every blob the session owns.
    pub blob_prefix: String,
    /// Extraction model handle.
    pub model_id: String,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Forced-expiry instant (`created_at` + retention window).
    pub expires_at: Timestamp,
    /// Download URL of the built archive, once exported.
    pub zip_url: Option<String>,
    /// When batch post-processing began.
    pub post_processing_started_at: Option<Timestamp>,
    /// When batch post-processing finished.
    pub post_processing_completed_at: Option<Timestamp>,
    /// Jobs whose renamed artifact has been written.
    pub post_processed_count: u32,
}

impl Session {
    /// Creates a new session in `Uploading` with the given retention.
    pub fn new(
        user_id: impl Into<String>,
        model_id: impl Into<String>,
        retention: std::time::Duration,
    ) -> Self {
        let id = Uuid::now_v7();
        let user_id = user_id.into();
        let created_at = Timestamp::now();
        let retention = SignedDuration::try_from(retention).unwrap_or(SignedDuration::MAX);
        let expires_at = created_at
            .checked_add(retention)
            .unwrap_or(Timestamp::MAX);
        let blob_prefix = SessionPrefix::new(&user_id, id).root();

        Self {
            id,
            user_id,
            status: SessionStatus::Uploading,
            total_files: 0,
            total_pages: 0,
            processed_pages: 0,
            blob_prefix,
            model_id: model_id.into(),
            created_at,
            expires_at,
            zip_url: None,
            post_processing_started_at: None,
            post_processing_completed_at: None,
            post_processed_count: 0,
        }
    }

    /// The typed path prefix for this session's blobs.
    pub fn prefix(&self) -> SessionPrefix {
        SessionPrefix::new(&self.user_id, self.id)
    }

    /// Whether the retention window has elapsed at `now`.
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Percentage progress, rounded to the nearest integer.
    pub fn progress(&self) -> u32 {
        if self.total_pages == 0 {
            return 0;
        }
        let ratio = f64::from(self.processed_pages) / f64::from(self.total_pages);
        (ratio * 100.0).round() as u32
    }
}

/// Aggregate child-job counts observed atomically with a terminal job
/// transition. The dispatcher uses `all_children_terminal` to drive the
/// session state machine without re-reading under a second lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    /// Child jobs in a terminal state.
    pub processed_pages: u32,
    /// Total child jobs.
    pub total_pages: u32,
    /// Child jobs that completed successfully.
    pub completed_jobs: u32,
    /// Child jobs that failed.
    pub failed_jobs: u32,
    /// True once every child job is terminal.
    pub all_children_terminal: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_monotonic() {
        use SessionStatus::*;

        assert!(Uploading.can_transition_to(Processing));
        assert!(Processing.can_transition_to(PostProcessing));
        assert!(PostProcessing.can_transition_to(Completed));

        assert!(!Processing.can_transition_to(Uploading));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Cancelled));
    }

    #[test]
    fn expiry_reachable_from_any_state() {
        use SessionStatus::*;
        for status in [Uploading, Processing, PostProcessing, Completed, Failed, Cancelled] {
            assert!(status.can_transition_to(Expired));
        }
        assert!(!Expired.can_transition_to(Expired));
    }

    #[test]
    fn cancellation_only_pre_terminal() {
        use SessionStatus::*;
        assert!(Uploading.can_transition_to(Cancelled));
        assert!(PostProcessing.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Cancelled));
        assert!(!Expired.can_transition_to(Cancelled));
    }

    #[test]
    fn progress_rounds() {
        let mut session = Session::new("u", "m", std::time::Duration::from_secs(60));
        session.total_pages = 3;
        session.processed_pages = 1;
        assert_eq!(session.progress(), 33);
        session.processed_pages = 2;
        assert_eq!(session.progress(), 67);
    }

    #[test]
    fn expiry_window_applied() {
        let session = Session::new("u", "m", std::time::Duration::from_secs(3600));
        let span = session.expires_at.as_second() - session.created_at.as_second();
        assert_eq!(span, 3600);
        assert!(session.is_expired_at(session.expires_at));
        assert!(!session.is_expired_at(session.created_at));
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&SessionStatus::PostProcessing).unwrap();
        assert_eq!(json, "\"POST_PROCESSING\"");
    }
}
