//! Response body shapes.

use std::borrow::Cow;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

use docket_data::SessionStatus;
use docket_pipeline::SessionView;

/// Stable JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    status: StatusCode,
    /// Machine-readable error name.
    pub error: &'static str,
    /// User-facing message.
    pub message: Cow<'static, str>,
    /// Debugging context, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Cow<'static, str>>,
}

impl ErrorResponse {
    /// Creates an error body for the given status.
    pub fn new(
        status: StatusCode,
        error: &'static str,
        message: Cow<'static, str>,
        context: Option<Cow<'static, str>>,
    ) -> Self {
        Self {
            status,
            error,
            message,
            context,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Compact polling view: the session aggregate without per-job rows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactStatus {
    /// Session identifier.
    pub session_id: Uuid,
    /// Current status.
    pub status: SessionStatus,
    /// Total page count.
    pub total_pages: u32,
    /// Pages in a terminal state.
    pub processed_pages: u32,
    /// Rounded percentage progress.
    pub progress: u32,
    /// Successfully extracted pages.
    pub completed_jobs: u32,
    /// Failed pages.
    pub failed_jobs: u32,
    /// Remaining credits of the owning user.
    pub user_credits: i64,
    /// Expiry instant.
    pub expires_at: Timestamp,
}

impl From<SessionView> for CompactStatus {
    fn from(view: SessionView) -> Self {
        Self {
            session_id: view.session_id,
            status: view.status,
            total_pages: view.total_pages,
            processed_pages: view.processed_pages,
            progress: view.progress,
            completed_jobs: view.completed_jobs,
            failed_jobs: view.failed_jobs,
            user_credits: view.user_credits,
            expires_at: view.expires_at,
        }
    }
}
