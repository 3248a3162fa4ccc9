//! Session upload and management handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use uuid::Uuid;

use docket_pipeline::{Pipeline, SessionView, UploadFile};

use crate::handler::response::CompactStatus;
use crate::handler::{ErrorKind, Result};
use crate::service::ServiceConfig;

/// Tracing target for session handlers.
const TRACING_TARGET: &str = "docket_server::handler::sessions";

/// Header carrying the acting user until the auth layer fronts this
/// service; absent headers fall back to the demo user.
const USER_HEADER: &str = "x-user-id";

/// Demo user for unauthenticated requests.
const DEFAULT_USER: &str = "demo-user";

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_USER)
        .to_string()
}

/// Uploads a batch of documents and starts a processing session.
#[tracing::instrument(skip_all, target = TRACING_TARGET)]
pub async fn upload_session(
    State(pipeline): State<Pipeline>,
    State(config): State<ServiceConfig>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SessionView>)> {
    let user_id = user_id(&headers);
    let mut files = Vec::new();
    let mut model_id = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        ErrorKind::BadRequest
            .with_message("Invalid multipart data")
            .with_context(err.to_string())
    })? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            // Text fields: only the model selector is recognized.
            if field.name() == Some("modelId") {
                let value = field.text().await.map_err(|err| {
                    ErrorKind::BadRequest
                        .with_message("Invalid modelId field")
                        .with_context(err.to_string())
                })?;
                if !value.is_empty() {
                    model_id = Some(value);
                }
            }
            continue;
        };

        let data = field.bytes().await.map_err(|err| {
            ErrorKind::BadRequest
                .with_message("Failed to read file data")
                .with_context(err.to_string())
        })?;

        if data.len() > config.pipeline.max_file_size {
            return Err(ErrorKind::PayloadTooLarge.with_message(format!(
                "{} exceeds the {} MiB per-file limit",
                file_name,
                config.pipeline.max_file_size / (1024 * 1024)
            )));
        }

        tracing::debug!(
            target: TRACING_TARGET,
            file = %file_name,
            size = data.len(),
            "received upload"
        );

        files.push(UploadFile {
            name: file_name,
            bytes: data,
        });
    }

    let view = pipeline.upload(&user_id, files, model_id).await?;

    tracing::info!(
        target: TRACING_TARGET,
        session_id = %view.session_id,
        total_pages = view.total_pages,
        "session accepted"
    );

    Ok((StatusCode::CREATED, Json(view)))
}

/// Full session view including per-job rows.
pub async fn get_session(
    State(pipeline): State<Pipeline>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    Ok(Json(pipeline.status(session_id).await?))
}

/// Compact polling view.
pub async fn get_session_status(
    State(pipeline): State<Pipeline>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CompactStatus>> {
    let view = pipeline.status(session_id).await?;
    Ok(Json(view.into()))
}

/// Streams the session archive.
///
/// Returns 410 once the session is past retention and 404 until it has
/// completed.
#[tracing::instrument(skip(pipeline), target = TRACING_TARGET)]
pub async fn download_session(
    State(pipeline): State<Pipeline>,
    Path(session_id): Path<Uuid>,
) -> Result<Response> {
    let (session, spool) = pipeline.download(session_id).await?;
    let size = spool.size();
    let stream = spool.open_stream().await?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"session_{}.zip\"", session.id),
        )
        .body(Body::from_stream(stream))
        .map_err(|err| {
            ErrorKind::InternalServerError
                .with_message("Failed to build download response")
                .with_context(err.to_string())
        })?;

    Ok(response)
}

/// Cancels a session. Idempotent once the session is terminal.
pub async fn delete_session(
    State(pipeline): State<Pipeline>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode> {
    let cancelled = pipeline.cancel(session_id).await?;

    tracing::info!(
        target: TRACING_TARGET,
        session_id = %session_id,
        cancelled,
        "cancellation requested"
    );

    Ok(StatusCode::NO_CONTENT)
}
