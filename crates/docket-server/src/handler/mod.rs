//! All `axum::`[`Router`]s with related handlers.
//!
//! [`Router`]: axum::routing::Router

mod error;
mod monitors;
mod response;
mod sessions;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::trace::TraceLayer;

pub use crate::handler::error::{Error, ErrorKind, Result};
use crate::service::ServiceState;

/// Builds the complete application router.
pub fn routes(state: ServiceState) -> Router {
    use axum::extract::FromRef;

    let config = crate::service::ServiceConfig::from_ref(&state);

    Router::new()
        .route(
            "/sessions/upload",
            axum::routing::post(sessions::upload_session),
        )
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{id}/status", get(sessions::get_session_status))
        .route("/sessions/{id}/download", get(sessions::download_session))
        .route("/health", get(monitors::health))
        .layer(DefaultBodyLimit::max(config.body_limit()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use std::time::Duration;

    use axum_test::TestServer;
    use axum_test::multipart::{MultipartForm, Part};
    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};
    use serde_json::Value;

    use docket_pipeline::{PipelineConfig, Tier};

    use crate::service::{ServiceConfig, ServiceState};

    use super::*;

    /// Test config: fast polls, small file cap for the 413 path.
    fn test_config() -> ServiceConfig {
        let mut pipeline = PipelineConfig::for_tier(Tier::Standard);
        pipeline.poll_interval_min = Duration::from_millis(10);
        pipeline.poll_deadline = Duration::from_secs(10);

        ServiceConfig {
            pipeline,
            ..ServiceConfig::default()
        }
    }

    fn create_server(config: ServiceConfig) -> anyhow::Result<(TestServer, ServiceState)> {
        let state = ServiceState::from_config(config)?;
        let server = TestServer::new(routes(state.clone()))?;
        Ok((server, state))
    }

    fn single_page_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![100.into(), 600.into()]),
                Operation::new("Tj", vec![Object::string_literal("ticket")]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).expect("serialize pdf");
        buffer
    }

    fn pdf_form(names: &[&str]) -> MultipartForm {
        let mut form = MultipartForm::new();
        for name in names {
            form = form.add_part(
                "files",
                Part::bytes(single_page_pdf())
                    .file_name(*name)
                    .mime_type("application/pdf"),
            );
        }
        form
    }

    async fn wait_for_status(server: &TestServer, session_id: &str, wanted: &str) -> Value {
        for _ in 0..400 {
            let response = server.get(&format!("/sessions/{session_id}/status")).await;
            response.assert_status_ok();
            let body: Value = response.json();
            if body["status"] == wanted {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("session never reached {wanted}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_process_download_round_trip() -> anyhow::Result<()> {
        let (server, _state) = create_server(test_config())?;

        let response = server
            .post("/sessions/upload")
            .multipart(pdf_form(&["a.pdf", "b.pdf"]))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);

        let body: Value = response.json();
        assert_eq!(body["totalFiles"], 2);
        assert_eq!(body["totalPages"], 2);
        let session_id = body["sessionId"].as_str().expect("session id").to_string();
        assert_eq!(body["jobs"].as_array().map(Vec::len), Some(4));

        let status = wait_for_status(&server, &session_id, "COMPLETED").await;
        assert_eq!(status["processedPages"], 2);
        assert_eq!(status["progress"], 100);
        assert_eq!(status["completedJobs"], 2);

        // Full view includes per-job rows with canonical names.
        let full: Value = server.get(&format!("/sessions/{session_id}")).await.json();
        let children: Vec<&Value> = full["jobs"]
            .as_array()
            .expect("jobs")
            .iter()
            .filter(|job| job.get("splitPageNumber").is_some())
            .collect();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|job| job["status"] == "COMPLETED"));

        let download = server.get(&format!("/sessions/{session_id}/download")).await;
        download.assert_status_ok();
        assert_eq!(
            download.header("content-type").to_str().unwrap(),
            "application/zip"
        );

        let archive_bytes = download.as_bytes().to_vec();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(archive_bytes))?;
        assert_eq!(archive.len(), 3, "two pages plus summary");

        let delete = server.delete(&format!("/sessions/{session_id}")).await;
        delete.assert_status(axum::http::StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_without_files_is_bad_request() -> anyhow::Result<()> {
        let (server, _state) = create_server(test_config())?;

        let response = server
            .post("/sessions/upload")
            .multipart(MultipartForm::new().add_text("modelId", "m"))
            .await;
        response.assert_status(axum::http::StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_file_is_rejected_with_413() -> anyhow::Result<()> {
        let mut config = test_config();
        config.pipeline.max_file_size = 1024;
        let (server, _state) = create_server(config)?;

        let form = MultipartForm::new().add_part(
            "files",
            Part::bytes(vec![0u8; 4096])
                .file_name("big.pdf")
                .mime_type("application/pdf"),
        );
        let response = server.post("/sessions/upload").multipart(form).await;
        response.assert_status(axum::http::StatusCode::PAYLOAD_TOO_LARGE);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_without_credits_is_payment_required() -> anyhow::Result<()> {
        let mut config = test_config();
        config.credit_grant = 0;
        let (server, _state) = create_server(config)?;

        let response = server
            .post("/sessions/upload")
            .multipart(pdf_form(&["a.pdf"]))
            .await;
        response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_before_completion_is_not_found() -> anyhow::Result<()> {
        let mut config = test_config();
        // Polls never land within the test window.
        config.pipeline.poll_interval_min = Duration::from_secs(60);
        let (server, _state) = create_server(config)?;

        let response = server
            .post("/sessions/upload")
            .multipart(pdf_form(&["a.pdf"]))
            .await;
        let body: Value = response.json();
        let session_id = body["sessionId"].as_str().expect("session id");

        let download = server.get(&format!("/sessions/{session_id}/download")).await;
        download.assert_status(axum::http::StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_session_download_is_gone() -> anyhow::Result<()> {
        let (server, state) = create_server(test_config())?;

        let response = server
            .post("/sessions/upload")
            .multipart(pdf_form(&["a.pdf"]))
            .await;
        let body: Value = response.json();
        let session_id = body["sessionId"].as_str().expect("session id").to_string();
        wait_for_status(&server, &session_id, "COMPLETED").await;

        // Pull retention into the past; the next status read is EXPIRED
        // and the download is gone, cleanup pass or not.
        let expired_at = jiff::Timestamp::now() - jiff::SignedDuration::from_secs(1);
        state
            .pipeline()
            .speed_up_expiration(session_id.parse()?, expired_at)
            .await?;

        let status: Value = server
            .get(&format!("/sessions/{session_id}/status"))
            .await
            .json();
        assert_eq!(status["status"], "EXPIRED");

        server
            .get(&format!("/sessions/{session_id}/download"))
            .await
            .assert_status(axum::http::StatusCode::GONE);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_session_is_not_found() -> anyhow::Result<()> {
        let (server, _state) = create_server(test_config())?;

        let missing = uuid::Uuid::now_v7();
        server
            .get(&format!("/sessions/{missing}"))
            .await
            .assert_status(axum::http::StatusCode::NOT_FOUND);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn health_endpoint_reports_ok() -> anyhow::Result<()> {
        let (server, _state) = create_server(test_config())?;

        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "ok");
        Ok(())
    }
}
