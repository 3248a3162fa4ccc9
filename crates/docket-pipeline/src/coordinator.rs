//! Session coordination.
//!
//! Owns the upload/split stage and the caller-facing session views:
//! validates a batch, counts pages, debits credits, writes originals and
//! per-page payloads under the blob contract and creates the parent/child
//! job rows. Cancellation and status aggregation also live here; the
//! dispatcher drives the per-page work.

use bytes::Bytes;
use jiff::Timestamp;
use serde::Serialize;
use uuid::Uuid;

use docket_core::path::{UploadStamp, split_extension};
use docket_core::{Error, Result};
use docket_data::{BoxedStore, Job, JobStatus, Session, SessionStatus};
use docket_opendal::StorageBackend;

use crate::config::PipelineConfig;
use crate::split;

/// Tracing target for coordinator operations.
const TRACING_TARGET: &str = "docket_pipeline::coordinator";

/// Model used when an upload does not name one.
const DEFAULT_MODEL_ID: &str = "ticket-extraction-v2";

/// One uploaded file as received from the HTTP surface.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Client-supplied file name.
    pub name: String,
    /// Raw file content.
    pub bytes: Bytes,
}

/// Caller-facing session aggregate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    /// Session identifier.
    pub session_id: Uuid,
    /// Current (possibly view-level expired) status.
    pub status: SessionStatus,
    /// Uploaded file count.
    pub total_files: u32,
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
    /// Creation instant.
    pub created_at: Timestamp,
    /// Expiry instant.
    pub expires_at: Timestamp,
    /// Exported archive location, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_url: Option<String>,
    /// Per-job rows.
    pub jobs: Vec<JobView>,
}

/// Caller-facing job row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    /// Job identifier.
    pub id: Uuid,
    /// Parent job for page jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_job_id: Option<Uuid>,
    /// Stored file name.
    pub file_name: String,
    /// 1-based page number for page jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub split_page_number: Option<u32>,
    /// Current status.
    pub status: JobStatus,
    /// Canonical name, once post-processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_file_name: Option<String>,
    /// Failure code, for failed jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobView {
    fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            parent_job_id: job.parent_job_id,
            file_name: job.file_name.clone(),
            split_page_number: job.split_page_number,
            status: job.status,
            new_file_name: job.new_file_name.clone(),
            error: job.error.clone(),
        }
    }
}

/// Supervises session creation, aggregation and cancellation.
#[derive(Clone)]
pub struct Coordinator {
    store: BoxedStore,
    storage: StorageBackend,
    config: PipelineConfig,
}

impl Coordinator {
    /// Creates a coordinator over the given store and storage.
    pub fn new(store: BoxedStore, storage: StorageBackend, config: PipelineConfig) -> Self {
        Self {
            store,
            storage,
            config,
        }
    }

    /// Validates a batch, debits credits and creates the session with all
    /// parent and page jobs, uploading every payload under the blob
    /// contract. Returns the created session.
    #[tracing::instrument(skip_all, fields(user_id = %user_id, files = files.len()), target = TRACING_TARGET)]
    pub async fn create_session(
        &self,
        user_id: &str,
        files: Vec<UploadFile>,
        model_id: Option<String>,
    ) -> Result<Session> {
        if files.is_empty() {
            return Err(Error::invalid_input().with_detail("no files uploaded"));
        }
        if files.len() > self.config.max_files_per_session {
            return Err(Error::invalid_input().with_detail(format!(
                "at most {} files per session",
                self.config.max_files_per_session
            )));
        }
        for file in &files {
            if file.bytes.len() > self.config.max_file_size {
                return Err(Error::invalid_input()
                    .with_detail(format!("{} exceeds the file size cap", file.name)));
            }
        }

        // Counting pass: page totals gate the credit debit.
        let mut page_counts = Vec::with_capacity(files.len());
        for file in &files {
            page_counts.push(split::count_pages(&file.bytes)?);
        }
        let total_pages: u32 = page_counts.iter().sum();

        if !self
            .store
            .try_debit_credits(user_id, i64::from(total_pages))
            .await?
        {
            return Err(Error::insufficient_credits());
        }

        let mut session = Session::new(
            user_id,
            model_id.unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            self.config.retention,
        );
        session.total_files = files.len() as u32;
        session.total_pages = total_pages;
        self.store.create_session(session.clone()).await?;

        match self.upload_and_enqueue(&session, files, &page_counts).await {
            Ok(jobs) => {
                self.store.insert_jobs(jobs).await?;
            }
            Err(err) => {
                // The lifecycle manager sweeps any partial blobs at expiry.
                self.store
                    .refund_credits(user_id, i64::from(total_pages))
                    .await?;
                self.store
                    .try_transition_session(
                        session.id,
                        &[SessionStatus::Uploading],
                        SessionStatus::Failed,
                    )
                    .await?;
                return Err(err);
            }
        }

        tracing::info!(
            target: TRACING_TARGET,
            session_id = %session.id,
            total_pages,
            "session created"
        );

        Ok(session)
    }

    /// Uploads originals plus page payloads and builds the job rows.
    async fn upload_and_enqueue(
        &self,
        session: &Session,
        files: Vec<UploadFile>,
        page_counts: &[u32],
    ) -> Result<Vec<Job>> {
        let prefix = session.prefix();
        let mut jobs = Vec::new();

        for (file, &page_count) in files.into_iter().zip(page_counts) {
            let stamp = UploadStamp::now();

            let original_path = prefix.original_path(&stamp, &file.name);
            self.storage
                .put(&original_path, file.bytes.clone())
                .await
                .map_err(Error::from)?;

            let mut parent = Job::parent(session.id, &file.name, page_count);
            parent.blob_url = Some(original_path);

            let (stem, _) = split_extension(&file.name);
            let pages = split::split_pages(&file.bytes)?;

            let mut children = Vec::with_capacity(pages.len());
            for page in pages {
                let page_path = prefix.page_path(&stamp, stem, page.page_number);
                self.storage
                    .put(&page_path, page.bytes)
                    .await
                    .map_err(Error::from)?;

                let page_file_name = page_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&page_path)
                    .to_string();
                let mut child = Job::child(&parent, page_file_name, page.page_number);
                child.blob_url = Some(page_path);
                children.push(child);
            }

            jobs.push(parent);
            jobs.extend(children);
        }

        Ok(jobs)
    }

    /// Aggregated session view for the status endpoints.
    pub async fn status(&self, session_id: Uuid) -> Result<SessionView> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;
        let jobs = self.store.list_jobs(session_id).await?;
        let user_credits = self.store.credits(&session.user_id).await?;

        // Past the retention instant the session reads as expired even if
        // the cleanup pass has not run yet.
        let status = if session.is_expired_at(Timestamp::now()) {
            SessionStatus::Expired
        } else {
            session.status
        };

        let children = jobs.iter().filter(|job| job.is_child());
        let completed_jobs = children
            .clone()
            .filter(|job| job.status == JobStatus::Completed)
            .count() as u32;
        let failed_jobs = children
            .clone()
            .filter(|job| job.status == JobStatus::Failed)
            .count() as u32;

        Ok(SessionView {
            session_id: session.id,
            status,
            total_files: session.total_files,
            total_pages: session.total_pages,
            processed_pages: session.processed_pages,
            progress: session.progress(),
            completed_jobs,
            failed_jobs,
            user_credits,
            created_at: session.created_at,
            expires_at: session.expires_at,
            zip_url: session.zip_url.clone(),
            jobs: jobs.iter().map(JobView::from_job).collect(),
        })
    }

    /// Gatekeeper for the download endpoint.
    ///
    /// Fails with `SessionExpired` past retention and `NotFound` until the
    /// session has completed.
    pub async fn downloadable(&self, session_id: Uuid) -> Result<Session> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;

        if session.status == SessionStatus::Expired
            || session.is_expired_at(Timestamp::now())
        {
            return Err(Error::session_expired());
        }
        if session.status != SessionStatus::Completed {
            return Err(Error::not_found().with_detail("session is not completed"));
        }

        Ok(session)
    }

    /// Cancels a session and its outstanding jobs.
    ///
    /// Returns false when the session was already terminal (idempotent
    /// after completion or expiry). Provider-side operations are left to
    /// finish unobserved; their results are discarded.
    pub async fn cancel(&self, session_id: Uuid) -> Result<bool> {
        let cancelled = self
            .store
            .try_transition_session(
                session_id,
                &[
                    SessionStatus::Uploading,
                    SessionStatus::Processing,
                    SessionStatus::PostProcessing,
                ],
                SessionStatus::Cancelled,
            )
            .await?;
        if !cancelled {
            return Ok(false);
        }

        for job in self.store.list_jobs(session_id).await? {
            if job.is_child() && !job.status.is_terminal() {
                self.store.cancel_job(job.id).await?;
            }
        }

        tracing::info!(
            target: TRACING_TARGET,
            session_id = %session_id,
            "session cancelled"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use docket_data::{MemoryStore, SessionStore};
    use docket_opendal::StorageConfig;

    use super::*;

    fn coordinator_with(store: Arc<MemoryStore>) -> (Coordinator, StorageBackend) {
        let storage = StorageBackend::new(StorageConfig::Memory).unwrap();
        let config = PipelineConfig::default();
        (
            Coordinator::new(store, storage.clone(), config),
            storage,
        )
    }

    fn png_upload(name: &str) -> UploadFile {
        UploadFile {
            name: name.to_string(),
            bytes: Bytes::from_static(b"\x89PNG\r\n\x1a\nimage"),
        }
    }

    #[tokio::test]
    async fn create_uploads_blobs_and_rows() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, storage) = coordinator_with(Arc::clone(&store));

        let session = coordinator
            .create_session("u-1", vec![png_upload("scan.png")], None)
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Uploading);
        assert_eq!(session.total_files, 1);
        assert_eq!(session.total_pages, 1);

        let jobs = store.list_jobs(session.id).await.unwrap();
        assert_eq!(jobs.len(), 2, "one parent, one page job");

        let child = jobs.iter().find(|job| job.is_child()).unwrap();
        assert_eq!(child.status, JobStatus::Queued);
        let blob = child.blob_url.as_ref().unwrap();
        assert!(blob.contains("/pages/"));
        assert!(blob.ends_with("_scan_page_1.pdf"));
        assert!(storage.exists(blob).await.unwrap());

        let originals = storage
            .list_by_prefix(&session.prefix().originals_dir())
            .await
            .unwrap();
        assert_eq!(originals.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_empty_and_oversized_batches() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator_with(store);

        let err = coordinator
            .create_session("u-1", vec![], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, docket_core::ErrorKind::InvalidInput);

        let too_many: Vec<UploadFile> = (0..21).map(|i| png_upload(&format!("f{i}.png"))).collect();
        let err = coordinator
            .create_session("u-1", too_many, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, docket_core::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn create_charges_and_refuses_without_credits() {
        let store = Arc::new(MemoryStore::with_credit_grant(1));
        let (coordinator, _) = coordinator_with(Arc::clone(&store));

        coordinator
            .create_session("u-1", vec![png_upload("a.png")], None)
            .await
            .unwrap();
        assert_eq!(store.credits("u-1").await.unwrap(), 0);

        let err = coordinator
            .create_session("u-1", vec![png_upload("b.png")], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, docket_core::ErrorKind::InsufficientCredits);
    }

    #[tokio::test]
    async fn zero_byte_upload_is_corrupt() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator_with(store);

        let err = coordinator
            .create_session(
                "u-1",
                vec![UploadFile {
                    name: "empty.pdf".into(),
                    bytes: Bytes::new(),
                }],
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, docket_core::ErrorKind::CorruptInput);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_terminalizes_jobs() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator_with(Arc::clone(&store));

        let session = coordinator
            .create_session("u-1", vec![png_upload("a.png")], None)
            .await
            .unwrap();

        assert!(coordinator.cancel(session.id).await.unwrap());
        assert!(!coordinator.cancel(session.id).await.unwrap());

        let jobs = store.list_jobs(session.id).await.unwrap();
        for job in jobs.iter().filter(|job| job.is_child()) {
            assert_eq!(job.status, JobStatus::Cancelled);
        }
        let session = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn status_reports_expired_past_retention() {
        let store = Arc::new(MemoryStore::new());
        let (coordinator, _) = coordinator_with(Arc::clone(&store));

        let session = coordinator
            .create_session("u-1", vec![png_upload("a.png")], None)
            .await
            .unwrap();

        // Pull the expiry into the past.
        store
            .set_expires_at(session.id, Timestamp::now() - jiff::SignedDuration::from_secs(1))
            .await
            .unwrap();

        let view = coordinator.status(session.id).await.unwrap();
        assert_eq!(view.status, SessionStatus::Expired);

        let err = coordinator.downloadable(session.id).await.unwrap_err();
        assert_eq!(err.kind, docket_core::ErrorKind::SessionExpired);
    }
}
