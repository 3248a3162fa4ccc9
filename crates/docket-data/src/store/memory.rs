//! In-process session store.

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use docket_core::{Error, OperationId, Result};

use super::{SessionStore, TRACING_TARGET};
use crate::model::{CleanupLog, Job, JobStatus, Session, SessionProgress, SessionStatus};

/// Default credit grant for users the ledger has not seen before.
const DEFAULT_CREDIT_GRANT: i64 = 500;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, Session>,
    jobs: HashMap<Uuid, Job>,
    /// Job ids per session, in insertion order.
    session_jobs: HashMap<Uuid, Vec<Uuid>>,
    credits: HashMap<String, i64>,
    cleanup_logs: Vec<CleanupLog>,
}

/// In-memory [`SessionStore`] built on a single `RwLock`.
///
/// Conditional mutations hold the write guard across check and write, so
/// the per-row compare-and-set contract holds under every schedule.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    credit_grant: i64,
}

impl MemoryStore {
    /// Creates an empty store with the default credit grant.
    pub fn new() -> Self {
        Self::with_credit_grant(DEFAULT_CREDIT_GRANT)
    }

    /// Creates an empty store granting `credit_grant` to unseen users.
    pub fn with_credit_grant(credit_grant: i64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            credit_grant,
        }
    }

    /// Counts child-job progress for a session; call under the guard.
    fn progress_of(inner: &Inner, session_id: Uuid) -> SessionProgress {
        let mut progress = SessionProgress {
            processed_pages: 0,
            total_pages: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            all_children_terminal: true,
        };

        for job_id in inner.session_jobs.get(&session_id).into_iter().flatten() {
            let Some(job) = inner.jobs.get(job_id) else {
                continue;
            };
            if !job.is_child() {
                continue;
            }
            progress.total_pages += 1;
            match job.status {
                JobStatus::Completed => {
                    progress.completed_jobs += 1;
                    progress.processed_pages += 1;
                }
                JobStatus::Failed => {
                    progress.failed_jobs += 1;
                    progress.processed_pages += 1;
                }
                JobStatus::Expired | JobStatus::Cancelled => {
                    progress.processed_pages += 1;
                }
                _ => progress.all_children_terminal = false,
            }
        }

        progress
    }

    /// Applies a terminal transition to a child job and counts the page
    /// exactly once. Returns the progress observed under the same guard.
    async fn terminalize(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
        apply: impl FnOnce(&mut Job),
    ) -> Result<Option<SessionProgress>> {
        let mut inner = self.inner.write().await;

        let Some(job) = inner.jobs.get_mut(&id) else {
            return Err(Error::not_found());
        };
        // Parents aggregate; only child jobs count pages.
        if !job.is_child() || !from.contains(&job.status) || !job.status.can_transition_to(to) {
            return Ok(None);
        }

        job.status = to;
        job.pages_processed = job.page_count;
        apply(job);
        let session_id = job.session_id;

        // The page is counted in the same critical section as the status
        // flip; a lost CAS above never reaches this point.
        if let Some(session) = inner.sessions.get_mut(&session_id) {
            session.processed_pages = (session.processed_pages + 1).min(session.total_pages);
        }

        Ok(Some(Self::progress_of(&inner, session_id)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: Session) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.session_jobs.entry(session.id).or_default();
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn insert_jobs(&self, jobs: Vec<Job>) -> Result<()> {
        let mut inner = self.inner.write().await;
        for job in jobs {
            inner
                .session_jobs
                .entry(job.session_id)
                .or_default()
                .push(job.id);
            inner.jobs.insert(job.id, job);
        }
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs(&self, session_id: Uuid) -> Result<Vec<Job>> {
        let inner = self.inner.read().await;
        let ids = inner.session_jobs.get(&session_id);
        Ok(ids
            .into_iter()
            .flatten()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect())
    }

    async fn try_transition_session(
        &self,
        id: Uuid,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&id) else {
            return Err(Error::not_found());
        };
        if !from.contains(&session.status) || !session.status.can_transition_to(to) {
            return Ok(false);
        }

        tracing::debug!(
            target: TRACING_TARGET,
            session_id = %id,
            from = %session.status,
            to = %to,
            "session transition"
        );
        session.status = to;
        Ok(true)
    }

    async fn try_transition_job(
        &self,
        id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Err(Error::not_found());
        };
        if !from.contains(&job.status) || !job.status.can_transition_to(to) {
            return Ok(false);
        }
        job.status = to;
        Ok(true)
    }

    async fn record_job_submitted(&self, id: Uuid, operation_id: OperationId) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Err(Error::not_found());
        };
        // Polling is accepted for resubmissions: the job stays in Polling
        // and only the operation handle is replaced.
        if !matches!(job.status, JobStatus::Processing | JobStatus::Polling) {
            return Ok(false);
        }
        job.operation_id = Some(operation_id);
        job.status = JobStatus::Polling;
        Ok(true)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        fields: serde_json::Value,
    ) -> Result<Option<SessionProgress>> {
        self.terminalize(
            id,
            &[JobStatus::Processing, JobStatus::Polling],
            JobStatus::Completed,
            |job| {
                job.extracted_fields = Some(fields);
                job.error = None;
            },
        )
        .await
    }

    async fn fail_job(&self, id: Uuid, error: String) -> Result<Option<SessionProgress>> {
        self.terminalize(
            id,
            &[
                JobStatus::Queued,
                JobStatus::Uploading,
                JobStatus::Processing,
                JobStatus::Polling,
            ],
            JobStatus::Failed,
            |job| job.error = Some(error),
        )
        .await
    }

    async fn cancel_job(&self, id: Uuid) -> Result<Option<SessionProgress>> {
        self.terminalize(
            id,
            &[
                JobStatus::Queued,
                JobStatus::Uploading,
                JobStatus::Processing,
                JobStatus::Polling,
            ],
            JobStatus::Cancelled,
            |_| {},
        )
        .await
    }

    async fn set_processed_file(
        &self,
        id: Uuid,
        processed_file_url: String,
        new_file_name: String,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Err(Error::not_found());
        };
        if job.status != JobStatus::Completed {
            return Ok(false);
        }
        job.processed_file_url = Some(processed_file_url);
        job.new_file_name = Some(new_file_name);
        Ok(true)
    }

    async fn begin_post_processing(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Err(Error::not_found());
        };
        session.post_processing_started_at = Some(jiff::Timestamp::now());
        Ok(())
    }

    async fn finish_post_processing(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Err(Error::not_found());
        };
        session.post_processing_completed_at = Some(jiff::Timestamp::now());
        Ok(())
    }

    async fn bump_post_processed(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Err(Error::not_found());
        };
        session.post_processed_count += 1;
        Ok(())
    }

    async fn set_zip_url(&self, session_id: Uuid, zip_url: String) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Err(Error::not_found());
        };
        session.zip_url = Some(zip_url);
        Ok(())
    }

    async fn set_expires_at(&self, session_id: Uuid, expires_at: jiff::Timestamp) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(session) = inner.sessions.get_mut(&session_id) else {
            return Err(Error::not_found());
        };
        session.expires_at = expires_at;
        Ok(())
    }

    async fn list_expiry_schedule(&self) -> Result<Vec<(Uuid, jiff::Timestamp)>> {
        let inner = self.inner.read().await;
        let mut schedule: Vec<_> = inner
            .sessions
            .values()
            .filter(|session| session.status != SessionStatus::Expired)
            .map(|session| (session.id, session.expires_at))
            .collect();
        schedule.sort_by_key(|(_, at)| *at);
        Ok(schedule)
    }

    async fn credits(&self, user_id: &str) -> Result<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .credits
            .get(user_id)
            .copied()
            .unwrap_or(self.credit_grant))
    }

    async fn try_debit_credits(&self, user_id: &str, amount: i64) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let balance = inner
            .credits
            .entry(user_id.to_string())
            .or_insert(self.credit_grant);
        if *balance < amount {
            return Ok(false);
        }
        *balance -= amount;
        Ok(true)
    }

    async fn refund_credits(&self, user_id: &str, amount: i64) -> Result<()> {
        let mut inner = self.inner.write().await;
        let balance = inner
            .credits
            .entry(user_id.to_string())
            .or_insert(self.credit_grant);
        *balance += amount;
        Ok(())
    }

    async fn append_cleanup_log(&self, log: CleanupLog) -> Result<()> {
        self.inner.write().await.cleanup_logs.push(log);
        Ok(())
    }

    async fn cleanup_logs(&self) -> Result<Vec<CleanupLog>> {
        Ok(self.inner.read().await.cleanup_logs.clone())
    }
}
