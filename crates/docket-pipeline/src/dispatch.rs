//! Rate-limited extraction dispatcher.
//!
//! Consumes queued page jobs and drives each through submit → poll →
//! terminal state against the external extraction service, under the
//! shared token bucket and a process-wide concurrency cap. A dispatcher
//! run is idempotent: re-entry skips terminal jobs, resumes polling jobs
//! from their stored operation handle and resubmits jobs that never
//! received one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docket_core::extract::{BoxedExtractor, OperationId, PollOutcome};
use docket_core::fields::{CONFIDENCE_KEY, normalize_fields};
use docket_core::{Error, ErrorKind, Result};
use docket_data::{BoxedStore, Job, JobStatus, SessionStatus};
use docket_opendal::StorageBackend;

use crate::config::PipelineConfig;
use crate::limiter::RateLimiter;
use crate::postprocess::PostProcessor;

/// Tracing target for dispatcher operations.
const TRACING_TARGET: &str = "docket_pipeline::dispatch";

struct Inner {
    store: BoxedStore,
    storage: StorageBackend,
    extractor: BoxedExtractor,
    limiter: Arc<RateLimiter>,
    post_processor: PostProcessor,
    semaphore: Arc<Semaphore>,
    config: PipelineConfig,
    sessions: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Process-wide dispatcher over the shared worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given store, storage and extractor.
    pub fn new(
        store: BoxedStore,
        storage: StorageBackend,
        extractor: BoxedExtractor,
        limiter: Arc<RateLimiter>,
        config: PipelineConfig,
    ) -> Self {
        let post_processor = PostProcessor::new(
            Arc::clone(&store),
            storage.clone(),
            Arc::clone(&limiter),
            config.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                store,
                storage,
                extractor,
                limiter,
                post_processor,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
                sessions: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Cancellation token scoped to one session, derived from shutdown.
    pub fn session_token(&self, session_id: Uuid) -> CancellationToken {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(session_id)
            .or_insert_with(|| self.inner.shutdown.child_token())
            .clone()
    }

    /// Signals every in-flight task of a session to stop.
    ///
    /// Already-submitted provider operations are not aborted; their
    /// results are discarded when polling stops.
    pub fn cancel_session(&self, session_id: Uuid) {
        let sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = sessions.get(&session_id) {
            token.cancel();
        }
    }

    /// Cancels every session and stops accepting work.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    fn drop_session_token(&self, session_id: Uuid) {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }

    /// Drives every non-terminal page job of a session to a terminal
    /// state, then advances the session through post-processing.
    #[tracing::instrument(skip(self), target = TRACING_TARGET)]
    pub async fn run_session(&self, session_id: Uuid) -> Result<()> {
        let cancel = self.session_token(session_id);
        let session = self
            .inner
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;

        // First entry moves the session out of upload; on re-entry after a
        // restart the session is already processing and the CAS is a no-op.
        self.inner
            .store
            .try_transition_session(
                session_id,
                &[SessionStatus::Uploading],
                SessionStatus::Processing,
            )
            .await?;

        let jobs = self.inner.store.list_jobs(session_id).await?;
        let mut tasks = JoinSet::new();

        for job in jobs
            .into_iter()
            .filter(|job| job.is_child() && !job.status.is_terminal())
        {
            let inner = Arc::clone(&self.inner);
            let cancel = cancel.clone();
            let model_id = session.model_id.clone();

            tasks.spawn(async move {
                let Ok(permit) = inner.semaphore.clone().acquire_owned().await else {
                    return;
                };
                // Hold the permit for the whole job.
                let _permit = permit;

                process_job(&inner, &model_id, job, &cancel).await;
            });
        }

        while tasks.join_next().await.is_some() {}

        let result = self.finalize_session(session_id, &cancel).await;
        self.drop_session_token(session_id);
        result
    }

    /// Advances the session once every child job is terminal.
    async fn finalize_session(&self, session_id: Uuid, cancel: &CancellationToken) -> Result<()> {
        let store = &self.inner.store;
        let session = store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;

        // Cancelled or expired sessions keep their state; results of any
        // still-pending provider operations are discarded.
        if session.status.is_terminal() {
            return Ok(());
        }

        let jobs = store.list_jobs(session_id).await?;
        let all_terminal = jobs
            .iter()
            .filter(|job| job.is_child())
            .all(|job| job.status.is_terminal());
        if !all_terminal {
            // Another run (after cancel or crash) picks the rest up.
            return Ok(());
        }

        // Parents aggregate their children; mark them done now.
        for parent in jobs.iter().filter(|job| !job.is_child()) {
            store
                .try_transition_job(
                    parent.id,
                    &[
                        JobStatus::Queued,
                        JobStatus::Uploading,
                        JobStatus::Processing,
                        JobStatus::Polling,
                    ],
                    JobStatus::Completed,
                )
                .await?;
        }

        store
            .try_transition_session(
                session_id,
                &[SessionStatus::Processing],
                SessionStatus::PostProcessing,
            )
            .await?;

        self.inner
            .post_processor
            .post_process_session(session_id, cancel)
            .await?;

        // A session with zero successful jobs still completes; its archive
        // is an empty page set plus the summary.
        store
            .try_transition_session(
                session_id,
                &[SessionStatus::PostProcessing],
                SessionStatus::Completed,
            )
            .await?;

        tracing::info!(
            target: TRACING_TARGET,
            session_id = %session_id,
            "session completed"
        );

        Ok(())
    }
}

/// Drives one page job to a terminal state, absorbing cancellation.
async fn process_job(inner: &Inner, model_id: &str, job: Job, cancel: &CancellationToken) {
    let job_id = job.id;

    match drive_job(inner, model_id, &job, cancel).await {
        Ok(()) => {}
        Err(err) if err.kind == ErrorKind::Cancelled => {
            tracing::debug!(
                target: TRACING_TARGET,
                job_id = %job_id,
                "job cancelled"
            );
            if let Err(store_err) = inner.store.cancel_job(job_id).await {
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    error = %store_err,
                    "failed to record job cancellation"
                );
            }
        }
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET,
                job_id = %job_id,
                error = %err,
                "job failed"
            );
            if let Err(store_err) = inner.store.fail_job(job_id, error_text(&err)).await {
                tracing::error!(
                    target: TRACING_TARGET,
                    job_id = %job_id,
                    error = %store_err,
                    "failed to record job failure"
                );
            }
        }
    }
}

/// The submit/poll pipeline for one page.
async fn drive_job(
    inner: &Inner,
    model_id: &str,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<()> {
    let config = &inner.config;
    let deadline = Instant::now() + config.poll_deadline;
    let mut attempt: u32 = 0;

    'submission: loop {
        let operation = match resume_operation(job, attempt) {
            Some(operation) => operation,
            None => {
                match submit_job(inner, model_id, job, cancel).await {
                    Ok(operation) => operation,
                    Err(err) if err.is_retryable() && attempt + 1 < config.retry_attempts => {
                        attempt += 1;
                        tracing::debug!(
                            target: TRACING_TARGET,
                            job_id = %job.id,
                            attempt,
                            "transient submit failure, backing off"
                        );
                        sleep_cancellable(config.backoff_delay(attempt), cancel).await?;
                        continue 'submission;
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        // Poll until the provider lands the operation or the deadline hits.
        let mut hint: Option<Duration> = None;
        loop {
            let wait = hint
                .take()
                .map_or(config.poll_interval_min, |hinted| {
                    hinted.max(config.poll_interval_min)
                });
            sleep_cancellable(wait, cancel).await?;

            if Instant::now() >= deadline {
                return Err(Error::poll_timeout());
            }

            inner.limiter.acquire(cancel).await?;

            match inner.extractor.poll(&operation).await {
                Ok(PollOutcome::Running { retry_after }) => {
                    hint = retry_after;
                }
                Ok(PollOutcome::Succeeded { fields, confidence }) => {
                    let stored = shape_fields(&fields, confidence);
                    inner.store.complete_job(job.id, stored).await?;
                    tracing::debug!(
                        target: TRACING_TARGET,
                        job_id = %job.id,
                        "extraction complete"
                    );
                    return Ok(());
                }
                Ok(PollOutcome::Failed { message, transient }) => {
                    if transient && attempt + 1 < config.retry_attempts {
                        // The stored operation is spent; the resubmission
                        // replaces it via record_job_submitted.
                        attempt += 1;
                        sleep_cancellable(config.backoff_delay(attempt), cancel).await?;
                        continue 'submission;
                    }
                    let kind = if transient {
                        ErrorKind::ExtractorTransient
                    } else {
                        ErrorKind::ExtractorPermanent
                    };
                    return Err(Error::new(kind).with_detail(message));
                }
                Err(err) if err.is_retryable() && attempt + 1 < config.retry_attempts => {
                    attempt += 1;
                    tracing::debug!(
                        target: TRACING_TARGET,
                        job_id = %job.id,
                        attempt,
                        "transient poll failure, backing off"
                    );
                    sleep_cancellable(config.backoff_delay(attempt), cancel).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Reuses the stored operation handle on first entry for polling jobs.
fn resume_operation(job: &Job, attempt: u32) -> Option<OperationId> {
    if attempt == 0 && job.status == JobStatus::Polling {
        job.operation_id.clone()
    } else {
        None
    }
}

/// Acquires quota, uploads state and submits one page payload.
async fn submit_job(
    inner: &Inner,
    model_id: &str,
    job: &Job,
    cancel: &CancellationToken,
) -> Result<OperationId> {
    inner.limiter.acquire(cancel).await?;

    inner
        .store
        .try_transition_job(job.id, &[JobStatus::Queued], JobStatus::Processing)
        .await?;

    let blob_url = job
        .blob_url
        .as_deref()
        .ok_or_else(|| Error::invalid_input().with_detail("job has no input blob"))?;
    let payload = inner.storage.get(blob_url).await.map_err(Error::from)?;

    let operation = inner.extractor.submit(model_id, payload).await?;

    inner
        .store
        .record_job_submitted(job.id, operation.clone())
        .await?;

    tracing::debug!(
        target: TRACING_TARGET,
        job_id = %job.id,
        operation = %operation,
        "submitted for extraction"
    );

    Ok(operation)
}

/// Collapses provider fields into display strings plus the confidence key.
fn shape_fields(raw: &Value, confidence: Option<f64>) -> Value {
    let normalized = normalize_fields(raw);
    let mut map = serde_json::Map::new();

    for (name, value) in normalized {
        map.insert(name, Value::String(value.display().to_string()));
    }
    if let Some(number) = confidence.and_then(serde_json::Number::from_f64) {
        map.insert(CONFIDENCE_KEY.to_string(), Value::Number(number));
    }

    Value::Object(map)
}

fn error_text(err: &Error) -> String {
    match &err.detail {
        Some(detail) => format!("{}: {detail}", err.code()),
        None => err.code().to_string(),
    }
}

async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::cancelled()),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_fields_flattens_to_display_strings() {
        let raw = serde_json::json!({
            "Company Name": { "value": "Acme" },
            "Signed": { "kind": "signature", "state": "signed" },
        });
        let shaped = shape_fields(&raw, Some(0.875));
        let map = shaped.as_object().unwrap();

        assert_eq!(map["Company Name"], "Acme");
        assert_eq!(map["Signed"], "Signed");
        assert_eq!(map[CONFIDENCE_KEY], 0.875);
    }

    #[test]
    fn error_text_includes_code() {
        assert_eq!(error_text(&Error::poll_timeout()), "POLL_TIMEOUT");
        assert_eq!(
            error_text(&Error::extractor_permanent().with_detail("bad page")),
            "EXTRACTOR_PERMANENT: bad page"
        );
    }

    #[test]
    fn resume_only_on_first_attempt_of_polling_jobs() {
        let parent = Job::parent(Uuid::now_v7(), "a.pdf", 1);
        let mut job = Job::child(&parent, "a_page_1.pdf", 1);
        job.status = JobStatus::Polling;
        job.operation_id = Some(OperationId::new("op-1"));

        assert!(resume_operation(&job, 0).is_some());
        assert!(resume_operation(&job, 1).is_none());

        job.status = JobStatus::Processing;
        assert!(resume_operation(&job, 0).is_none());
    }
}
