//! Retention lifecycle management.
//!
//! Holds the durable `(session, expiresAt)` schedule (read back from the
//! store, so it survives restarts), arms a single timer for the earliest
//! expiry and runs the idempotent per-session cleanup pass: mark the
//! session expired, delete every blob under its prefix, expire outstanding
//! jobs and append one cleanup log row per invocation.

use std::sync::Arc;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docket_core::{Error, Result};
use docket_data::{BoxedStore, CleanupLog, JobStatus, SessionStatus};
use docket_opendal::StorageBackend;

use crate::dispatch::Dispatcher;

/// Tracing target for lifecycle operations.
const TRACING_TARGET: &str = "docket_pipeline::lifecycle";

/// Timer fallback when no expiry is scheduled.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Session states a cleanup pass moves to `Expired`.
const EXPIRABLE: [SessionStatus; 6] = [
    SessionStatus::Uploading,
    SessionStatus::Processing,
    SessionStatus::PostProcessing,
    SessionStatus::Completed,
    SessionStatus::Failed,
    SessionStatus::Cancelled,
];

/// Job states a cleanup pass moves to `Expired`.
const EXPIRABLE_JOBS: [JobStatus; 4] = [
    JobStatus::Queued,
    JobStatus::Uploading,
    JobStatus::Processing,
    JobStatus::Polling,
];

/// Schedules and executes retention cleanup.
pub struct LifecycleManager {
    store: BoxedStore,
    storage: StorageBackend,
    dispatcher: Dispatcher,
    notify: Notify,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    /// Creates a manager over the given store, storage and dispatcher.
    pub fn new(store: BoxedStore, storage: StorageBackend, dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            store,
            storage,
            dispatcher,
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawns the scheduler task.
    ///
    /// On startup every session whose expiry is already past is processed
    /// immediately; afterwards the task sleeps until the earliest future
    /// expiry, re-armed whenever the schedule changes.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.run().await })
    }

    /// Re-arms the timer after a schedule change (new session, speed-up).
    pub fn poke(&self) {
        self.notify.notify_one();
    }

    /// Stops the scheduler task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn run(self: Arc<Self>) {
        tracing::info!(target: TRACING_TARGET, "lifecycle manager started");

        loop {
            let wait = match self.sweep_due().await {
                Ok(next) => next.map(clamp_until).unwrap_or(IDLE_WAIT),
                Err(err) => {
                    tracing::error!(
                        target: TRACING_TARGET,
                        error = %err,
                        "expiry sweep failed"
                    );
                    Duration::from_secs(30)
                }
            };

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    tracing::info!(target: TRACING_TARGET, "lifecycle manager stopped");
                    break;
                }
                () = self.notify.notified() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Cleans every due session; returns the next future expiry.
    async fn sweep_due(&self) -> Result<Option<Timestamp>> {
        let schedule = self.store.list_expiry_schedule().await?;
        let now = Timestamp::now();
        let mut next: Option<Timestamp> = None;

        for (session_id, expires_at) in schedule {
            if expires_at <= now {
                if let Err(err) = self.cleanup_session(session_id).await {
                    tracing::error!(
                        target: TRACING_TARGET,
                        session_id = %session_id,
                        error = %err,
                        "cleanup failed"
                    );
                }
            } else {
                next = Some(next.map_or(expires_at, |current| current.min(expires_at)));
            }
        }

        Ok(next)
    }

    /// Rewrites the persisted expiry and re-arms the timer.
    ///
    /// Used to pull retention forward in tests and support tooling; the
    /// cleanup itself still runs exactly once through the scheduler.
    pub async fn speed_up_expiration(&self, session_id: Uuid, expires_at: Timestamp) -> Result<()> {
        self.store.set_expires_at(session_id, expires_at).await?;
        self.poke();

        tracing::info!(
            target: TRACING_TARGET,
            session_id = %session_id,
            expires_at = %expires_at,
            "expiry rescheduled"
        );
        Ok(())
    }

    /// One idempotent cleanup pass over a session.
    ///
    /// Tolerates partial prior deletion: a second invocation finds no
    /// blobs and no non-terminal jobs, flips nothing, and still appends
    /// its own log row.
    #[tracing::instrument(skip(self), target = TRACING_TARGET)]
    pub async fn cleanup_session(&self, session_id: Uuid) -> Result<CleanupLog> {
        let mut log = CleanupLog::start();
        let mut errors = Vec::new();

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(Error::not_found)?;

        // Stop any in-flight dispatcher work before artifacts disappear.
        self.dispatcher.cancel_session(session_id);

        if self
            .store
            .try_transition_session(session_id, &EXPIRABLE, SessionStatus::Expired)
            .await?
        {
            log.sessions_expired = 1;
        }

        match self.storage.delete_by_prefix(&session.blob_prefix).await {
            Ok(deleted) => log.blobs_deleted = deleted as u32,
            Err(err) => errors.push(format!("blob deletion: {err}")),
        }

        for job in self.store.list_jobs(session_id).await? {
            if job.status.is_terminal() {
                continue;
            }
            match self
                .store
                .try_transition_job(job.id, &EXPIRABLE_JOBS, JobStatus::Expired)
                .await
            {
                Ok(true) => log.jobs_expired += 1,
                Ok(false) => {}
                Err(err) => errors.push(format!("job {}: {err}", job.id)),
            }
        }

        let log = log.finish(errors);
        self.store.append_cleanup_log(log.clone()).await?;

        tracing::info!(
            target: TRACING_TARGET,
            session_id = %session_id,
            sessions_expired = log.sessions_expired,
            jobs_expired = log.jobs_expired,
            blobs_deleted = log.blobs_deleted,
            status = %log.status,
            "cleanup pass finished"
        );

        Ok(log)
    }
}

/// Duration from now until `at`, floored at zero.
fn clamp_until(at: Timestamp) -> Duration {
    let now = Timestamp::now();
    if at <= now {
        return Duration::ZERO;
    }
    Duration::try_from(at.duration_since(now)).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use docket_data::{CleanupStatus, MemoryStore, Session, SessionStore};
    use docket_opendal::StorageConfig;

    use crate::config::PipelineConfig;
    use crate::limiter::RateLimiter;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        storage: StorageBackend,
        manager: Arc<LifecycleManager>,
    }

    fn fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let storage = StorageBackend::new(StorageConfig::Memory).unwrap();
        let config = PipelineConfig::default();
        let limiter = Arc::new(RateLimiter::new(config.burst, config.rate));
        let extractor: docket_core::extract::BoxedExtractor =
            Arc::new(docket_extract::mock::MockExtractor::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            storage.clone(),
            extractor,
            limiter,
            config,
        );
        let manager = LifecycleManager::new(store.clone(), storage.clone(), dispatcher);
        Fixture {
            store,
            storage,
            manager,
        }
    }

    async fn seeded_session(fixture: &Fixture, retention: Duration) -> Session {
        let session = Session::new("u-1", "m", retention);
        fixture.store.create_session(session.clone()).await.unwrap();
        fixture
            .storage
            .put(
                &format!("{}originals/1_aaaaaa_a.pdf", session.blob_prefix),
                Bytes::from_static(b"pdf"),
            )
            .await
            .unwrap();
        fixture
            .storage
            .put(
                &format!("{}pages/1_aaaaaa_a_page_1.pdf", session.blob_prefix),
                Bytes::from_static(b"page"),
            )
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn cleanup_expires_and_deletes() {
        let fixture = fixture();
        let session = seeded_session(&fixture, Duration::from_secs(3600)).await;

        let log = fixture.manager.cleanup_session(session.id).await.unwrap();
        assert_eq!(log.sessions_expired, 1);
        assert_eq!(log.blobs_deleted, 2);
        assert_eq!(log.status, CleanupStatus::Completed);

        let session = fixture.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Expired);
        assert!(
            fixture
                .storage
                .list_by_prefix(&session.blob_prefix)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_with_one_log_row_each() {
        let fixture = fixture();
        let session = seeded_session(&fixture, Duration::from_secs(3600)).await;

        let first = fixture.manager.cleanup_session(session.id).await.unwrap();
        let second = fixture.manager.cleanup_session(session.id).await.unwrap();

        assert_eq!(first.blobs_deleted, 2);
        assert_eq!(second.blobs_deleted, 0, "no new deletions on re-run");
        assert_eq!(second.sessions_expired, 0);

        let logs = fixture.store.cleanup_logs().await.unwrap();
        assert_eq!(logs.len(), 2, "exactly one log row per invocation");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn startup_scan_processes_past_expiries() {
        let fixture = fixture();
        let session = seeded_session(&fixture, Duration::from_millis(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let handle = fixture.manager.spawn();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let refreshed = fixture.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, SessionStatus::Expired);

        fixture.manager.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn speed_up_reschedules_without_duplicate_runs() {
        let fixture = fixture();
        let session = seeded_session(&fixture, Duration::from_secs(3600)).await;

        let handle = fixture.manager.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        fixture
            .manager
            .speed_up_expiration(session.id, Timestamp::now())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let refreshed = fixture.store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, SessionStatus::Expired);

        // Expired sessions leave the schedule, so the pass ran once.
        let logs = fixture.store.cleanup_logs().await.unwrap();
        assert_eq!(logs.len(), 1);

        fixture.manager.shutdown();
        handle.await.unwrap();
    }
}
