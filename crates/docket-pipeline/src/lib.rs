#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod lifecycle;
pub mod limiter;
pub mod package;
pub mod postprocess;
pub mod split;

use std::sync::Arc;

use jiff::Timestamp;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use config::{PipelineConfig, Tier};
pub use coordinator::{Coordinator, JobView, SessionView, UploadFile};
pub use dispatch::Dispatcher;
pub use lifecycle::LifecycleManager;
pub use limiter::RateLimiter;
pub use package::{ArchiveSpool, Packager};
pub use postprocess::PostProcessor;
pub use split::PageDocument;

use docket_core::Result;
use docket_core::extract::BoxedExtractor;
use docket_data::{BoxedStore, Session};
use docket_opendal::StorageBackend;

/// Tracing target for pipeline orchestration.
const TRACING_TARGET: &str = "docket_pipeline";

/// The assembled extraction pipeline.
///
/// Wires the coordinator, dispatcher, packager and lifecycle manager over
/// one store/storage/extractor triple. The HTTP surface talks only to
/// this type.
#[derive(Clone)]
pub struct Pipeline {
    coordinator: Coordinator,
    dispatcher: Dispatcher,
    packager: Packager,
    lifecycle: Arc<LifecycleManager>,
}

impl Pipeline {
    /// Assembles a pipeline from its external seams.
    pub fn new(
        store: BoxedStore,
        storage: StorageBackend,
        extractor: BoxedExtractor,
        config: PipelineConfig,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.burst, config.rate));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            storage.clone(),
            extractor,
            limiter,
            config.clone(),
        );
        let coordinator = Coordinator::new(Arc::clone(&store), storage.clone(), config);
        let packager = Packager::new(Arc::clone(&store), storage.clone());
        let lifecycle = LifecycleManager::new(store, storage, dispatcher.clone());

        Self {
            coordinator,
            dispatcher,
            packager,
            lifecycle,
        }
    }

    /// Starts the lifecycle scheduler (startup expiry scan included).
    pub fn start(&self) -> JoinHandle<()> {
        self.lifecycle.spawn()
    }

    /// Creates a session from an upload batch and begins processing it.
    pub async fn upload(
        &self,
        user_id: &str,
        files: Vec<UploadFile>,
        model_id: Option<String>,
    ) -> Result<SessionView> {
        let session = self
            .coordinator
            .create_session(user_id, files, model_id)
            .await?;
        self.lifecycle.poke();

        let dispatcher = self.dispatcher.clone();
        let session_id = session.id;
        tokio::spawn(async move {
            if let Err(err) = dispatcher.run_session(session_id).await {
                tracing::error!(
                    target: TRACING_TARGET,
                    session_id = %session_id,
                    error = %err,
                    "session run failed"
                );
            }
        });

        self.coordinator.status(session.id).await
    }

    /// Aggregated status view.
    pub async fn status(&self, session_id: Uuid) -> Result<SessionView> {
        self.coordinator.status(session_id).await
    }

    /// Cancels a session: store state first, then in-flight tasks.
    ///
    /// Returns false when the session was already terminal.
    pub async fn cancel(&self, session_id: Uuid) -> Result<bool> {
        self.dispatcher.cancel_session(session_id);
        self.coordinator.cancel(session_id).await
    }

    /// Builds (and exports) the session archive for download.
    ///
    /// The export to the blob store is best-effort: the caller still gets
    /// the spooled archive when only the export leg fails.
    pub async fn download(&self, session_id: Uuid) -> Result<(Session, ArchiveSpool)> {
        let session = self.coordinator.downloadable(session_id).await?;
        let spool = self.packager.build_archive(&session).await?;

        if let Err(err) = self.packager.export(&session, &spool).await {
            tracing::warn!(
                target: TRACING_TARGET,
                session_id = %session_id,
                error = %err,
                "archive export failed; streaming spool only"
            );
        }

        Ok((session, spool))
    }

    /// Rewrites a session expiry and re-arms the cleanup timer.
    pub async fn speed_up_expiration(&self, session_id: Uuid, expires_at: Timestamp) -> Result<()> {
        self.lifecycle.speed_up_expiration(session_id, expires_at).await
    }

    /// Re-enters processing for a session (restart recovery).
    pub async fn resume_session(&self, session_id: Uuid) -> Result<()> {
        self.dispatcher.run_session(session_id).await
    }

    /// Stops background work: in-flight jobs and the cleanup scheduler.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
        self.lifecycle.shutdown();
    }
}
