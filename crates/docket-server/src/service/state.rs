//! Application state and dependency injection.

use std::sync::Arc;

use docket_core::Result;
use docket_core::extract::BoxedExtractor;
use docket_data::MemoryStore;
use docket_extract::{ExtractorConfig, HttpExtractor};
use docket_opendal::StorageBackend;
use docket_pipeline::Pipeline;

use super::{ProviderConfig, ServiceConfig};

/// Application state.
///
/// Used for the [`State`] extraction (dependency injection).
///
/// [`State`]: axum::extract::State
#[must_use = "state does nothing unless you use it"]
#[derive(Clone)]
pub struct ServiceState {
    pipeline: Pipeline,
    config: ServiceConfig,
}

impl ServiceState {
    /// Initializes application state from configuration.
    ///
    /// Builds the storage backend and extraction client and assembles the
    /// pipeline over the embedded session store.
    pub fn from_config(config: ServiceConfig) -> Result<Self> {
        let storage = StorageBackend::new(config.storage.clone())?;
        let store = Arc::new(MemoryStore::with_credit_grant(config.credit_grant));

        let extractor: BoxedExtractor = match &config.provider {
            ProviderConfig::Http { endpoint, api_key } => Arc::new(HttpExtractor::new(
                ExtractorConfig::new(endpoint.as_str(), api_key.as_str()),
            )?),
            #[cfg(feature = "mock")]
            ProviderConfig::Mock => Arc::new(docket_extract::mock::MockExtractor::new()),
        };

        let pipeline = Pipeline::new(store, storage, extractor, config.pipeline.clone());

        Ok(Self { pipeline, config })
    }

    /// Assembles state over a pre-built pipeline (tests).
    pub fn with_pipeline(pipeline: Pipeline, config: ServiceConfig) -> Self {
        Self { pipeline, config }
    }

    /// The assembled pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Starts pipeline background work (lifecycle scheduler).
    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        self.pipeline.start()
    }

    /// Stops pipeline background work.
    pub fn shutdown(&self) {
        self.pipeline.shutdown();
    }
}

macro_rules! impl_di {
    ($($f:ident: $t:ty),+) => {$(
        impl axum::extract::FromRef<ServiceState> for $t {
            fn from_ref(state: &ServiceState) -> Self {
                state.$f.clone()
            }
        }
    )+};
}

impl_di!(pipeline: Pipeline);
impl_di!(config: ServiceConfig);
