//! Service configuration.

use docket_opendal::StorageConfig;
use docket_pipeline::PipelineConfig;

/// Extraction provider selection.
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    /// Real extraction service.
    Http {
        /// Service base URL.
        endpoint: String,
        /// API key.
        api_key: String,
    },
    /// In-process scripted extractor (demos, tests).
    #[cfg(feature = "mock")]
    Mock,
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Pipeline tuning (tier, limiter, retention, caps).
    pub pipeline: PipelineConfig,
    /// Blob storage backend.
    pub storage: StorageConfig,
    /// Extraction provider.
    pub provider: ProviderConfig,
    /// Credit grant for users the ledger has not seen.
    pub credit_grant: i64,
}

impl ServiceConfig {
    /// Request body cap derived from the per-file and per-session limits.
    pub fn body_limit(&self) -> usize {
        // Full batch plus multipart framing overhead.
        self.pipeline.max_file_size * self.pipeline.max_files_per_session + 1024 * 1024
    }
}

#[cfg(feature = "mock")]
impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::Memory,
            provider: ProviderConfig::Mock,
            credit_grant: 500,
        }
    }
}
