//! Storage backend configuration.

use serde::{Deserialize, Serialize};

/// Configuration selecting and parameterizing a storage service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    #[cfg(feature = "fs")]
    Fs {
        /// Root directory all blob paths resolve under.
        root: String,
    },

    /// Amazon S3 (or S3-compatible) storage.
    #[cfg(feature = "s3")]
    S3 {
        /// Bucket name.
        bucket: String,
        /// Bucket region.
        region: String,
        /// Custom endpoint for S3-compatible services.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
        /// Static access key id; falls back to ambient credentials.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_key_id: Option<String>,
        /// Static secret access key.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_access_key: Option<String>,
    },

    /// Process-local in-memory storage, used by tests and demos.
    #[cfg(feature = "memory")]
    Memory,
}

impl StorageConfig {
    /// Returns the backend name for logging.
    pub fn backend_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "fs")]
            Self::Fs { .. } => "fs",
            #[cfg(feature = "s3")]
            Self::S3 { .. } => "s3",
            #[cfg(feature = "memory")]
            Self::Memory => "memory",
        }
    }
}
