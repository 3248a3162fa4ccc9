//! Extraction provider abstractions.
//!
//! The external document-understanding service is a long-running-operation
//! API: a submission returns an operation handle immediately and the
//! caller polls until the provider reports a terminal status. This module
//! defines the trait the dispatcher drives; concrete clients live in
//! `docket-extract`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Type alias for a shared extractor implementation.
pub type BoxedExtractor = Arc<dyn Extractor + Send + Sync>;

/// Tracing target for extraction operations.
pub const TRACING_TARGET: &str = "docket_core::extract";

/// Handle for a long-running extraction operation at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(String);

impl OperationId {
    /// Wraps a provider-issued operation handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw handle as issued by the provider.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One poll observation of a pending operation.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The provider is still working; `retry_after` is its pacing hint.
    Running {
        /// Provider-supplied `Retry-After` hint, when present.
        retry_after: Option<Duration>,
    },
    /// Extraction finished; `fields` is the provider's raw field map.
    Succeeded {
        /// Raw extracted fields, shaped per model.
        fields: serde_json::Value,
        /// Overall extraction confidence in `0.0..=1.0`.
        confidence: Option<f64>,
    },
    /// Extraction failed at the provider.
    Failed {
        /// Provider failure message.
        message: String,
        /// Whether resubmitting the page may succeed.
        transient: bool,
    },
}

impl PollOutcome {
    /// Returns true once the operation reached a terminal provider status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running { .. })
    }
}

/// Core trait for the external extraction service.
///
/// Implementations must classify their errors as transient vs permanent
/// (`ErrorKind::ExtractorTransient` / `ExtractorPermanent`) so the
/// dispatcher can apply its retry budget correctly, and must surface
/// provider `Retry-After` hints through [`PollOutcome::Running`].
#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    /// Submits one page payload for extraction under the given model.
    ///
    /// Returns the provider's operation handle; the actual work continues
    /// asynchronously at the provider.
    async fn submit(&self, model_id: &str, payload: Bytes) -> Result<OperationId>;

    /// Observes the current status of a pending operation.
    async fn poll(&self, operation_id: &OperationId) -> Result<PollOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_id_round_trips() {
        let id = OperationId::new("op-123");
        assert_eq!(id.as_str(), "op-123");
        assert_eq!(id.to_string(), "op-123");
    }

    #[test]
    fn running_is_not_terminal() {
        assert!(!PollOutcome::Running { retry_after: None }.is_terminal());
        assert!(
            PollOutcome::Failed {
                message: "boom".into(),
                transient: false
            }
            .is_terminal()
        );
    }
}
