//! Error handling for the extraction pipeline.
//!
//! Errors carry a [`ErrorKind`] describing what went wrong plus an optional
//! source error for debugging. Kinds are classified into retryable
//! (transient extractor/storage conditions) and permanent failures; the
//! dispatcher consults this classification to decide between backoff and
//! failing the owning job.

use std::error::Error as StdError;

/// Type alias for boxed dynamic errors that can be sent across threads.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type alias for pipeline operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The specific kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error for additional context.
    #[source]
    pub source: Option<BoxedError>,
    /// Optional human-readable detail, recorded on failed jobs.
    pub detail: Option<String>,
}

/// Specific kinds of pipeline errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    /// The request or uploaded payload is invalid.
    #[error("invalid input")]
    InvalidInput,

    /// The user does not have enough credits for the requested pages.
    #[error("insufficient credits")]
    InsufficientCredits,

    /// The blob store rejected or failed an operation.
    #[error("storage unavailable")]
    StorageUnavailable,

    /// Transient extractor failure (rate limit, 5xx, network).
    #[error("transient extractor failure")]
    ExtractorTransient,

    /// Permanent extractor failure (non-retryable 4xx).
    #[error("permanent extractor failure")]
    ExtractorPermanent,

    /// Polling exceeded the per-job deadline.
    #[error("poll timeout")]
    PollTimeout,

    /// The input document could not be decoded.
    #[error("corrupt input")]
    CorruptInput,

    /// Post-processing failed; the owning job stays completed.
    #[error("post-processing failed")]
    PostProcessFailed,

    /// The session passed its retention window.
    #[error("session expired")]
    SessionExpired,

    /// The requested resource does not exist.
    #[error("not found")]
    NotFound,

    /// The operation was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            source: None,
            detail: None,
        }
    }

    /// Creates a new error with the given kind and source error.
    pub fn with_source(kind: ErrorKind, source: BoxedError) -> Self {
        Self {
            kind,
            source: Some(source),
            detail: None,
        }
    }

    /// Attaches a human-readable detail message.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Returns true if the operation should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ExtractorTransient | ErrorKind::StorageUnavailable
        )
    }

    /// The short machine-readable code recorded on failed jobs.
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl ErrorKind {
    /// Stable machine-readable code for this kind.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
            Self::ExtractorTransient => "EXTRACTOR_TRANSIENT",
            Self::ExtractorPermanent => "EXTRACTOR_PERMANENT",
            Self::PollTimeout => "POLL_TIMEOUT",
            Self::CorruptInput => "CORRUPT_INPUT",
            Self::PostProcessFailed => "POST_PROCESS_FAILED",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::NotFound => "NOT_FOUND",
            Self::Cancelled => "CANCELLED",
        }
    }
}

// Convenience constructors for common error scenarios
impl Error {
    /// Creates an invalid input error.
    pub fn invalid_input() -> Self {
        Self::new(ErrorKind::InvalidInput)
    }

    /// Creates an insufficient credits error.
    pub fn insufficient_credits() -> Self {
        Self::new(ErrorKind::InsufficientCredits)
    }

    /// Creates a storage error with source.
    pub fn storage(source: BoxedError) -> Self {
        Self::with_source(ErrorKind::StorageUnavailable, source)
    }

    /// Creates a transient extractor error.
    pub fn extractor_transient() -> Self {
        Self::new(ErrorKind::ExtractorTransient)
    }

    /// Creates a permanent extractor error.
    pub fn extractor_permanent() -> Self {
        Self::new(ErrorKind::ExtractorPermanent)
    }

    /// Creates a poll timeout error.
    pub fn poll_timeout() -> Self {
        Self::new(ErrorKind::PollTimeout)
    }

    /// Creates a corrupt input error.
    pub fn corrupt_input() -> Self {
        Self::new(ErrorKind::CorruptInput)
    }

    /// Creates a not found error.
    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    /// Creates a cancelled error.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// Creates a session expired error.
    pub fn session_expired() -> Self {
        Self::new(ErrorKind::SessionExpired)
    }
}
