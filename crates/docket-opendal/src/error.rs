//! Storage error types.

use docket_core::{Error as CoreError, ErrorKind};

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Error raised by the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The object does not exist.
    #[error("object not found: {path}")]
    NotFound {
        /// Path that was requested.
        path: String,
    },

    /// The configured service does not support the operation.
    #[error("unsupported storage operation: {operation}")]
    Unsupported {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// The underlying service failed.
    #[error("storage backend error")]
    Backend(#[source] opendal::Error),

    /// A streaming read or write failed mid-transfer.
    #[error("storage i/o error")]
    Io(#[source] std::io::Error),
}

impl StorageError {
    /// Classifies an OpenDAL error, preserving not-found semantics.
    pub fn from_opendal(path: &str, err: opendal::Error) -> Self {
        if err.kind() == opendal::ErrorKind::NotFound {
            Self::NotFound { path: path.into() }
        } else {
            Self::Backend(err)
        }
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => CoreError::new(ErrorKind::NotFound),
            other => CoreError::with_source(ErrorKind::StorageUnavailable, Box::new(other)),
        }
    }
}
