//! HTTP error handling.
//!
//! Handlers return [`Error`] values built from an [`ErrorKind`] with
//! optional message and context; the kind fixes the status code and the
//! response body is a stable JSON shape. Pipeline errors map onto kinds
//! through `From`, so handlers mostly just use `?`.

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use docket_core::ErrorKind as CoreErrorKind;

use crate::handler::response::ErrorResponse;

/// The error type for HTTP handlers in the server.
#[derive(Debug, Clone)]
#[must_use = "errors do nothing unless serialized"]
pub struct Error {
    kind: ErrorKind,
    message: Option<Cow<'static, str>>,
    context: Option<Cow<'static, str>>,
}

impl Error {
    /// Creates a new [`Error`] with the specified kind.
    #[inline]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            context: None,
        }
    }

    /// Sets a custom user-facing message.
    #[inline]
    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches debugging context included in the response.
    #[inline]
    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Returns the error kind.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.as_deref().unwrap_or(self.kind.message());
        write!(f, "{} ({}): {}", self.kind.name(), self.kind.status(), message)
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let message = self
            .message
            .unwrap_or_else(|| Cow::Borrowed(self.kind.message()));
        ErrorResponse::new(self.kind.status(), self.kind.name(), message, self.context)
            .into_response()
    }
}

impl From<ErrorKind> for Error {
    #[inline]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// A specialized [`Result`] type for HTTP handlers.
///
/// [`Result`]: std::result::Result
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// HTTP error kinds used by the session surface.
#[must_use = "error kinds do nothing unless used to create errors"]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 400 Bad Request
    BadRequest,
    /// 402 Payment Required
    PaymentRequired,
    /// 404 Not Found
    #[default]
    NotFound,
    /// 409 Conflict
    Conflict,
    /// 410 Gone
    Gone,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::Gone => StatusCode::GONE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error name.
    pub fn name(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::PaymentRequired => "PAYMENT_REQUIRED",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Gone => "GONE",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Default user-facing message.
    pub fn message(self) -> &'static str {
        match self {
            Self::BadRequest => "The request is invalid",
            Self::PaymentRequired => "Not enough credits for this upload",
            Self::NotFound => "The requested resource was not found",
            Self::Conflict => "The resource is in a conflicting state",
            Self::Gone => "The session has expired",
            Self::PayloadTooLarge => "An uploaded file exceeds the size limit",
            Self::InternalServerError => "An internal error occurred",
        }
    }

    /// Creates an [`Error`] with a custom message.
    pub fn with_message(self, message: impl Into<Cow<'static, str>>) -> Error {
        Error::new(self).with_message(message)
    }

    /// Creates an [`Error`] with debugging context.
    pub fn with_context(self, context: impl Into<Cow<'static, str>>) -> Error {
        Error::new(self).with_context(context)
    }
}

impl From<docket_core::Error> for Error {
    fn from(err: docket_core::Error) -> Self {
        let kind = match err.kind {
            CoreErrorKind::InvalidInput | CoreErrorKind::CorruptInput => ErrorKind::BadRequest,
            CoreErrorKind::InsufficientCredits => ErrorKind::PaymentRequired,
            CoreErrorKind::NotFound => ErrorKind::NotFound,
            CoreErrorKind::SessionExpired => ErrorKind::Gone,
            CoreErrorKind::Cancelled => ErrorKind::Conflict,
            CoreErrorKind::StorageUnavailable
            | CoreErrorKind::ExtractorTransient
            | CoreErrorKind::ExtractorPermanent
            | CoreErrorKind::PollTimeout
            | CoreErrorKind::PostProcessFailed => ErrorKind::InternalServerError,
        };

        let error = Error::new(kind).with_message(err.kind.to_string());
        match err.detail {
            Some(detail) => error.with_context(detail),
            None => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_kinds_map_to_spec_status_codes() {
        let cases = [
            (docket_core::Error::invalid_input(), StatusCode::BAD_REQUEST),
            (
                docket_core::Error::insufficient_credits(),
                StatusCode::PAYMENT_REQUIRED,
            ),
            (docket_core::Error::not_found(), StatusCode::NOT_FOUND),
            (docket_core::Error::session_expired(), StatusCode::GONE),
            (
                docket_core::Error::storage("io".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (docket_core::Error::corrupt_input(), StatusCode::BAD_REQUEST),
        ];

        for (core, status) in cases {
            let error: Error = core.into();
            assert_eq!(error.kind().status(), status);
        }
    }
}
