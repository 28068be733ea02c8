//! Error taxonomy for the edge pipeline.
//!
//! Every failure raised by a stage, a token validator, or a business handler
//! is materialised as a [`PipelineError`] with exactly one [`ErrorKind`]. The
//! kind determines the HTTP status and the wire `code`:
//!
//! | `ErrorKind` | status | code |
//! |---|---|---|
//! | `BadRequest` | 400 | `bad-request` |
//! | `Unauthorized` | 401 | `unauthorized` |
//! | `Forbidden` | 403 | `forbidden` |
//! | `NotFound` | 404 | `not-found` |
//! | `Conflict` | 409 | `conflict` |
//! | `RateLimited` | 429 | `rate-limited` |
//! | `DependencyUnavailable` | 503 | `dependency-unavailable` |
//! | `Internal` | 500 | `internal` |
//!
//! Messages of server-side kinds never reach the wire; [`PipelineError::to_body`]
//! substitutes a fixed safe text for them.

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using [`PipelineError`].
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Safe message used on the wire for [`ErrorKind::Internal`].
const INTERNAL_SAFE_MESSAGE: &str = "An unexpected error occurred";

/// Safe message used on the wire for [`ErrorKind::DependencyUnavailable`].
const UNAVAILABLE_SAFE_MESSAGE: &str = "Service temporarily unavailable";

/// Classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed input.
    BadRequest,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not permitted.
    Forbidden,
    /// Resource does not exist.
    NotFound,
    /// Conflicting state.
    Conflict,
    /// Client exceeded its request budget.
    RateLimited,
    /// A downstream collaborator or route is unavailable.
    DependencyUnavailable,
    /// Unexpected server fault.
    Internal,
}

impl ErrorKind {
    /// Returns the HTTP status code for this kind.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the wire code (`rate-limited`, `dependency-unavailable`, ...).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "bad-request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not-found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate-limited",
            Self::DependencyUnavailable => "dependency-unavailable",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` for kinds whose message must not be exposed to clients.
    #[must_use]
    pub const fn is_server_side(&self) -> bool {
        matches!(self, Self::Internal | Self::DependencyUnavailable)
    }

    /// Returns all kinds.
    #[must_use]
    pub const fn all() -> [ErrorKind; 8] {
        [
            Self::BadRequest,
            Self::Unauthorized,
            Self::Forbidden,
            Self::NotFound,
            Self::Conflict,
            Self::RateLimited,
            Self::DependencyUnavailable,
            Self::Internal,
        ]
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform failure raised anywhere in the pipeline.
///
/// # Example
///
/// ```
/// use rampart_core::{ErrorKind, PipelineError};
///
/// let err = PipelineError::unauthorized("Missing or invalid authorization header");
/// assert_eq!(err.kind(), ErrorKind::Unauthorized);
/// assert_eq!(err.status().as_u16(), 401);
/// ```
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed input.
    #[error("Bad request: {message}")]
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// Missing or invalid credentials.
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Human-readable error message.
        message: String,
    },

    /// Caller lacks permission.
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Human-readable error message.
        message: String,
    },

    /// Resource not found.
    #[error("Not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Conflicting state.
    #[error("Conflict: {message}")]
    Conflict {
        /// Human-readable error message.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Human-readable error message.
        message: String,
        /// Time until the next request would be admitted, if known.
        retry_after: Option<Duration>,
    },

    /// A downstream collaborator or route breaker refused the request.
    #[error("Dependency unavailable: {message}")]
    DependencyUnavailable {
        /// Internal message (not exposed to clients).
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Unexpected server fault.
    #[error("Internal error: {message}")]
    Internal {
        /// Internal message (not exposed to clients).
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl PipelineError {
    /// Creates a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Creates a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a rate limited error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Creates a dependency unavailable error.
    #[must_use]
    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a dependency unavailable error with a source error.
    pub fn dependency_unavailable_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::DependencyUnavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.kind().status()
    }

    /// Returns the raw message, including internal detail.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message }
            | Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::Conflict { message }
            | Self::RateLimited { message, .. }
            | Self::DependencyUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    /// Returns the message that may be shown to clients.
    #[must_use]
    pub fn safe_message(&self) -> &str {
        match self.kind() {
            ErrorKind::Internal => INTERNAL_SAFE_MESSAGE,
            ErrorKind::DependencyUnavailable => UNAVAILABLE_SAFE_MESSAGE,
            _ => self.message(),
        }
    }

    /// Returns the retry hint carried by rate limited errors.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` when this error counts as a failure for breaker bookkeeping.
    #[must_use]
    pub const fn is_breaker_failure(&self) -> bool {
        self.kind().is_server_side()
    }

    /// Renders the full cause chain for logging.
    #[must_use]
    pub fn cause_chain(&self) -> String {
        let mut chain = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            chain.push_str(": ");
            chain.push_str(&cause.to_string());
            source = cause.source();
        }
        chain
    }

    /// Converts this error to the serializable wire body.
    #[must_use]
    pub fn to_body(&self, correlation_id: &str) -> ErrorBody {
        ErrorBody {
            code: self.kind(),
            message: self.safe_message().to_string(),
            correlation_id: correlation_id.to_string(),
        }
    }
}

/// Wire body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub code: ErrorKind,
    /// Client-safe message.
    pub message: String,
    /// Correlation identifier of the failed request.
    pub correlation_id: String,
}

impl ErrorBody {
    /// Content type of the encoded body.
    pub const CONTENT_TYPE: &'static str = "application/json; charset=utf-8";

    /// Encodes the body as JSON.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        // Serialization of three string fields cannot fail.
        serde_json::to_vec(self).map_or_else(|_| Bytes::new(), Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ErrorKind::DependencyUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorKind::Internal.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_serializes_as_wire_code() {
        for kind in ErrorKind::all() {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_body_shape() {
        let err = PipelineError::unauthorized("Missing or invalid authorization header");
        let body = err.to_body("corr-1");
        let value: serde_json::Value = serde_json::from_slice(&body.to_bytes()).unwrap();

        assert_eq!(value["code"], "unauthorized");
        assert_eq!(value["message"], "Missing or invalid authorization header");
        assert_eq!(value["correlation_id"], "corr-1");
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let err = PipelineError::internal_with_source(
            "database pool exhausted",
            std::io::Error::other("connection refused"),
        );
        let body = err.to_body("c");
        assert_eq!(body.message, INTERNAL_SAFE_MESSAGE);
        assert!(!body.message.contains("pool"));

        let chain = err.cause_chain();
        assert!(chain.contains("database pool exhausted"));
        assert!(chain.contains("connection refused"));
    }

    #[test]
    fn test_unavailable_message_is_hidden() {
        let err = PipelineError::dependency_unavailable("auth-service timed out after 5s");
        assert_eq!(err.to_body("c").message, UNAVAILABLE_SAFE_MESSAGE);
    }

    #[test]
    fn test_breaker_failure_classification() {
        assert!(PipelineError::internal("x").is_breaker_failure());
        assert!(PipelineError::dependency_unavailable("x").is_breaker_failure());
        assert!(!PipelineError::not_found("x").is_breaker_failure());
        assert!(!PipelineError::rate_limited("x", None).is_breaker_failure());
    }

    #[test]
    fn test_retry_after() {
        let err = PipelineError::rate_limited("slow down", Some(Duration::from_secs(2)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        assert_eq!(PipelineError::forbidden("no").retry_after(), None);
    }

    proptest! {
        #[test]
        fn prop_status_is_unique_per_kind(a in 0usize..8, b in 0usize..8) {
            let kinds = ErrorKind::all();
            prop_assert_eq!(a == b, kinds[a].status() == kinds[b].status());
        }

        #[test]
        fn prop_client_messages_survive(msg in "[a-zA-Z ]{1,40}") {
            let err = PipelineError::forbidden(msg.clone());
            prop_assert_eq!(err.to_body("id").message, msg);
        }
    }
}
