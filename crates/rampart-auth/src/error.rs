//! Token validation errors.

use std::time::Duration;

use rampart_core::PipelineError;
use rampart_resilience::BreakerOpen;
use thiserror::Error;

/// Why a bearer token was not turned into a principal.
///
/// Credential problems map to `unauthorized`; problems reaching the auth
/// service map to `dependency-unavailable`.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The token is not structurally a JWT.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature, issuer or claim validation failed, or the auth service refused it.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token's `exp` has passed.
    #[error("token expired")]
    Expired,

    /// The auth service answered 200 with a body that is not a principal.
    #[error("invalid validation response: {0}")]
    InvalidBody(String),

    /// The auth service did not answer in time.
    #[error("auth service timed out after {0:?}")]
    Timeout(Duration),

    /// The auth service could not be reached or failed.
    #[error("auth service unavailable: {0}")]
    Unavailable(String),

    /// The auth-service breaker is open.
    #[error(transparent)]
    CircuitOpen(#[from] BreakerOpen),
}

impl ValidationError {
    /// Whether the failure is the auth service's, not the caller's.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Unavailable(_) | Self::CircuitOpen(_)
        )
    }

    /// Label for the `auth_attempts_total` metric.
    pub fn outcome_label(&self) -> &'static str {
        if self.is_unavailable() {
            "unavailable"
        } else {
            "invalid_token"
        }
    }
}

impl From<ValidationError> for PipelineError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::Expired => PipelineError::unauthorized("Token expired"),
            ValidationError::Malformed(_)
            | ValidationError::InvalidToken(_)
            | ValidationError::InvalidBody(_) => PipelineError::unauthorized("Invalid token"),
            ValidationError::Timeout(_) => {
                PipelineError::dependency_unavailable_with_source("auth service timed out", err)
            }
            ValidationError::Unavailable(_) | ValidationError::CircuitOpen(_) => {
                PipelineError::dependency_unavailable_with_source("auth service unavailable", err)
            }
        }
    }
}

/// Errors building a validator from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Remote mode without a base URL.
    #[error("auth.remote.base_url is required in remote mode")]
    MissingBaseUrl,

    /// The base URL has no host to key the breaker on.
    #[error("invalid auth service URL '{0}'")]
    InvalidBaseUrl(String),

    /// The HTTP client could not be built.
    #[error("failed to build auth service client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_core::ErrorKind;
    use rampart_resilience::BreakerState;

    #[test]
    fn test_credential_errors_map_to_unauthorized() {
        for err in [
            ValidationError::Malformed("one segment".into()),
            ValidationError::InvalidToken("bad signature".into()),
            ValidationError::Expired,
            ValidationError::InvalidBody("missing user_id".into()),
        ] {
            assert!(!err.is_unavailable());
            let pipeline: PipelineError = err.into();
            assert_eq!(pipeline.kind(), ErrorKind::Unauthorized);
        }
    }

    #[test]
    fn test_service_errors_map_to_unavailable() {
        for err in [
            ValidationError::Timeout(Duration::from_secs(5)),
            ValidationError::Unavailable("connection refused".into()),
            ValidationError::CircuitOpen(BreakerOpen {
                name: "auth:auth.internal".into(),
                state: BreakerState::Open,
            }),
        ] {
            assert_eq!(err.outcome_label(), "unavailable");
            let pipeline: PipelineError = err.into();
            assert_eq!(pipeline.kind(), ErrorKind::DependencyUnavailable);
        }
    }

    #[test]
    fn test_timeout_is_distinguishable_in_cause_chain() {
        let pipeline: PipelineError = ValidationError::Timeout(Duration::from_millis(250)).into();
        assert!(pipeline.cause_chain().contains("timed out"));
        assert_eq!(pipeline.safe_message(), "Service temporarily unavailable");
    }
}
