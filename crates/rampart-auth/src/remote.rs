//! Validation through the auth collaborator.
//!
//! `GET {base}/auth/validate` with the caller's bearer token. A 200 carries
//! `{"user_id", "email", "role"}`; any other 4xx means the token was
//! refused. Connection failures, timeouts and 5xx answers count against the
//! auth-service breaker, which is keyed on the service host.

use std::sync::Arc;
use std::time::Duration;

use rampart_core::{BoxFuture, Principal};
use rampart_resilience::{BreakerSettings, CircuitBreaker};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{SetupError, ValidationError};
use crate::validator::TokenValidator;

/// Path of the validation endpoint, relative to the base URL.
pub const VALIDATE_PATH: &str = "/auth/validate";

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    user_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    mfa_passed: bool,
}

/// Validates tokens by asking the auth service.
#[derive(Debug)]
pub struct RemoteValidator {
    client: reqwest::Client,
    validate_url: String,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl RemoteValidator {
    /// Creates a validator for the service at `base_url`.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        breaker: BreakerSettings,
    ) -> Result<Self, SetupError> {
        let uri = base_url
            .parse::<http::Uri>()
            .map_err(|_| SetupError::InvalidBaseUrl(base_url.to_string()))?;
        let host = uri
            .host()
            .ok_or_else(|| SetupError::InvalidBaseUrl(base_url.to_string()))?;

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            validate_url: format!("{}{VALIDATE_PATH}", base_url.trim_end_matches('/')),
            timeout,
            breaker: Arc::new(CircuitBreaker::new(format!("auth:{host}"), breaker)),
        })
    }

    /// The auth-service breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Full URL of the validation endpoint.
    pub fn validate_url(&self) -> &str {
        &self.validate_url
    }

    async fn call(&self, token: &str) -> Result<Principal, ValidationError> {
        let permit = self.breaker.try_acquire()?;

        let response = match self
            .client
            .get(&self.validate_url)
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                permit.failure();
                let err = self.classify(&e);
                warn!(url = %self.validate_url, error = %e, "auth service call failed");
                return Err(err);
            }
        };

        let status = response.status();
        if status.is_server_error() {
            permit.failure();
            warn!(url = %self.validate_url, %status, "auth service error");
            return Err(ValidationError::Unavailable(format!(
                "auth service returned {status}"
            )));
        }

        if status != StatusCode::OK {
            permit.success();
            debug!(%status, "auth service refused token");
            return Err(ValidationError::InvalidToken(format!(
                "auth service returned {status}"
            )));
        }

        // A body cut short is the service failing, not the token.
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                permit.failure();
                let err = self.classify(&e);
                warn!(url = %self.validate_url, error = %e, "auth service response body failed");
                return Err(err);
            }
        };
        permit.success();

        let body: ValidateResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ValidationError::InvalidBody(e.to_string()))?;

        if body.user_id.trim().is_empty() {
            return Err(ValidationError::InvalidBody("empty user_id".to_string()));
        }

        let mut principal = Principal::new(body.user_id).with_mfa(body.mfa_passed);
        if let Some(email) = body.email {
            principal = principal.with_email(email);
        }
        if let Some(role) = body.role {
            principal = principal.with_role(role);
        }
        Ok(principal)
    }

    fn classify(&self, err: &reqwest::Error) -> ValidationError {
        if err.is_timeout() {
            ValidationError::Timeout(self.timeout)
        } else {
            ValidationError::Unavailable(err.to_string())
        }
    }
}

impl TokenValidator for RemoteValidator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, ValidationError>> {
        Box::pin(self.call(token))
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
