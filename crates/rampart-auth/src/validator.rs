//! The token validation capability.

use std::sync::Arc;

use rampart_config::{AuthConfig, AuthMode, CircuitBreakerConfig};
use rampart_core::{BoxFuture, Principal};

use crate::error::{SetupError, ValidationError};
use crate::local::LocalValidator;
use crate::remote::RemoteValidator;

/// Turns a bearer token into a [`Principal`].
///
/// The pipeline depends only on this trait; local and remote validation are
/// interchangeable.
pub trait TokenValidator: Send + Sync + 'static {
    /// Validates `token` (the part after `Bearer `).
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, ValidationError>>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Extracts the token from an `Authorization` header value.
///
/// Returns `None` unless the value is `Bearer <token>` with a non-empty
/// token free of whitespace. The scheme is matched case-insensitively.
///
/// # Example
///
/// ```
/// use rampart_auth::bearer_token;
///
/// assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
/// assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
/// assert_eq!(bearer_token("Bearer "), None);
/// ```
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}

/// Builds the validator selected by `auth.mode`.
///
/// Remote validation shares the top-level breaker thresholds.
pub fn from_config(
    auth: &AuthConfig,
    breaker: &CircuitBreakerConfig,
) -> Result<Arc<dyn TokenValidator>, SetupError> {
    match auth.mode {
        AuthMode::Local => Ok(Arc::new(LocalValidator::new(&auth.local))),
        AuthMode::Remote => {
            let base_url = auth
                .remote
                .base_url
                .as_deref()
                .ok_or(SetupError::MissingBaseUrl)?;
            let validator =
                RemoteValidator::new(base_url, auth.remote.request_timeout(), breaker.into())?;
            Ok(Arc::new(validator))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_accepts_case_insensitive_scheme() {
        assert_eq!(bearer_token("bearer token-1"), Some("token-1"));
        assert_eq!(bearer_token("BEARER token-1"), Some("token-1"));
    }

    #[test]
    fn test_bearer_token_rejects_malformed() {
        for header in ["", "Bearer", "Bearer  ", "Token abc", "Bearer a b", "Bearerabc"] {
            assert_eq!(bearer_token(header), None, "{header:?}");
        }
    }

    #[test]
    fn test_from_config_local() {
        let mut auth = AuthConfig::default();
        auth.local.secret = "secret".to_string();
        let validator = from_config(&auth, &CircuitBreakerConfig::default()).unwrap();
        assert_eq!(validator.name(), "local");
    }

    #[test]
    fn test_from_config_remote_requires_url() {
        let auth = AuthConfig {
            mode: AuthMode::Remote,
            ..AuthConfig::default()
        };
        assert!(matches!(
            from_config(&auth, &CircuitBreakerConfig::default()),
            Err(SetupError::MissingBaseUrl)
        ));
    }
}
