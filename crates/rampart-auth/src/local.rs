//! In-process JWT verification.

use std::time::Duration;

use chrono::DateTime;
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rampart_config::{LocalAuthConfig, SigningAlgorithm};
use rampart_core::{BoxFuture, Principal};
use serde::Deserialize;

use crate::error::ValidationError;
use crate::validator::TokenValidator;

/// Claims read from an access token.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(alias = "user_id")]
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default, alias = "mfa_passed")]
    mfa: bool,
    exp: i64,
}

/// Verifies HMAC-signed JWTs against a shared secret.
///
/// `exp` and `nbf` are checked with the configured clock-skew leeway. The
/// principal's expiry includes that leeway, so it is always in the future
/// when the principal is handed out.
pub struct LocalValidator {
    key: DecodingKey,
    validation: Validation,
    leeway: Duration,
}

impl std::fmt::Debug for LocalValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalValidator")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl LocalValidator {
    /// Creates a validator from the `auth.local` section.
    pub fn new(config: &LocalAuthConfig) -> Self {
        let validator = Self::from_secret(config.secret.as_bytes(), algorithm(config.algorithm))
            .with_leeway(config.clock_skew());
        match &config.issuer {
            Some(issuer) => validator.with_issuer(issuer),
            None => validator,
        }
    }

    /// Creates a validator for `secret` with the default 60 s leeway.
    pub fn from_secret(secret: &[u8], algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            leeway: Duration::ZERO,
        }
        .with_leeway(Duration::from_secs(60))
    }

    /// Sets the clock-skew tolerance.
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway.as_secs();
        self.leeway = leeway;
        self
    }

    /// Accepts only tokens whose `iss` equals `issuer`.
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    fn verify(&self, token: &str) -> Result<Principal, ValidationError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::ExpiredSignature => ValidationError::Expired,
                JwtErrorKind::InvalidToken
                | JwtErrorKind::Base64(_)
                | JwtErrorKind::Json(_)
                | JwtErrorKind::Utf8(_) => ValidationError::Malformed(e.to_string()),
                _ => ValidationError::InvalidToken(e.to_string()),
            }
        })?;

        let claims = data.claims;
        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        let expires_at = DateTime::from_timestamp(claims.exp.saturating_add(leeway), 0)
            .ok_or_else(|| ValidationError::InvalidToken("exp out of range".to_string()))?;

        let mut principal = Principal::new(claims.sub)
            .with_mfa(claims.mfa)
            .with_expiry(expires_at);
        if let Some(email) = claims.email {
            principal = principal.with_email(email);
        }
        if let Some(role) = claims.role {
            principal = principal.with_role(role);
        }
        for role in claims.roles {
            if !principal.has_role(&role) {
                principal = principal.with_role(role);
            }
        }

        Ok(principal)
    }
}

impl TokenValidator for LocalValidator {
    fn validate<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<Principal, ValidationError>> {
        Box::pin(async move { self.verify(token) })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

fn algorithm(alg: SigningAlgorithm) -> Algorithm {
    match alg {
        SigningAlgorithm::HS256 => Algorithm::HS256,
        SigningAlgorithm::HS384 => Algorithm::HS384,
        SigningAlgorithm::HS512 => Algorithm::HS512,
    }
}
