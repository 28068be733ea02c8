//! Authenticated caller identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The authenticated identity derived from a bearer token.
///
/// A principal is created by the Authenticate stage and is read-only for
/// every stage and handler downstream of it.
///
/// # Example
///
/// ```
/// use rampart_core::Principal;
///
/// let principal = Principal::new("user-123")
///     .with_email("alice@example.com")
///     .with_role("investor");
///
/// assert!(principal.has_role("investor"));
/// assert_eq!(principal.log_id(), "user:user-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Subject identifier.
    pub subject: String,
    /// Email address, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Granted roles.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the caller passed multi-factor authentication.
    #[serde(default)]
    pub mfa_passed: bool,
    /// When the credential stops being valid, if it carries an expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Principal {
    /// Creates a principal with only a subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            roles: Vec::new(),
            mfa_passed: false,
            expires_at: None,
        }
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Adds a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Sets the MFA flag.
    #[must_use]
    pub fn with_mfa(mut self, passed: bool) -> Self {
        self.mfa_passed = passed;
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Returns `true` if the principal holds `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Returns `true` if the credential has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Returns an identifier suitable for logging. Never contains credentials.
    #[must_use]
    pub fn log_id(&self) -> String {
        format!("user:{}", self.subject)
    }
}
