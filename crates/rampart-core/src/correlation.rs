//! Correlation identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted length of an inbound correlation id.
pub const CORRELATION_ID_MAX_LEN: usize = 128;

/// An opaque per-request identifier threaded through logs, traces and error bodies.
///
/// Inbound values are accepted when they are non-empty visible ASCII of at
/// most [`CORRELATION_ID_MAX_LEN`] characters. Generated values are UUID v7,
/// which keeps them time-ordered in log stores.
///
/// # Example
///
/// ```
/// use rampart_core::CorrelationId;
///
/// let inbound = CorrelationId::parse("order-42").unwrap();
/// assert_eq!(inbound.as_str(), "order-42");
///
/// assert!(CorrelationId::parse("has space").is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Parses an inbound header value, returning `None` when it is not well-formed.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = !value.is_empty()
            && value.len() <= CORRELATION_ID_MAX_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        well_formed.then(|| Self(value.to_string()))
    }

    /// Uses the inbound value when well-formed, otherwise generates one.
    #[must_use]
    pub fn from_header_or_generate(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_else(Self::generate)
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = CorrelationId::generate();
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert!(CorrelationId::parse(a.as_str()).is_some());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(CorrelationId::parse("").is_none());
        assert!(CorrelationId::parse("with space").is_none());
        assert!(CorrelationId::parse("caf\u{e9}").is_none());
        assert!(CorrelationId::parse(&"a".repeat(CORRELATION_ID_MAX_LEN + 1)).is_none());
    }

    #[test]
    fn test_parse_accepts_max_length() {
        let value = "x".repeat(CORRELATION_ID_MAX_LEN);
        assert_eq!(CorrelationId::parse(&value).unwrap().as_str(), value);
    }

    #[test]
    fn test_from_header_or_generate() {
        let echoed = CorrelationId::from_header_or_generate(Some("abc-123"));
        assert_eq!(echoed.as_str(), "abc-123");

        let generated = CorrelationId::from_header_or_generate(Some("bad value"));
        assert_ne!(generated.as_str(), "bad value");

        let absent = CorrelationId::from_header_or_generate(None);
        assert!(!absent.as_str().is_empty());
    }
}
