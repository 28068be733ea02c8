//! Static per-endpoint policy and path resolution.
//!
//! A [`RouteDescriptor`] declares what the pipeline enforces for one path
//! template. The [`RouteTable`] resolves a concrete request path to the most
//! specific descriptor; the descriptor's `pattern` is the route pattern used
//! for span names, metrics labels and breaker keys.
//!
//! Templates use `{name}` (or `:name`) for a single segment and `*name` for
//! the remaining path. Static segments win over parameters, parameters win
//! over wildcards.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Paths served by the process itself; never authenticated or rate limited.
pub const BUILTIN_PATHS: [&str; 4] = ["/health", "/ready", "/live", "/metrics"];

/// Route pattern shared by every path no declared route matches.
///
/// Keeps span names, metric labels and breaker keys bounded no matter what
/// paths clients send.
pub const UNMATCHED_PATTERN: &str = "{unmatched}";

/// Errors raised while building a route table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The pattern is not an absolute path template.
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The per-route rate limit is not a positive number.
    #[error("route '{pattern}': rate_limit_override must be > 0")]
    InvalidRateLimit {
        /// The offending pattern.
        pattern: String,
    },

    /// The same pattern was declared twice.
    #[error("duplicate route pattern '{pattern}'")]
    Duplicate {
        /// The duplicated pattern.
        pattern: String,
    },
}

fn default_auth_required() -> bool {
    true
}

/// Static configuration of one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDescriptor {
    /// Path template (e.g. `/api/v1/investments/{id}`).
    pub pattern: String,
    /// Role the principal must hold, if any.
    #[serde(default)]
    pub required_role: Option<String>,
    /// Whether a bearer token is required.
    #[serde(default = "default_auth_required")]
    pub auth_required: bool,
    /// Requests per second replacing the global refill rate for this route.
    #[serde(default)]
    pub rate_limit_override: Option<f64>,
    /// Whether CSRF enforcement is skipped for this route.
    #[serde(default)]
    pub csrf_exempt: bool,
    /// Whether the rate limiter ignores this route.
    #[serde(default)]
    pub rate_limit_exempt: bool,
}

impl RouteDescriptor {
    /// Creates a descriptor requiring authentication and nothing else.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            required_role: None,
            auth_required: true,
            rate_limit_override: None,
            csrf_exempt: false,
            rate_limit_exempt: false,
        }
    }

    /// Creates a descriptor for a route reachable without credentials.
    #[must_use]
    pub fn public(pattern: impl Into<String>) -> Self {
        Self {
            auth_required: false,
            ..Self::new(pattern)
        }
    }

    /// Creates a descriptor for a process-served route (health, metrics).
    #[must_use]
    pub fn builtin(pattern: impl Into<String>) -> Self {
        Self {
            auth_required: false,
            csrf_exempt: true,
            rate_limit_exempt: true,
            ..Self::new(pattern)
        }
    }

    /// Requires the principal to hold `role`.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    /// Overrides the refill rate for this route.
    #[must_use]
    pub fn with_rate_limit(mut self, requests_per_second: f64) -> Self {
        self.rate_limit_override = Some(requests_per_second);
        self
    }

    /// Exempts this route from CSRF enforcement.
    #[must_use]
    pub fn csrf_exempt(mut self) -> Self {
        self.csrf_exempt = true;
        self
    }

    /// Checks the descriptor's invariants.
    pub fn validate(&self) -> Result<(), RouteError> {
        if !self.pattern.starts_with('/') {
            return Err(RouteError::InvalidPattern {
                pattern: self.pattern.clone(),
                reason: "must start with '/'".to_string(),
            });
        }
        let segments: Vec<&str> = split(&self.pattern).collect();
        if let Some(pos) = segments.iter().position(|s| s.starts_with('*')) {
            if pos + 1 != segments.len() {
                return Err(RouteError::InvalidPattern {
                    pattern: self.pattern.clone(),
                    reason: "wildcard must be the last segment".to_string(),
                });
            }
        }
        if let Some(rate) = self.rate_limit_override {
            if !(rate.is_finite() && rate > 0.0) {
                return Err(RouteError::InvalidRateLimit {
                    pattern: self.pattern.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param,
    Wildcard,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw.starts_with('*') {
            Self::Wildcard
        } else if raw.starts_with(':') || (raw.starts_with('{') && raw.ends_with('}')) {
            Self::Param
        } else {
            Self::Static(raw.to_string())
        }
    }
}

#[derive(Debug)]
struct CompiledRoute {
    segments: Vec<Segment>,
    descriptor: Arc<RouteDescriptor>,
}

impl CompiledRoute {
    /// Returns a specificity score when `path` matches, higher is better.
    fn score(&self, path: &[&str]) -> Option<u32> {
        let mut score = 0u32;
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => return Some(score),
                Segment::Static(expected) => {
                    if path.get(i) != Some(&expected.as_str()) {
                        return None;
                    }
                    score += 3;
                }
                Segment::Param => {
                    path.get(i)?;
                    score += 2;
                }
            }
        }
        (path.len() == self.segments.len()).then_some(score + 1)
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Resolves request paths to route descriptors.
///
/// # Example
///
/// ```
/// use rampart_core::{RouteDescriptor, RouteTable};
///
/// let table = RouteTable::new(vec![
///     RouteDescriptor::new("/api/v1/investments/{id}").with_role("investor"),
/// ])
/// .unwrap();
///
/// let route = table.resolve("/api/v1/investments/42");
/// assert_eq!(route.pattern, "/api/v1/investments/{id}");
/// assert_eq!(route.required_role.as_deref(), Some("investor"));
///
/// assert!(!table.resolve("/health").auth_required);
/// ```
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    fallback: Arc<RouteDescriptor>,
}

fn fallback() -> Arc<RouteDescriptor> {
    Arc::new(RouteDescriptor::new(UNMATCHED_PATTERN))
}

impl RouteTable {
    /// Builds a table from declared routes plus the built-in health routes.
    ///
    /// Declared routes may redefine a built-in path.
    pub fn new(routes: Vec<RouteDescriptor>) -> Result<Self, RouteError> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(routes.len() + BUILTIN_PATHS.len());

        for descriptor in routes {
            descriptor.validate()?;
            if !seen.insert(descriptor.pattern.clone()) {
                return Err(RouteError::Duplicate {
                    pattern: descriptor.pattern,
                });
            }
            compiled.push(CompiledRoute {
                segments: split(&descriptor.pattern).map(Segment::parse).collect(),
                descriptor: Arc::new(descriptor),
            });
        }

        for path in BUILTIN_PATHS {
            if seen.insert(path.to_string()) {
                compiled.push(CompiledRoute {
                    segments: split(path).map(Segment::parse).collect(),
                    descriptor: Arc::new(RouteDescriptor::builtin(path)),
                });
            }
        }

        Ok(Self {
            routes: compiled,
            fallback: fallback(),
        })
    }

    /// Returns the descriptor for `path`.
    ///
    /// Unmatched paths share one authenticated default descriptor with
    /// [`UNMATCHED_PATTERN`] as its pattern.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Arc<RouteDescriptor> {
        let segments: Vec<&str> = split(path).collect();
        self.routes
            .iter()
            .filter_map(|route| route.score(&segments).map(|s| (s, route)))
            .max_by_key(|(score, _)| *score)
            .map_or_else(
                || Arc::clone(&self.fallback),
                |(_, route)| Arc::clone(&route.descriptor),
            )
    }

    /// Returns all declared descriptors.
    pub fn descriptors(&self) -> impl Iterator<Item = &RouteDescriptor> {
        self.routes.iter().map(|r| r.descriptor.as_ref())
    }

    /// Returns the number of routes, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the table has no routes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routes: BUILTIN_PATHS
                .iter()
                .map(|path| CompiledRoute {
                    segments: split(path).map(Segment::parse).collect(),
                    descriptor: Arc::new(RouteDescriptor::builtin(*path)),
                })
                .collect(),
            fallback: fallback(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_beats_param() {
        let table = RouteTable::new(vec![
            RouteDescriptor::new("/api/v1/users/{id}"),
            RouteDescriptor::new("/api/v1/users/me").with_role("self"),
        ])
        .unwrap();

        assert_eq!(table.resolve("/api/v1/users/me").pattern, "/api/v1/users/me");
        assert_eq!(table.resolve("/api/v1/users/7").pattern, "/api/v1/users/{id}");
    }

    #[test]
    fn test_wildcard_is_lowest_priority() {
        let table = RouteTable::new(vec![
            RouteDescriptor::public("/static/*path"),
            RouteDescriptor::new("/static/admin/:page"),
        ])
        .unwrap();

        assert_eq!(table.resolve("/static/css/site.css").pattern, "/static/*path");
        assert_eq!(table.resolve("/static/admin/panel").pattern, "/static/admin/:page");
    }

    #[test]
    fn test_builtins_are_public_and_exempt() {
        let table = RouteTable::new(Vec::new()).unwrap();
        for path in BUILTIN_PATHS {
            let route = table.resolve(path);
            assert!(!route.auth_required, "{path}");
            assert!(route.rate_limit_exempt, "{path}");
        }
    }

    #[test]
    fn test_unmatched_paths_share_one_pattern() {
        let table = RouteTable::new(vec![RouteDescriptor::new("/api/v1/orders/{id}")]).unwrap();

        let first = table.resolve("/scan/x1y");
        let second = table.resolve(&format!("/anon/{}", uuid::Uuid::now_v7()));
        assert_eq!(first.pattern, UNMATCHED_PATTERN);
        assert_eq!(second.pattern, UNMATCHED_PATTERN);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.auth_required);
        assert!(!first.rate_limit_exempt);

        assert_eq!(table.resolve("/").pattern, UNMATCHED_PATTERN);
        assert_eq!(table.resolve("/api/v1/orders/7/extra").pattern, UNMATCHED_PATTERN);
    }

    #[test]
    fn test_duplicate_patterns_rejected() {
        let err = RouteTable::new(vec![
            RouteDescriptor::new("/a"),
            RouteDescriptor::new("/a"),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            RouteError::Duplicate {
                pattern: "/a".to_string()
            }
        );
    }

    #[test]
    fn test_rate_limit_override_must_be_positive() {
        let err = RouteDescriptor::new("/a").with_rate_limit(0.0).validate();
        assert!(matches!(err, Err(RouteError::InvalidRateLimit { .. })));
        assert!(RouteDescriptor::new("/a").with_rate_limit(-1.0).validate().is_err());
        assert!(RouteDescriptor::new("/a").with_rate_limit(5.0).validate().is_ok());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(RouteDescriptor::new("no-slash").validate().is_err());
        assert!(RouteDescriptor::new("/a/*rest/b").validate().is_err());
    }

    #[test]
    fn test_deserialize_defaults() {
        let route: RouteDescriptor =
            serde_json::from_str(r#"{"pattern":"/api/v1/auth/login","auth_required":false}"#)
                .unwrap();
        assert!(!route.auth_required);
        assert!(!route.csrf_exempt);
        assert!(route.required_role.is_none());

        let route: RouteDescriptor = serde_json::from_str(r#"{"pattern":"/x"}"#).unwrap();
        assert!(route.auth_required);
    }
}
