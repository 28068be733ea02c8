//! Header names read or written by the pipeline.

use http::HeaderName;

/// Inbound and echoed correlation id.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Trace id of the request's server span.
pub const X_TRACE_ID: HeaderName = HeaderName::from_static("x-trace-id");

/// W3C trace context.
pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");

/// Bucket capacity for the caller.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");

/// Whole tokens left in the caller's bucket.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Browser feature policy.
pub const PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

/// Default CSRF token header.
pub const X_CSRF_TOKEN: &str = "x-csrf-token";
