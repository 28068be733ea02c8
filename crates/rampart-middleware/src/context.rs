//! Per-request state threaded through every stage.
//!
//! The [`RequestContext`] is owned by the pipeline for the lifetime of one
//! request and passed by `&mut` to each stage. Nothing request-scoped lives
//! in process-wide state.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use rampart_core::{CorrelationId, PipelineError, PipelineResult, Principal, RouteDescriptor};
use rampart_telemetry::TraceContext;
use tokio_util::sync::CancellationToken;

/// `X-Forwarded-For` request header.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// `X-Real-IP` request header.
pub const X_REAL_IP: &str = "x-real-ip";

/// Context that flows through the pipeline.
///
/// The correlation id and the principal are each set at most once; later
/// attempts leave the first value in place.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use rampart_core::{Principal, RouteDescriptor};
/// use rampart_middleware::RequestContext;
///
/// let mut ctx = RequestContext::new(Arc::new(RouteDescriptor::new("/api/v1/me")), "10.0.0.1");
/// ctx.set_principal(Principal::new("user-1")).unwrap();
///
/// assert!(ctx.set_principal(Principal::new("user-2")).is_err());
/// assert_eq!(ctx.principal().unwrap().subject, "user-1");
/// ```
#[derive(Debug)]
pub struct RequestContext {
    correlation_id: Option<CorrelationId>,
    principal: Option<Principal>,
    trace: Option<TraceContext>,
    route: Arc<RouteDescriptor>,
    client_ip: String,
    started_at: Instant,

    /// Headers stages want on the final response, success or error.
    response_headers: HeaderMap,

    cancellation: CancellationToken,

    /// Names of the stages entered, in order.
    stage_trail: Vec<&'static str>,

    extensions: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// Creates a context for a request resolved to `route`.
    pub fn new(route: Arc<RouteDescriptor>, client_ip: impl Into<String>) -> Self {
        Self {
            correlation_id: None,
            principal: None,
            trace: None,
            route,
            client_ip: client_ip.into(),
            started_at: Instant::now(),
            response_headers: HeaderMap::new(),
            cancellation: CancellationToken::new(),
            stage_trail: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    /// Replaces the cancellation token, typically with a child of the
    /// server's shutdown token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// The correlation id, once Recover has established it.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        self.correlation_id.as_ref()
    }

    /// Sets the correlation id.
    ///
    /// Returns `false` and keeps the existing value if one was already set.
    pub fn set_correlation_id(&mut self, id: CorrelationId) -> bool {
        if self.correlation_id.is_some() {
            return false;
        }
        self.correlation_id = Some(id);
        true
    }

    /// Returns the correlation id, generating one if none was set.
    pub fn ensure_correlation_id(&mut self) -> &CorrelationId {
        self.correlation_id.get_or_insert_with(CorrelationId::generate)
    }

    /// The authenticated caller, if Authenticate admitted one.
    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Injects the authenticated caller.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a principal is already present.
    pub fn set_principal(&mut self, principal: Principal) -> PipelineResult<()> {
        if self.principal.is_some() {
            return Err(PipelineError::internal("principal already established"));
        }
        self.principal = Some(principal);
        Ok(())
    }

    /// Trace identity of this request's server span.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Stores the trace identity. Called by the Trace stage.
    pub fn set_trace(&mut self, trace: TraceContext) {
        self.trace = Some(trace);
    }

    /// The resolved route descriptor.
    pub fn route(&self) -> &RouteDescriptor {
        &self.route
    }

    /// Route pattern used for metrics, breaker keys and span names.
    pub fn route_pattern(&self) -> &str {
        &self.route.pattern
    }

    /// Client address used for rate limiting and logs.
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// When latency measurement started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Restarts latency measurement. Called when the Trace stage is entered.
    pub fn restart_timer(&mut self) {
        self.started_at = Instant::now();
    }

    /// Time since [`started_at`](Self::started_at).
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Queues a header for the final response.
    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Headers queued for the final response.
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Takes the queued headers, leaving none behind.
    pub fn take_response_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }

    /// Cancellation signal for the request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Records that a stage was entered.
    pub(crate) fn enter_stage(&mut self, name: &'static str) {
        self.stage_trail.push(name);
    }

    /// Stages entered so far, in order.
    pub fn stage_trail(&self) -> &[&'static str] {
        &self.stage_trail
    }

    /// Stores a typed extension value.
    pub fn set_extension<T: Send + Sync + 'static>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a typed extension value.
    pub fn get_extension<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref())
    }
}

/// Determines the client address for a request.
///
/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header(X_FORWARDED_FOR)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = header(X_REAL_IP) {
        return real_ip.to_string();
    }

    remote_addr.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new(Arc::new(RouteDescriptor::new("/api/v1/items")), "10.0.0.1")
    }

    #[test]
    fn test_correlation_id_set_once() {
        let mut ctx = ctx();
        assert!(ctx.correlation_id().is_none());

        let first = CorrelationId::parse("first").unwrap();
        assert!(ctx.set_correlation_id(first));
        assert!(!ctx.set_correlation_id(CorrelationId::parse("second").unwrap()));
        assert_eq!(ctx.correlation_id().unwrap().as_str(), "first");
        assert_eq!(ctx.ensure_correlation_id().as_str(), "first");
    }

    #[test]
    fn test_principal_set_once() {
        let mut ctx = ctx();
        ctx.set_principal(Principal::new("alice")).unwrap();

        let err = ctx.set_principal(Principal::new("mallory")).unwrap_err();
        assert_eq!(err.kind(), rampart_core::ErrorKind::Internal);
        assert_eq!(ctx.principal().unwrap().subject, "alice");
    }

    #[test]
    fn test_response_headers_are_taken() {
        let mut ctx = ctx();
        ctx.set_response_header(
            HeaderName::from_static("x-trace-id"),
            HeaderValue::from_static("abc"),
        );
        assert_eq!(ctx.response_headers().len(), 1);

        let headers = ctx.take_response_headers();
        assert_eq!(headers.get("x-trace-id").unwrap(), "abc");
        assert!(ctx.response_headers().is_empty());
    }

    #[test]
    fn test_extensions() {
        #[derive(Debug, PartialEq)]
        struct Quota(u32);

        let mut ctx = ctx();
        assert!(ctx.get_extension::<Quota>().is_none());
        ctx.set_extension(Quota(7));
        assert_eq!(ctx.get_extension::<Quota>(), Some(&Quota(7)));
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "192.0.2.1");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert(X_REAL_IP, HeaderValue::from_static("198.51.100.7"));
        assert_eq!(client_ip(&headers, Some(peer)), "198.51.100.7");

        headers.insert(
            X_FORWARDED_FOR,
            HeaderValue::from_static("1.2.3.4, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "1.2.3.4");
    }
}
