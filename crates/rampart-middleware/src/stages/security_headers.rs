//! Browser hardening headers, set on every response.

use http::header::{
    CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use http::{HeaderName, HeaderValue};
use rampart_core::PipelineResult;

use crate::context::RequestContext;
use crate::headers::PERMISSIONS_POLICY;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Default `Content-Security-Policy`.
pub const DEFAULT_CSP: &str = "default-src 'self'; frame-ancestors 'none'";

/// Sets the security header family.
#[derive(Debug, Clone)]
pub struct SecurityHeadersMiddleware {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeadersMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityHeadersMiddleware {
    /// Creates the stage with the default header set.
    pub fn new() -> Self {
        Self {
            headers: vec![
                (X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
                (X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
                (X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
                (
                    REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ),
                (CONTENT_SECURITY_POLICY, HeaderValue::from_static(DEFAULT_CSP)),
                (
                    PERMISSIONS_POLICY,
                    HeaderValue::from_static("geolocation=(), camera=(), microphone=()"),
                ),
            ],
        }
    }

    /// Adds `Strict-Transport-Security` for deployments served over TLS.
    #[must_use]
    pub fn with_hsts(mut self) -> Self {
        self.headers.push((
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000; includeSubDomains"),
        ));
        self
    }
}

impl Middleware for SecurityHeadersMiddleware {
    fn name(&self) -> &'static str {
        "security_headers"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            for (name, value) in &self.headers {
                ctx.set_response_header(name.clone(), value.clone());
            }
            next.run(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use bytes::Bytes;
    use http_body_util::Full;
    use rampart_core::{PipelineError, RouteDescriptor};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_headers_queued_even_on_error() {
        let handler = handler_fn(|_, _| async { Err(PipelineError::conflict("already exists")) });
        let mut ctx = RequestContext::new(Arc::new(RouteDescriptor::new("/x")), "127.0.0.1");
        let request = http::Request::builder()
            .uri("/x")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let result = SecurityHeadersMiddleware::new()
            .process(&mut ctx, request, Next::handler(&handler))
            .await;

        assert!(result.is_err());
        let queued = ctx.response_headers();
        assert_eq!(queued.get(X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(queued.get(X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(queued.get(X_XSS_PROTECTION).unwrap(), "1; mode=block");
        assert_eq!(
            queued.get(REFERRER_POLICY).unwrap(),
            "strict-origin-when-cross-origin"
        );
        assert_eq!(queued.get(CONTENT_SECURITY_POLICY).unwrap(), DEFAULT_CSP);
        assert!(queued.get(STRICT_TRANSPORT_SECURITY).is_none());
    }

    #[test]
    fn test_hsts_opt_in() {
        let stage = SecurityHeadersMiddleware::new().with_hsts();
        assert!(stage
            .headers
            .iter()
            .any(|(name, _)| name == STRICT_TRANSPORT_SECURITY));
    }
}
