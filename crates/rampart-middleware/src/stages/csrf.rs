//! CSRF header check for state-changing requests.
//!
//! Safe methods (`GET`, `HEAD`, `OPTIONS`, `TRACE`) pass. Other methods must
//! carry a non-blank token header unless the route is marked exempt or its
//! pattern or path is in the configured exempt list. Token values are not
//! compared against a session; presence is the check.

use std::collections::HashSet;

use http::{HeaderName, Method};
use rampart_config::CsrfConfig;
use rampart_core::{PipelineError, PipelineResult};
use tracing::debug;

use crate::context::RequestContext;
use crate::headers::X_CSRF_TOKEN;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Message for state-changing requests without a token.
pub const CSRF_MISSING_MESSAGE: &str = "CSRF token missing";

/// Requires a CSRF token header on unsafe methods.
#[derive(Debug, Clone)]
pub struct CsrfMiddleware {
    header: HeaderName,
    exempt_paths: HashSet<String>,
}

impl CsrfMiddleware {
    /// Creates the stage from the `csrf` section.
    ///
    /// An unusable header name falls back to `X-CSRF-Token`.
    pub fn new(config: &CsrfConfig) -> Self {
        let header = HeaderName::from_bytes(config.header_name.trim().as_bytes())
            .unwrap_or_else(|_| HeaderName::from_static(X_CSRF_TOKEN));
        Self {
            header,
            exempt_paths: config.exempt_paths.iter().cloned().collect(),
        }
    }

    /// The header carrying the token.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    fn is_exempt(&self, ctx: &RequestContext, request: &Request) -> bool {
        ctx.route().csrf_exempt
            || self.exempt_paths.contains(ctx.route_pattern())
            || self.exempt_paths.contains(request.uri().path())
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

impl Middleware for CsrfMiddleware {
    fn name(&self) -> &'static str {
        "csrf"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if is_safe(request.method()) || self.is_exempt(ctx, &request) {
                return next.run(ctx, request).await;
            }

            let present = request
                .headers()
                .get(&self.header)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| !v.trim().is_empty());

            if !present {
                debug!(
                    method = %request.method(),
                    route = %ctx.route_pattern(),
                    "csrf token missing"
                );
                return Err(PipelineError::forbidden(CSRF_MISSING_MESSAGE));
            }

            next.run(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use crate::types::ResponseExt;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Full;
    use rampart_core::{ErrorKind, RouteDescriptor};
    use std::sync::Arc;

    fn stage() -> CsrfMiddleware {
        CsrfMiddleware::new(&CsrfConfig::default())
    }

    async fn run(
        stage: &CsrfMiddleware,
        route: RouteDescriptor,
        method: Method,
        token: Option<&str>,
    ) -> PipelineResult<Response> {
        let handler = handler_fn(|_, _| async { Ok(Response::empty(StatusCode::OK)) });
        let mut ctx = RequestContext::new(Arc::new(route.clone()), "127.0.0.1");
        let mut builder = http::Request::builder().method(method).uri(route.pattern.as_str());
        if let Some(token) = token {
            builder = builder.header("x-csrf-token", token);
        }
        let request = builder.body(Full::new(Bytes::new())).unwrap();
        stage.process(&mut ctx, request, Next::handler(&handler)).await
    }

    #[tokio::test]
    async fn test_unsafe_method_requires_token() {
        let route = RouteDescriptor::new("/api/v1/orders");
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let err = run(&stage(), route.clone(), method.clone(), None)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden, "{method}");
            assert_eq!(err.message(), CSRF_MISSING_MESSAGE);
        }
        assert!(run(&stage(), route, Method::POST, Some("t0k3n")).await.is_ok());
    }

    #[tokio::test]
    async fn test_blank_token_is_missing() {
        let route = RouteDescriptor::new("/api/v1/orders");
        assert!(run(&stage(), route, Method::POST, Some("   ")).await.is_err());
    }

    #[tokio::test]
    async fn test_safe_methods_pass() {
        let route = RouteDescriptor::new("/api/v1/orders");
        for method in [Method::GET, Method::HEAD, Method::OPTIONS, Method::TRACE] {
            assert!(run(&stage(), route.clone(), method, None).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_exemptions() {
        let flagged = RouteDescriptor::new("/api/v1/webhooks").csrf_exempt();
        assert!(run(&stage(), flagged, Method::POST, None).await.is_ok());

        let login = RouteDescriptor::public("/api/v1/auth/login");
        assert!(run(&stage(), login, Method::POST, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_header_name() {
        let stage = CsrfMiddleware::new(&CsrfConfig {
            header_name: "X-XSRF-Token".to_string(),
            ..CsrfConfig::default()
        });
        assert_eq!(stage.header().as_str(), "x-xsrf-token");

        let route = RouteDescriptor::new("/api/v1/orders");
        assert!(run(&stage, route, Method::POST, Some("t0k3n")).await.is_err());
    }
}
