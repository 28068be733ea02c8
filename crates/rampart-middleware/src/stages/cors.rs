//! CORS (Cross-Origin Resource Sharing) stage.
//!
//! ## CORS Headers
//!
//! - `Access-Control-Allow-Origin`: the request origin, or `*`
//! - `Access-Control-Allow-Methods` / `Access-Control-Allow-Headers`
//! - `Access-Control-Allow-Credentials` when enabled
//! - `Access-Control-Max-Age` on preflight responses
//! - `Access-Control-Expose-Headers` on actual responses
//!
//! ## Preflight Requests
//!
//! Every `OPTIONS` request is answered here with `204 No Content` and never
//! reaches rate limiting, authentication or the handler. Origins outside the
//! allow-list get the 204 without any allow headers, which the browser
//! treats as a refusal.
//!
//! Headers for actual requests are queued on the context before the rest of
//! the chain runs, so error responses carry them too.

use std::collections::HashSet;

use http::{HeaderValue, Method, StatusCode};
use rampart_config::CorsConfig;
use rampart_core::PipelineResult;

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response, ResponseExt};

/// CORS header names.
pub mod headers {
    use http::HeaderName;

    /// `Access-Control-Allow-Origin`.
    pub const ALLOW_ORIGIN: HeaderName = HeaderName::from_static("access-control-allow-origin");
    /// `Access-Control-Allow-Methods`.
    pub const ALLOW_METHODS: HeaderName = HeaderName::from_static("access-control-allow-methods");
    /// `Access-Control-Allow-Headers`.
    pub const ALLOW_HEADERS: HeaderName = HeaderName::from_static("access-control-allow-headers");
    /// `Access-Control-Allow-Credentials`.
    pub const ALLOW_CREDENTIALS: HeaderName =
        HeaderName::from_static("access-control-allow-credentials");
    /// `Access-Control-Max-Age`.
    pub const MAX_AGE: HeaderName = HeaderName::from_static("access-control-max-age");
    /// `Access-Control-Expose-Headers`.
    pub const EXPOSE_HEADERS: HeaderName =
        HeaderName::from_static("access-control-expose-headers");
}

/// Represents the set of allowed origins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    /// Allow any origin (wildcard `*`).
    Any,
    /// Allow exactly these origins.
    List(HashSet<String>),
}

impl AllowedOrigins {
    /// Builds the set from configured origins; a lone `*` means any.
    pub fn from_list(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == "*") {
            Self::Any
        } else {
            Self::List(origins.iter().cloned().collect())
        }
    }

    /// Checks if an origin is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(origins) => origins.contains(origin),
        }
    }
}

/// Evaluates `Origin` against the allow-list and answers preflights.
#[derive(Debug, Clone)]
pub struct CorsMiddleware {
    origins: AllowedOrigins,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: HeaderValue,
    allow_credentials: bool,
}

impl CorsMiddleware {
    /// Creates the stage from the `cors` section.
    pub fn new(config: &CorsConfig) -> Self {
        Self {
            origins: AllowedOrigins::from_list(&config.allowed_origins),
            allow_methods: join(&config.allowed_methods),
            allow_headers: join(&config.allowed_headers),
            expose_headers: join(&config.exposed_headers),
            max_age: HeaderValue::from(config.max_age_secs),
            allow_credentials: config.allow_credentials,
        }
    }

    /// The configured origin set.
    pub fn origins(&self) -> &AllowedOrigins {
        &self.origins
    }

    /// Value for `Access-Control-Allow-Origin`, if the origin is allowed.
    ///
    /// A wildcard is echoed as the concrete origin when credentials are
    /// allowed, since browsers reject `*` with credentials.
    fn allow_origin_value(&self, origin: &str) -> Option<HeaderValue> {
        match &self.origins {
            AllowedOrigins::Any if !self.allow_credentials => Some(HeaderValue::from_static("*")),
            origins if origins.is_allowed(origin) => HeaderValue::from_str(origin).ok(),
            _ => None,
        }
    }

    fn queue_headers(&self, ctx: &mut RequestContext, allow_origin: HeaderValue, preflight: bool) {
        ctx.set_response_header(headers::ALLOW_ORIGIN, allow_origin);
        if let Some(methods) = &self.allow_methods {
            ctx.set_response_header(headers::ALLOW_METHODS, methods.clone());
        }
        if let Some(allowed) = &self.allow_headers {
            ctx.set_response_header(headers::ALLOW_HEADERS, allowed.clone());
        }
        if self.allow_credentials {
            ctx.set_response_header(headers::ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        if preflight {
            ctx.set_response_header(headers::MAX_AGE, self.max_age.clone());
        } else if let Some(exposed) = &self.expose_headers {
            ctx.set_response_header(headers::EXPOSE_HEADERS, exposed.clone());
        }
        ctx.set_response_header(http::header::VARY, HeaderValue::from_static("Origin"));
    }
}

fn join(values: &[String]) -> Option<HeaderValue> {
    if values.is_empty() {
        return None;
    }
    HeaderValue::from_str(&values.join(", ")).ok()
}

impl Middleware for CorsMiddleware {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let allow_origin = request
                .headers()
                .get(http::header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .and_then(|origin| self.allow_origin_value(origin));
            let preflight = request.method() == Method::OPTIONS;

            if let Some(value) = allow_origin {
                self.queue_headers(ctx, value, preflight);
            }

            if preflight {
                return Ok(Response::empty(StatusCode::NO_CONTENT));
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
    use rampart_core::RouteDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx() -> RequestContext {
        RequestContext::new(Arc::new(RouteDescriptor::new("/api/v1/items")), "127.0.0.1")
    }

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/api/v1/items");
        if let Some(origin) = origin {
            builder = builder.header("origin", origin);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    fn restricted() -> CorsMiddleware {
        CorsMiddleware::new(&CorsConfig {
            allowed_origins: vec!["https://app.example.com".to_string()],
            ..CorsConfig::default()
        })
    }

    #[test]
    fn test_allowed_origins_from_list() {
        assert_eq!(AllowedOrigins::from_list(&["*".to_string()]), AllowedOrigins::Any);
        let list = AllowedOrigins::from_list(&["https://a.example".to_string()]);
        assert!(list.is_allowed("https://a.example"));
        assert!(!list.is_allowed("https://b.example"));
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = handler_fn(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(Response::empty(StatusCode::OK)) }
        });
        let mut ctx = ctx();

        let response = restricted()
            .process(
                &mut ctx,
                request(Method::OPTIONS, Some("https://app.example.com")),
                Next::handler(&handler),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let queued = ctx.response_headers();
        assert_eq!(queued.get(headers::ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert_eq!(queued.get(headers::MAX_AGE).unwrap(), "86400");
        assert!(queued
            .get(headers::ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("PATCH"));
    }

    #[tokio::test]
    async fn test_disallowed_origin_gets_no_headers() {
        let handler = handler_fn(|_, _| async { Ok(Response::empty(StatusCode::OK)) });
        let mut ctx = ctx();

        let response = restricted()
            .process(
                &mut ctx,
                request(Method::GET, Some("https://evil.example")),
                Next::handler(&handler),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(ctx.response_headers().get(headers::ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_wildcard_with_credentials_echoes_origin() {
        let cors = CorsMiddleware::new(&CorsConfig {
            allow_credentials: true,
            ..CorsConfig::default()
        });
        let handler = handler_fn(|_, _| async { Ok(Response::empty(StatusCode::OK)) });
        let mut ctx = ctx();

        cors.process(
            &mut ctx,
            request(Method::GET, Some("https://any.example")),
            Next::handler(&handler),
        )
        .await
        .unwrap();

        let queued = ctx.response_headers();
        assert_eq!(queued.get(headers::ALLOW_ORIGIN).unwrap(), "https://any.example");
        assert_eq!(queued.get(headers::ALLOW_CREDENTIALS).unwrap(), "true");
        assert!(queued.get(headers::EXPOSE_HEADERS).is_some());
    }
}
