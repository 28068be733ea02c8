//! Terminal translation of pipeline results into wire responses.
//!
//! Runs after every stage has returned. Errors become the JSON error body
//! with the request's correlation id; internal detail is logged here and
//! never reaches the client. Headers queued by earlier stages are merged
//! into whatever response comes out.

use http::header::{
    HeaderMap, CONTENT_SECURITY_POLICY, REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, VARY,
    X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use rampart_core::PipelineResult;
use tracing::{debug, error};

use crate::context::RequestContext;
use crate::headers::{
    PERMISSIONS_POLICY, TRACEPARENT, X_CORRELATION_ID, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_TRACE_ID,
};
use crate::types::{Response, ResponseExt};

/// Finalizer that turns a [`PipelineResult`] into a [`Response`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorTranslator;

impl ErrorTranslator {
    /// Name reported in the stage list.
    pub const NAME: &'static str = "error_translate";

    /// Creates the finalizer.
    pub fn new() -> Self {
        Self
    }

    /// Produces the final response.
    pub fn finalize(&self, ctx: &mut RequestContext, result: PipelineResult<Response>) -> Response {
        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                let correlation_id = ctx.ensure_correlation_id().as_str().to_string();
                if err.status().is_server_error() {
                    error!(
                        correlation_id = %correlation_id,
                        route = %ctx.route_pattern(),
                        code = %err.kind(),
                        cause = %err.cause_chain(),
                        "request failed"
                    );
                } else {
                    debug!(
                        correlation_id = %correlation_id,
                        route = %ctx.route_pattern(),
                        code = %err.kind(),
                        cause = %err.cause_chain(),
                        "request rejected"
                    );
                }
                Response::from_error(&err, &correlation_id)
            }
        };

        merge_headers(response.headers_mut(), ctx.take_response_headers());
        response
    }
}

/// Headers whose pipeline value replaces anything the handler set.
fn pipeline_owned(name: &http::HeaderName) -> bool {
    [
        X_CORRELATION_ID,
        X_TRACE_ID,
        TRACEPARENT,
        X_RATELIMIT_LIMIT,
        X_RATELIMIT_REMAINING,
        X_CONTENT_TYPE_OPTIONS,
        X_FRAME_OPTIONS,
        X_XSS_PROTECTION,
        REFERRER_POLICY,
        CONTENT_SECURITY_POLICY,
        PERMISSIONS_POLICY,
        STRICT_TRANSPORT_SECURITY,
    ]
    .contains(name)
}

fn merge_headers(target: &mut HeaderMap, queued: HeaderMap) {
    let mut current = None;
    for (name, value) in queued {
        if let Some(name) = name {
            current = Some(name);
        }
        let Some(name) = current.as_ref() else {
            continue;
        };

        if *name == VARY {
            target.append(name.clone(), value);
        } else if pipeline_owned(name) || !target.contains_key(name) {
            target.insert(name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{header, HeaderValue, StatusCode};
    use http_body_util::BodyExt;
    use rampart_core::{CorrelationId, PipelineError, RouteDescriptor};
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx() -> RequestContext {
        RequestContext::new(Arc::new(RouteDescriptor::new("/api/v1/orders")), "127.0.0.1")
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_is_masked() {
        let mut ctx = ctx();
        ctx.set_correlation_id(CorrelationId::parse("corr-42").unwrap());
        let err = PipelineError::internal_with_source(
            "ledger write failed",
            std::io::Error::other("disk full"),
        );

        let response = ErrorTranslator::new().finalize(&mut ctx, Err(err));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["code"], "internal");
        assert_eq!(body["correlation_id"], "corr-42");
        let message = body["message"].as_str().unwrap();
        assert!(!message.contains("ledger"));
        assert!(!message.contains("disk"));
    }

    #[tokio::test]
    async fn test_error_without_correlation_id_gets_one() {
        let mut ctx = ctx();
        let response =
            ErrorTranslator::new().finalize(&mut ctx, Err(PipelineError::not_found("no order")));

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let generated = ctx.correlation_id().unwrap().as_str().to_string();
        let body = body_json(response).await;
        assert_eq!(body["correlation_id"], generated.as_str());
        assert_eq!(body["message"], "no order");
    }

    #[test]
    fn test_security_and_pipeline_headers_override_handler() {
        let mut ctx = ctx();
        ctx.set_response_header(X_RATELIMIT_LIMIT, HeaderValue::from(10u32));
        ctx.set_response_header(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        ctx.set_response_header(VARY, HeaderValue::from_static("Origin"));
        ctx.set_response_header(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

        let mut handler_response = Response::empty(StatusCode::OK);
        handler_response
            .headers_mut()
            .insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
        handler_response
            .headers_mut()
            .insert(VARY, HeaderValue::from_static("Accept-Encoding"));
        handler_response
            .headers_mut()
            .insert(X_RATELIMIT_LIMIT, HeaderValue::from_static("999"));
        handler_response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));

        let response = ErrorTranslator::new().finalize(&mut ctx, Ok(handler_response));

        let headers = response.headers();
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(headers.get(X_RATELIMIT_LIMIT).unwrap(), "10");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "max-age=60");
        assert_eq!(headers.get_all(VARY).iter().count(), 2);
        assert!(ctx.response_headers().is_empty());
    }

    #[test]
    fn test_rate_limited_error_keeps_retry_after() {
        let mut ctx = ctx();
        let err = PipelineError::rate_limited("Rate limit exceeded", Some(Duration::from_millis(200)));
        let response = ErrorTranslator::new().finalize(&mut ctx, Err(err));

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }
}
