//! Distributed tracing stage.
//!
//! Continues an inbound W3C `traceparent` or starts a new trace, opens a
//! server span named after the route pattern, and exposes the trace id as
//! `X-Trace-Id` (plus an updated `traceparent`) on the response. The span is
//! finished with the final status, flagged as an error at 400 and above.

use http::HeaderValue;
use rampart_core::PipelineResult;
use rampart_telemetry::{RequestSpan, TraceContext, TraceSampler};
use tracing::{info_span, Instrument};

use crate::context::RequestContext;
use crate::headers::{TRACEPARENT, X_TRACE_ID};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{result_status, Request, Response};

/// Starts and finishes the request's server span.
#[derive(Debug, Clone)]
pub struct TraceMiddleware {
    sampler: TraceSampler,
}

impl TraceMiddleware {
    /// Creates the stage with the sampler used for new root traces.
    pub fn new(sampler: TraceSampler) -> Self {
        Self { sampler }
    }
}

impl Middleware for TraceMiddleware {
    fn name(&self) -> &'static str {
        "trace"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            ctx.restart_timer();

            let parent = request
                .headers()
                .get(&TRACEPARENT)
                .and_then(|v| v.to_str().ok())
                .and_then(TraceContext::parse);

            let correlation_id = ctx
                .correlation_id()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();

            let span = RequestSpan::start(
                ctx.route_pattern(),
                parent.as_ref(),
                &self.sampler,
                vec![
                    ("http.request.method", request.method().to_string()),
                    ("url.path", request.uri().path().to_string()),
                    ("client.address", ctx.client_ip().to_string()),
                    ("correlation_id", correlation_id.clone()),
                ],
            );

            let trace = span.context().clone();
            if let Ok(value) = HeaderValue::from_str(&trace.trace_id) {
                ctx.set_response_header(X_TRACE_ID, value);
            }
            if let Ok(value) = HeaderValue::from_str(&trace.to_traceparent()) {
                ctx.set_response_header(TRACEPARENT, value);
            }

            let log_span = info_span!(
                "request",
                correlation_id = %correlation_id,
                trace_id = %trace.trace_id,
                route = %ctx.route_pattern(),
            );
            ctx.set_trace(trace);

            let result = next.run(ctx, request).instrument(log_span).await;

            span.finish(result_status(&result).as_u16());
            result
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
    use rampart_config::TracingConfig;
    use rampart_core::{PipelineError, RouteDescriptor};
    use std::sync::Arc;

    const PARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    fn stage() -> TraceMiddleware {
        TraceMiddleware::new(TraceSampler::from_config(&TracingConfig::default()))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Arc::new(RouteDescriptor::new("/api/v1/orders/{id}")), "10.1.1.1")
    }

    fn request(traceparent: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/api/v1/orders/7");
        if let Some(tp) = traceparent {
            builder = builder.header("traceparent", tp);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[tokio::test]
    async fn test_inbound_trace_is_continued() {
        let handler = handler_fn(|_, _| async { Ok(Response::empty(StatusCode::OK)) });
        let mut ctx = ctx();

        stage()
            .process(&mut ctx, request(Some(PARENT)), Next::handler(&handler))
            .await
            .unwrap();

        let trace = ctx.trace().unwrap();
        assert_eq!(trace.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_ne!(trace.span_id, "b7ad6b7169203331");
        assert!(trace.sampled);
        assert_eq!(
            ctx.response_headers().get(&X_TRACE_ID).unwrap(),
            "0af7651916cd43dd8448eb211c80319c"
        );
    }

    #[tokio::test]
    async fn test_new_trace_without_parent() {
        let handler = handler_fn(|_, _| async { Err(PipelineError::not_found("missing")) });
        let mut ctx = ctx();

        let result = stage()
            .process(&mut ctx, request(Some("garbage")), Next::handler(&handler))
            .await;

        assert!(result.is_err());
        let trace = ctx.trace().unwrap();
        assert_eq!(trace.trace_id.len(), 32);
        let traceparent = ctx.response_headers().get(&TRACEPARENT).unwrap();
        assert!(traceparent.to_str().unwrap().contains(&trace.trace_id));
    }
}
