//! One structured event per completed request.
//!
//! Level follows the final status: `error` at 500 and above, `warn` for
//! 4xx, `info` otherwise. The same pass records the request counter,
//! latency histogram and in-flight gauge.

use rampart_core::{PipelineResult, Principal};
use rampart_telemetry::metrics::record_request;
use rampart_telemetry::InFlightGuard;

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{result_status, Request, Response, ResponseExt};

/// Logs and counts completed requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogMiddleware;

impl RequestLogMiddleware {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RequestLogMiddleware {
    fn name(&self) -> &'static str {
        "request_log"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let method = request.method().clone();
            let path = request.uri().path().to_string();

            let result = next.run(ctx, request).await;

            let latency = ctx.elapsed();
            let status = result_status(&result);
            let correlation_id = ctx
                .correlation_id()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();
            let bytes = match &result {
                Ok(response) => response.body_len(),
                Err(err) => err.to_body(&correlation_id).to_bytes().len() as u64,
            };
            let principal = ctx.principal().map(Principal::log_id);
            let latency_ms = latency.as_secs_f64() * 1000.0;

            record_request(method.as_str(), ctx.route_pattern(), status.as_u16(), latency);

            macro_rules! completed {
                ($level:ident) => {
                    tracing::$level!(
                        correlation_id = %correlation_id,
                        method = %method,
                        path = %path,
                        status = status.as_u16(),
                        bytes,
                        latency_ms,
                        remote_ip = %ctx.client_ip(),
                        principal = principal.as_deref().unwrap_or("-"),
                        route = %ctx.route_pattern(),
                        "request completed"
                    )
                };
            }

            if status.is_server_error() {
                completed!(error);
            } else if status.is_client_error() {
                completed!(warn);
            } else {
                completed!(info);
            }

            result
        })
    }
}
