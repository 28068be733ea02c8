//! Fault containment and correlation ids.
//!
//! First stage of the chain. Establishes the correlation id (inbound
//! `X-Correlation-Id` when well-formed, otherwise a fresh UUID v7), queues
//! it as a response header, and converts a panic anywhere downstream into
//! an `internal` error.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::HeaderValue;
use rampart_core::{CorrelationId, PipelineError, PipelineResult};
use tracing::error;

use crate::context::RequestContext;
use crate::headers::X_CORRELATION_ID;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Catches panics and establishes the correlation id.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoverMiddleware;

impl RecoverMiddleware {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for RecoverMiddleware {
    fn name(&self) -> &'static str {
        "recover"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let inbound = request
                .headers()
                .get(&X_CORRELATION_ID)
                .and_then(|v| v.to_str().ok());
            ctx.set_correlation_id(CorrelationId::from_header_or_generate(inbound));

            let correlation_id = ctx.ensure_correlation_id().clone();
            // Parsed and generated ids are visible ASCII.
            if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
                ctx.set_response_header(X_CORRELATION_ID, value);
            }

            match AssertUnwindSafe(next.run(ctx, request)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(
                        correlation_id = %correlation_id,
                        panic = %message,
                        "request panicked"
                    );
                    Err(PipelineError::internal(format!("panic: {message}")))
                }
            }
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
