//! Per-route circuit breaking around the handler.
//!
//! Each route pattern has its own breaker in the shared registry. While a
//! breaker is open, requests for that route fail fast with
//! `dependency-unavailable` and the handler is not called. Server-side
//! outcomes (a 5xx response or a 5xx-class error) count as failures;
//! client errors and successes count as successes.

use std::sync::Arc;

use rampart_core::{PipelineError, PipelineResult};
use rampart_resilience::{CircuitBreakerRegistry, Outcome};
use tracing::debug;

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Guards the handler with the route's breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakMiddleware {
    registry: Arc<CircuitBreakerRegistry>,
}

impl CircuitBreakMiddleware {
    /// Creates the stage over a shared registry.
    pub fn new(registry: Arc<CircuitBreakerRegistry>) -> Self {
        Self { registry }
    }

    /// The shared registry.
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.registry
    }
}

fn outcome_of(result: &PipelineResult<Response>) -> Outcome {
    let failed = match result {
        Ok(response) => response.status().is_server_error(),
        Err(err) => err.is_breaker_failure(),
    };
    if failed {
        Outcome::Failure
    } else {
        Outcome::Success
    }
}

impl Middleware for CircuitBreakMiddleware {
    fn name(&self) -> &'static str {
        "circuit_break"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            let breaker = self.registry.get(ctx.route_pattern());
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(open) => {
                    debug!(breaker = %open.name, state = %open.state, "request short-circuited");
                    return Err(PipelineError::dependency_unavailable_with_source(
                        "route circuit open",
                        open,
                    ));
                }
            };

            let result = next.run(ctx, request).await;
            permit.record(outcome_of(&result));
            result
        })
    }
}
