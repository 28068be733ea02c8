//! Role check against the route's required role.

use rampart_core::{PipelineError, PipelineResult};
use tracing::debug;

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Message for callers lacking the required role.
pub const FORBIDDEN_MESSAGE: &str = "Insufficient permissions";

/// Rejects principals that do not hold the route's required role.
///
/// Routes without a required role pass through. A route with a required
/// role and no principal (a public route misconfigured with a role) is
/// also rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizeMiddleware;

impl AuthorizeMiddleware {
    /// Creates the stage.
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for AuthorizeMiddleware {
    fn name(&self) -> &'static str {
        "authorize"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if let Some(role) = ctx.route().required_role.as_deref() {
                let allowed = ctx.principal().is_some_and(|p| p.has_role(role));
                if !allowed {
                    debug!(
                        route = %ctx.route_pattern(),
                        required_role = role,
                        principal = ctx.principal().map(|p| p.log_id()).as_deref(),
                        "role check failed"
                    );
                    return Err(PipelineError::forbidden(FORBIDDEN_MESSAGE));
                }
            }
            next.run(ctx, request).await
        })
    }
}
