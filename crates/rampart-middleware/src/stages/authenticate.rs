//! Bearer authentication stage.
//!
//! Skipped for routes that do not require auth. Otherwise the
//! `Authorization` header must be `Bearer <token>`; the token goes to the
//! configured [`TokenValidator`] and a valid result becomes the request's
//! principal. Validation races the request's cancellation token.

use std::sync::Arc;

use chrono::Utc;
use http::header::AUTHORIZATION;
use rampart_auth::{bearer_token, TokenValidator};
use rampart_core::{PipelineError, PipelineResult};
use rampart_telemetry::metrics::record_auth_attempt;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Message for a missing or malformed `Authorization` header.
pub const MISSING_AUTH_MESSAGE: &str = "Missing or invalid authorization header";

/// Resolves the caller's principal from a bearer token.
#[derive(Clone)]
pub struct AuthenticateMiddleware {
    validator: Arc<dyn TokenValidator>,
}

impl std::fmt::Debug for AuthenticateMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticateMiddleware")
            .field("validator", &self.validator.name())
            .finish()
    }
}

impl AuthenticateMiddleware {
    /// Creates the stage over a validator.
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self { validator }
    }
}

impl Middleware for AuthenticateMiddleware {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if !ctx.route().auth_required {
                return next.run(ctx, request).await;
            }

            let Some(token) = request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string)
            else {
                record_auth_attempt("missing_token");
                return Err(PipelineError::unauthorized(MISSING_AUTH_MESSAGE));
            };

            let cancellation = ctx.cancellation().clone();
            let outcome = tokio::select! {
                biased;
                () = cancellation.cancelled() => {
                    return Err(PipelineError::dependency_unavailable(
                        "request cancelled during authentication",
                    ));
                }
                outcome = self.validator.validate(&token) => outcome,
            };

            let principal = match outcome {
                Ok(principal) => principal,
                Err(err) => {
                    record_auth_attempt(err.outcome_label());
                    if err.is_unavailable() {
                        warn!(validator = self.validator.name(), error = %err, "token validation unavailable");
                    } else {
                        debug!(validator = self.validator.name(), error = %err, "token rejected");
                    }
                    return Err(err.into());
                }
            };

            if principal.is_expired_at(Utc::now()) {
                record_auth_attempt("invalid_token");
                return Err(PipelineError::unauthorized("Token expired"));
            }

            record_auth_attempt("success");
            ctx.set_principal(principal)?;
            next.run(ctx, request).await
        })
    }
}
