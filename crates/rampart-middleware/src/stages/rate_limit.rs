//! Token-bucket rate limiting stage.
//!
//! Each request takes one token from the caller's bucket. The stage in the
//! RateLimit slot keys buckets by client address, so unauthenticated floods
//! are throttled before any token is validated. Under the `ip+principal`
//! strategy a second, principal-scoped check runs right after Authenticate
//! and keys buckets by address plus principal subject. Routes with a rate
//! override get their own buckets, keyed by caller and route pattern, with
//! the override as refill rate.
//!
//! Admitted and rejected requests both carry `X-RateLimit-Limit` and
//! `X-RateLimit-Remaining`. A rejection is a `rate-limited` error whose
//! retry hint becomes `Retry-After`. Nothing downstream runs after a
//! rejection. Exempt routes (health, metrics) never touch a bucket.

use std::sync::Arc;

use http::HeaderValue;
use rampart_core::{PipelineError, PipelineResult};
use rampart_resilience::{Decision, RateLimiter};
use rampart_telemetry::metrics::record_rate_limit_rejection;
use tracing::debug;

use crate::context::RequestContext;
use crate::headers::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};
use crate::middleware::{BoxFuture, Middleware, Next};
use crate::types::{Request, Response};

/// Message carried by rate limit rejections.
pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded";

/// What a bucket is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketScope {
    /// Client address only. Runs before authentication.
    Client,
    /// Client address plus principal subject. Runs after authentication
    /// and lets anonymous requests through untouched.
    Principal,
}

/// Admits or rejects requests against the shared bucket registry.
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    scope: BucketScope,
}

impl RateLimitMiddleware {
    /// Stage name of the principal-scoped check.
    pub const PRINCIPAL_NAME: &'static str = "rate_limit_principal";

    /// Creates the client-keyed stage over a shared limiter.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            scope: BucketScope::Client,
        }
    }

    /// Creates the principal-keyed check that follows Authenticate.
    pub fn per_principal(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            scope: BucketScope::Principal,
        }
    }

    /// The shared limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// The bucket scope.
    pub fn scope(&self) -> BucketScope {
        self.scope
    }

    /// Bucket key for the request, or `None` when this scope does not apply.
    fn bucket_key(&self, ctx: &RequestContext) -> Option<String> {
        let base = match self.scope {
            BucketScope::Client => ctx.client_ip().to_string(),
            BucketScope::Principal => {
                format!("{}|{}", ctx.client_ip(), ctx.principal()?.subject)
            }
        };
        Some(match ctx.route().rate_limit_override {
            Some(_) => format!("{base}@{}", ctx.route_pattern()),
            None => base,
        })
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        match self.scope {
            BucketScope::Client => "rate_limit",
            BucketScope::Principal => Self::PRINCIPAL_NAME,
        }
    }

    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>> {
        Box::pin(async move {
            if ctx.route().rate_limit_exempt {
                return next.run(ctx, request).await;
            }
            let Some(key) = self.bucket_key(ctx) else {
                return next.run(ctx, request).await;
            };

            let decision = self
                .limiter
                .check_with_rate(&key, ctx.route().rate_limit_override);

            ctx.set_response_header(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit()));
            ctx.set_response_header(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining()));

            match decision {
                Decision::Admitted { .. } => next.run(ctx, request).await,
                Decision::Rejected { retry_after, .. } => {
                    record_rate_limit_rejection(ctx.route_pattern());
                    debug!(
                        key = %key,
                        route = %ctx.route_pattern(),
                        retry_after = ?retry_after,
                        "rate limit exceeded"
                    );
                    Err(PipelineError::rate_limited(RATE_LIMITED_MESSAGE, retry_after))
                }
            }
        })
    }
}
