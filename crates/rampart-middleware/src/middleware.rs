//! Core middleware trait and chain types.
//!
//! Every stage implements [`Middleware`]. A stage receives the mutable
//! [`RequestContext`], the request and a [`Next`] continuation. It either
//! calls `next.run()` once or short-circuits with its own result.
//!
//! Stages return `PipelineResult<Response>`: failures travel back up the
//! chain as [`PipelineError`] values so that every stage on the way out sees
//! the final status, and only the pipeline's finalizer turns them into wire
//! responses.
//!
//! # Example
//!
//! ```
//! use rampart_middleware::{BoxFuture, Middleware, Next, Request, RequestContext, Response};
//! use rampart_core::PipelineResult;
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, PipelineResult<Response>> {
//!         Box::pin(async move {
//!             let result = next.run(ctx, request).await;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "request finished");
//!             result
//!         })
//!     }
//! }
//! ```

use std::future::Future;

use rampart_core::{PipelineError, PipelineResult};

use crate::context::RequestContext;
use crate::types::{Request, Response};

pub use rampart_core::BoxFuture;

/// Trail entry recorded when the handler is invoked.
pub const HANDLER_STAGE: &str = "handler";

/// One link of the pipeline.
///
/// # Invariants
///
/// - A stage calls `next.run()` at most once
/// - A stage never swallows a downstream error; it may observe or
///   re-classify it
pub trait Middleware: Send + Sync + 'static {
    /// Stage name for logs, metrics and the stage trail.
    fn name(&self) -> &'static str;

    /// Processes the request.
    fn process<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, PipelineResult<Response>>;
}

/// The business handler at the end of the chain.
///
/// Handlers see the context read-only and return either a response or a
/// [`PipelineError`]. The returned future must own what it needs.
pub trait Handler: Send + Sync + 'static {
    /// Handles the request.
    fn call(&self, ctx: &RequestContext, request: Request)
        -> BoxFuture<'static, PipelineResult<Response>>;
}

/// A [`Handler`] backed by a closure. See [`handler_fn`].
#[derive(Debug, Clone)]
pub struct HandlerFn<F> {
    func: F,
}

/// Wraps a closure as a [`Handler`].
///
/// ```
/// use http::StatusCode;
/// use rampart_middleware::{handler_fn, Response, ResponseExt};
///
/// let handler = handler_fn(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "hi")) });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(func: F) -> HandlerFn<F>
where
    F: Fn(&RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<Response>> + Send + 'static,
{
    HandlerFn { func }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(&RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<Response>> + Send + 'static,
{
    fn call(
        &self,
        ctx: &RequestContext,
        request: Request,
    ) -> BoxFuture<'static, PipelineResult<Response>> {
        Box::pin((self.func)(ctx, request))
    }
}

/// Continuation to the rest of the chain.
///
/// Consumed by [`run`](Self::run), so it can only be invoked once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// A continuation that enters `middleware`, then `next`.
    pub(crate) fn new(middleware: &'a dyn Middleware, next: Next<'a>) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                next: Box::new(next),
            },
        }
    }

    /// A terminal continuation that invokes `handler`.
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Runs the rest of the chain.
    ///
    /// The handler races the request's cancellation token; a cancelled
    /// request yields `dependency-unavailable`.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> PipelineResult<Response> {
        match self.inner {
            NextInner::Chain { middleware, next } => {
                ctx.enter_stage(middleware.name());
                middleware.process(ctx, request, *next).await
            }
            NextInner::Handler(handler) => {
                ctx.enter_stage(HANDLER_STAGE);
                let token = ctx.cancellation().clone();
                let call = handler.call(ctx, request);
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        Err(PipelineError::dependency_unavailable("request cancelled before the handler completed"))
                    }
                    result = call => result,
                }
            }
        }
    }
}
