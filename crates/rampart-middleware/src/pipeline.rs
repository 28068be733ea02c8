//! Fixed-order middleware pipeline.
//!
//! Stages always run in the order of [`Stage::all`]. Disabled features
//! (rate limiting, circuit breaking, CSRF, authentication without a
//! validator) are omitted, never reordered. Under the `ip+principal` key
//! strategy RateLimit stays in place, keyed by client address, and a
//! principal-keyed check is added right after Authenticate.
//!
//! The chain is composed right to left for every request: the last stage
//! wraps the handler, and each earlier stage wraps the continuation built so
//! far. The [`ErrorTranslator`] runs once the chain has unwound.

use std::net::SocketAddr;
use std::sync::Arc;

use rampart_auth::TokenValidator;
use rampart_config::{CorsConfig, CsrfConfig, KeyStrategy, RampartConfig};
use rampart_core::{RouteError, RouteTable};
use rampart_resilience::{BreakerSettings, CircuitBreakerRegistry, RateLimitSettings, RateLimiter};
use rampart_telemetry::TraceSampler;

use crate::context::{client_ip, RequestContext};
use crate::middleware::{Handler, Middleware, Next};
use crate::stages::{
    AuthenticateMiddleware, AuthorizeMiddleware, CircuitBreakMiddleware, CorsMiddleware,
    CsrfMiddleware, ErrorTranslator, RateLimitMiddleware, RecoverMiddleware, RequestLogMiddleware,
    SecurityHeadersMiddleware, TraceMiddleware,
};
use crate::types::{Request, Response};

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// The assembled pipeline.
///
/// Shared by every connection; all per-request state lives in the
/// [`RequestContext`].
///
/// # Example
///
/// ```
/// use http::StatusCode;
/// use rampart_middleware::{handler_fn, Pipeline, Response, ResponseExt};
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::builder().build();
/// let handler = handler_fn(|_, _| async { Ok(Response::text(StatusCode::OK, "ok")) });
///
/// let request = http::Request::builder()
///     .uri("/health")
///     .body(http_body_util::Full::new(bytes::Bytes::new()))
///     .unwrap();
/// let mut ctx = pipeline.new_context(&request, None);
/// let response = pipeline.process(&mut ctx, request, &handler).await;
///
/// assert_eq!(response.status(), StatusCode::OK);
/// assert!(response.headers().contains_key("x-correlation-id"));
/// # });
/// ```
pub struct Pipeline {
    stages: Vec<BoxedMiddleware>,
    routes: Arc<RouteTable>,
    translator: ErrorTranslator,
    rate_limiter: Option<Arc<RateLimiter>>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Builds the pipeline described by `config` around `validator`.
    ///
    /// # Errors
    ///
    /// Returns an error when a declared route is invalid.
    pub fn from_config(
        config: &RampartConfig,
        validator: Arc<dyn TokenValidator>,
    ) -> Result<Self, RouteError> {
        let mut builder = Self::builder()
            .routes(RouteTable::new(config.effective_routes())?)
            .sampler(TraceSampler::from_config(&config.tracing))
            .cors(&config.cors)
            .validator(validator);

        if config.rate_limit.enabled {
            builder = builder.rate_limit(
                Arc::new(RateLimiter::new(RateLimitSettings::from(&config.rate_limit))),
                config.rate_limit.key_strategy,
            );
        }
        if config.circuit_breaker.enabled {
            builder = builder.circuit_breakers(Arc::new(CircuitBreakerRegistry::new(
                BreakerSettings::from(&config.circuit_breaker),
            )));
        }
        if config.csrf.enabled {
            builder = builder.csrf(&config.csrf);
        }

        Ok(builder.build())
    }

    /// Creates the context for `request`, resolving its route and client
    /// address.
    pub fn new_context(&self, request: &Request, remote_addr: Option<SocketAddr>) -> RequestContext {
        let route = self.routes.resolve(request.uri().path());
        RequestContext::new(route, client_ip(request.headers(), remote_addr))
    }

    /// Runs `request` through every stage and `handler`.
    ///
    /// Always produces a response; failures come back as the JSON error body.
    pub async fn process(
        &self,
        ctx: &mut RequestContext,
        request: Request,
        handler: &dyn Handler,
    ) -> Response {
        let next = self.build_chain(handler);
        let result = next.run(ctx, request).await;
        self.translator.finalize(ctx, result)
    }

    fn build_chain<'a>(&'a self, handler: &'a dyn Handler) -> Next<'a> {
        self.stages
            .iter()
            .rev()
            .fold(Next::handler(handler), |next, stage| {
                Next::new(stage.as_ref(), next)
            })
    }

    /// Names of the stages in execution order, ending with the finalizer.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .map(|stage| stage.name())
            .chain(std::iter::once(ErrorTranslator::NAME))
            .collect()
    }

    /// The route table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// The shared bucket registry, when rate limiting is enabled.
    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// The route breaker registry, when circuit breaking is enabled.
    pub fn breakers(&self) -> Option<&Arc<CircuitBreakerRegistry>> {
        self.breakers.as_ref()
    }
}

/// Builder for constructing a [`Pipeline`].
///
/// Every component is optional. Recover, Trace, RequestLog, SecurityHeaders
/// and Authorize are always present.
#[derive(Default)]
pub struct PipelineBuilder {
    routes: Option<RouteTable>,
    sampler: TraceSampler,
    cors: Option<CorsConfig>,
    hsts: bool,
    rate_limit: Option<(Arc<RateLimiter>, KeyStrategy)>,
    validator: Option<Arc<dyn TokenValidator>>,
    csrf: Option<CsrfConfig>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the route table. Defaults to the built-in routes only.
    #[must_use]
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    /// Sets the trace sampler.
    #[must_use]
    pub fn sampler(mut self, sampler: TraceSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Enables the CORS stage.
    #[must_use]
    pub fn cors(mut self, config: &CorsConfig) -> Self {
        self.cors = Some(config.clone());
        self
    }

    /// Adds `Strict-Transport-Security` to the security headers.
    #[must_use]
    pub fn hsts(mut self, enabled: bool) -> Self {
        self.hsts = enabled;
        self
    }

    /// Enables rate limiting over a shared limiter.
    #[must_use]
    pub fn rate_limit(mut self, limiter: Arc<RateLimiter>, key_strategy: KeyStrategy) -> Self {
        self.rate_limit = Some((limiter, key_strategy));
        self
    }

    /// Enables authentication with `validator`.
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Enables the CSRF stage.
    #[must_use]
    pub fn csrf(mut self, config: &CsrfConfig) -> Self {
        self.csrf = Some(config.clone());
        self
    }

    /// Enables per-route circuit breaking over a shared registry.
    #[must_use]
    pub fn circuit_breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(registry);
        self
    }

    /// Assembles the stages in their fixed order.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let mut stages: Vec<BoxedMiddleware> = Vec::with_capacity(Stage::all().len() + 1);
        stages.push(Arc::new(RecoverMiddleware::new()));
        stages.push(Arc::new(TraceMiddleware::new(self.sampler)));
        stages.push(Arc::new(RequestLogMiddleware::new()));
        if let Some(cors) = &self.cors {
            stages.push(Arc::new(CorsMiddleware::new(cors)));
        }
        let security = SecurityHeadersMiddleware::new();
        stages.push(Arc::new(if self.hsts {
            security.with_hsts()
        } else {
            security
        }));
        if let Some((limiter, _)) = &self.rate_limit {
            stages.push(Arc::new(RateLimitMiddleware::new(Arc::clone(limiter))));
        }
        if let Some(validator) = &self.validator {
            stages.push(Arc::new(AuthenticateMiddleware::new(Arc::clone(validator))));
            if let Some((limiter, KeyStrategy::IpPrincipal)) = &self.rate_limit {
                stages.push(Arc::new(RateLimitMiddleware::per_principal(Arc::clone(
                    limiter,
                ))));
            }
        }
        stages.push(Arc::new(AuthorizeMiddleware::new()));
        if let Some(csrf) = &self.csrf {
            stages.push(Arc::new(CsrfMiddleware::new(csrf)));
        }
        if let Some(registry) = &self.breakers {
            stages.push(Arc::new(CircuitBreakMiddleware::new(Arc::clone(registry))));
        }

        Pipeline {
            stages,
            routes: Arc::new(self.routes.unwrap_or_default()),
            translator: ErrorTranslator::new(),
            rate_limiter: self.rate_limit.map(|(limiter, _)| limiter),
            breakers: self.breakers,
        }
    }
}

/// Middleware stage marker for the canonical ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Panic guard and correlation id.
    Recover = 1,
    /// Server span.
    Trace = 2,
    /// Completion log line and request metrics.
    RequestLog = 3,
    /// Origin checks and preflight answers.
    Cors = 4,
    /// Browser hardening headers.
    SecurityHeaders = 5,
    /// Token bucket admission.
    RateLimit = 6,
    /// Bearer token validation.
    Authenticate = 7,
    /// Required role check.
    Authorize = 8,
    /// CSRF header presence.
    Csrf = 9,
    /// Per-route breaker.
    CircuitBreak = 10,
    /// --- Handler invocation ---
    /// Error body and header merge.
    ErrorTranslate = 11,
}

impl Stage {
    /// Returns the stage name, as reported by [`Pipeline::stage_names`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Recover => "recover",
            Self::Trace => "trace",
            Self::RequestLog => "request_log",
            Self::Cors => "cors",
            Self::SecurityHeaders => "security_headers",
            Self::RateLimit => "rate_limit",
            Self::Authenticate => "authenticate",
            Self::Authorize => "authorize",
            Self::Csrf => "csrf",
            Self::CircuitBreak => "circuit_break",
            Self::ErrorTranslate => "error_translate",
        }
    }

    /// Returns all stages in order.
    #[must_use]
    pub const fn all() -> [Stage; 11] {
        [
            Self::Recover,
            Self::Trace,
            Self::RequestLog,
            Self::Cors,
            Self::SecurityHeaders,
            Self::RateLimit,
            Self::Authenticate,
            Self::Authorize,
            Self::Csrf,
            Self::CircuitBreak,
            Self::ErrorTranslate,
        ]
    }
}
