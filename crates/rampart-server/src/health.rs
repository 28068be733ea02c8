//! Built-in operational routes.
//!
//! | Route          | Response                                              |
//! |----------------|-------------------------------------------------------|
//! | `GET /health`  | 200 `ok`                                              |
//! | `GET /live`    | 200 `ok`                                              |
//! | `GET /ready`   | JSON breaker snapshot; 503 while draining or when any route breaker is open |
//! | `GET /metrics` | Prometheus text exposition                            |
//!
//! [`BuiltinRoutes`] sits at the end of the pipeline like any other handler,
//! so these responses still carry correlation ids and security headers. The
//! route table marks them public and exempt from rate limiting and CSRF.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::{Method, StatusCode};
use rampart_core::{PipelineError, PipelineResult};
use rampart_middleware::{BoxFuture, Handler, Request, RequestContext, Response, ResponseExt};
use rampart_resilience::{BreakerSnapshot, CircuitBreakerRegistry};
use serde::Serialize;

/// Content type of the Prometheus text format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Process readiness flag, cleared when draining starts.
#[derive(Debug, Clone)]
pub struct Readiness {
    draining: Arc<AtomicBool>,
}

impl Readiness {
    /// Creates a flag in the ready state.
    pub fn new() -> Self {
        Self {
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the process as draining; `/ready` answers 503 from now on.
    pub fn start_draining(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    /// Whether draining has started.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct ReadyBody {
    status: &'static str,
    breakers: Vec<BreakerView>,
}

#[derive(Debug, Serialize)]
struct BreakerView {
    name: String,
    state: &'static str,
    requests: u32,
    failures: u32,
    successes: u32,
}

impl From<BreakerSnapshot> for BreakerView {
    fn from(snapshot: BreakerSnapshot) -> Self {
        Self {
            name: snapshot.name,
            state: snapshot.state.as_str(),
            requests: snapshot.requests,
            failures: snapshot.failures,
            successes: snapshot.successes,
        }
    }
}

/// Handler that answers the built-in routes and delegates everything else.
pub struct BuiltinRoutes {
    app: Arc<dyn Handler>,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    readiness: Readiness,
}

impl std::fmt::Debug for BuiltinRoutes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinRoutes")
            .field("breakers", &self.breakers.as_ref().map(|b| b.len()))
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl BuiltinRoutes {
    /// Wraps `app`.
    pub fn new(app: Arc<dyn Handler>, readiness: Readiness) -> Self {
        Self {
            app,
            breakers: None,
            readiness,
        }
    }

    /// Reports these route breakers on `/ready`.
    pub fn with_breakers(mut self, breakers: Option<Arc<CircuitBreakerRegistry>>) -> Self {
        self.breakers = breakers;
        self
    }

    fn ready(&self) -> Response {
        let snapshot = self
            .breakers
            .as_ref()
            .map(|registry| registry.snapshot())
            .unwrap_or_default();
        let any_open = self
            .breakers
            .as_ref()
            .is_some_and(|registry| registry.any_open());

        let (status, label) = if self.readiness.is_draining() {
            (StatusCode::SERVICE_UNAVAILABLE, "draining")
        } else if any_open {
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        } else {
            (StatusCode::OK, "ready")
        };

        let body = ReadyBody {
            status: label,
            breakers: snapshot.into_iter().map(BreakerView::from).collect(),
        };
        match serde_json::to_vec(&body) {
            Ok(bytes) => Response::json(status, bytes),
            Err(_) => Response::empty(status),
        }
    }

    fn metrics() -> PipelineResult<Response> {
        let text = rampart_telemetry::render_metrics()
            .ok_or_else(|| PipelineError::not_found("Metrics exporter is disabled"))?;
        let mut response = Response::text(StatusCode::OK, text);
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        );
        Ok(response)
    }

    fn builtin(&self, request: &Request) -> Option<PipelineResult<Response>> {
        if request.method() != Method::GET && request.method() != Method::HEAD {
            return None;
        }
        match request.uri().path() {
            "/health" | "/live" => Some(Ok(Response::text(StatusCode::OK, "ok"))),
            "/ready" => Some(Ok(self.ready())),
            "/metrics" => Some(Self::metrics()),
            _ => None,
        }
    }
}

impl Handler for BuiltinRoutes {
    fn call(
        &self,
        ctx: &RequestContext,
        request: Request,
    ) -> BoxFuture<'static, PipelineResult<Response>> {
        match self.builtin(&request) {
            Some(result) => Box::pin(async move { result }),
            None => self.app.call(ctx, request),
        }
    }
}

/// Application handler used when none is configured: every route is 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundHandler;

impl Handler for NotFoundHandler {
    fn call(
        &self,
        _ctx: &RequestContext,
        request: Request,
    ) -> BoxFuture<'static, PipelineResult<Response>> {
        let path = request.uri().path().to_string();
        Box::pin(async move { Err(PipelineError::not_found(format!("No route for {path}"))) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use rampart_core::RouteDescriptor;
    use rampart_resilience::{BreakerSettings, Outcome};

    fn ctx() -> RequestContext {
        RequestContext::new(Arc::new(RouteDescriptor::builtin("/ready")), "127.0.0.1")
    }

    fn get(path: &str) -> Request {
        http::Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn routes(breakers: Option<Arc<CircuitBreakerRegistry>>, readiness: Readiness) -> BuiltinRoutes {
        BuiltinRoutes::new(Arc::new(NotFoundHandler), readiness).with_breakers(breakers)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_live_answer_ok() {
        let routes = routes(None, Readiness::new());
        for path in ["/health", "/live"] {
            let response = routes.call(&ctx(), get(path)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"ok");
        }
    }

    #[tokio::test]
    async fn test_ready_reports_breakers() {
        let registry = Arc::new(CircuitBreakerRegistry::new(BreakerSettings::default()));
        let breaker = registry.get("/api/v1/orders");
        breaker.try_acquire().unwrap().record(Outcome::Success);

        let routes = routes(Some(registry), Readiness::new());
        let response = routes.call(&ctx(), get("/ready")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["breakers"][0]["name"], "/api/v1/orders");
        assert_eq!(body["breakers"][0]["state"], "closed");
        assert_eq!(body["breakers"][0]["successes"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_is_unavailable_when_a_breaker_is_open() {
        let settings = BreakerSettings::default()
            .with_volume_threshold(2)
            .with_error_threshold_percent(50);
        let registry = Arc::new(CircuitBreakerRegistry::new(settings));
        let breaker = registry.get("/api/v1/orders");
        for _ in 0..2 {
            breaker.try_acquire().unwrap().record(Outcome::Failure);
        }
        assert!(registry.any_open());

        let routes = routes(Some(registry), Readiness::new());
        let response = routes.call(&ctx(), get("/ready")).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["breakers"][0]["state"], "open");
    }

    #[tokio::test]
    async fn test_ready_is_unavailable_while_draining() {
        let readiness = Readiness::new();
        let routes = routes(None, readiness.clone());
        readiness.start_draining();

        let response = routes.call(&ctx(), get("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "draining");
    }

    #[tokio::test]
    async fn test_other_paths_reach_the_app() {
        let routes = routes(None, Readiness::new());
        let err = routes.call(&ctx(), get("/api/v1/orders")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_to_builtin_path_reaches_the_app() {
        let routes = routes(None, Readiness::new());
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/health")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(routes.call(&ctx(), request).await.is_err());
    }
}
