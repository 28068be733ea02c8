//! The HTTP server.
//!
//! One task accepts connections; each connection is served on its own task
//! by hyper's auto builder (HTTP/1.1, plus HTTP/2 when enabled). Every
//! request is collected, run through the [`Pipeline`] and answered.
//!
//! # Timeouts
//!
//! | Timeout  | Bounds                                                        |
//! |----------|---------------------------------------------------------------|
//! | read     | request headers (hyper) and body collection                   |
//! | write    | pipeline processing; on expiry the request is cancelled → 503 |
//! | idle     | keep-alive connection with no request in flight               |
//! | shutdown | draining live connections after the signal                    |
//!
//! Bodies are capped at `max_body_bytes`. A body that is too large, broken
//! or late still goes through the pipeline, with a handler that fails with
//! `bad-request`, so the rejection carries the same headers as any other
//! response.
//!
//! Dropping the connection future (client disconnect) drops the in-flight
//! pipeline future with it, so nothing is written.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use rampart_config::ServerConfig;
use rampart_core::PipelineError;
use rampart_middleware::{handler_fn, Handler, Pipeline, Request, Response};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::health::{BuiltinRoutes, NotFoundHandler, Readiness};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// The Rampart HTTP server.
///
/// ```rust
/// use rampart_middleware::Pipeline;
/// use rampart_server::Server;
///
/// let server = Server::builder()
///     .pipeline(Pipeline::builder().build())
///     .build()
///     .unwrap();
/// assert_eq!(server.config().port, 8080);
/// ```
pub struct Server {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
    handler: Arc<BuiltinRoutes>,
    readiness: Readiness,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("stages", &self.pipeline.stage_names())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The request pipeline.
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Readiness flag reported on `/ready`.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Binds the configured address and serves until SIGTERM or Ctrl-C.
    pub async fn run(self) -> ServerResult<()> {
        let shutdown = ShutdownSignal::with_os_signals();
        self.run_with_shutdown(shutdown).await
    }

    /// Binds the configured address and serves until `shutdown` fires.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::bind(addr.clone(), e))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from `listener` until `shutdown` fires, then
    /// drains live connections for at most the shutdown timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> ServerResult<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            http2 = self.config.http2_enabled,
            stages = ?self.pipeline.stage_names(),
            "rampart listening"
        );

        let sweeper = self
            .pipeline
            .rate_limiter()
            .map(|limiter| limiter.spawn_sweeper());
        let requests = CancellationToken::new();
        let tracker = ConnectionTracker::new();
        let server = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let server = Arc::clone(&server);
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        let requests = requests.clone();
                        tokio::spawn(async move {
                            server.serve_connection(stream, remote_addr, shutdown, requests).await;
                            drop(token);
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                () = shutdown.recv() => {
                    info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        drop(listener);
        server.readiness.start_draining();

        let shutdown_timeout = server.config.shutdown_timeout();
        info!(
            connections = tracker.active_connections(),
            timeout_secs = shutdown_timeout.as_secs(),
            "draining connections"
        );

        tokio::select! {
            () = tracker.wait_for_drain() => info!("all connections closed"),
            () = tokio::time::sleep(shutdown_timeout) => {
                warn!(
                    connections = tracker.active_connections(),
                    "shutdown timeout reached, cancelling in-flight requests"
                );
                requests.cancel();
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        info!("rampart stopped");
        Ok(())
    }

    async fn serve_connection(
        self: Arc<Self>,
        stream: TcpStream,
        remote_addr: SocketAddr,
        shutdown: ShutdownSignal,
        requests: CancellationToken,
    ) {
        let activity = Arc::new(Activity::default());

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_timeout())
            .keep_alive(true);
        builder.http2().timer(TokioTimer::new());
        let builder = if self.config.http2_enabled {
            builder
        } else {
            builder.http1_only()
        };

        let service = {
            let server = Arc::clone(&self);
            let activity = Arc::clone(&activity);
            service_fn(move |request: http::Request<Incoming>| {
                let server = Arc::clone(&server);
                let activity = Arc::clone(&activity);
                let cancellation = requests.child_token();
                async move {
                    let _active = activity.begin();
                    Ok::<_, Infallible>(
                        server
                            .handle_request(request, remote_addr, cancellation)
                            .await,
                    )
                }
            })
        };

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let idle = activity.idle(self.config.idle_timeout());
        tokio::pin!(idle);
        let mut shutdown = shutdown.recv();
        let mut closing = false;

        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(remote_addr = %remote_addr, error = %e, "connection ended with error");
                    }
                    break;
                }
                () = &mut shutdown, if !closing => {
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
                () = &mut idle, if !closing => {
                    debug!(remote_addr = %remote_addr, "closing idle connection");
                    closing = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }

    async fn handle_request(
        &self,
        request: http::Request<Incoming>,
        remote_addr: SocketAddr,
        cancellation: CancellationToken,
    ) -> Response {
        let (parts, body) = request.into_parts();
        let body = Limited::new(body, self.config.max_body_bytes);

        let (bytes, rejection) =
            match tokio::time::timeout(self.config.read_timeout(), body.collect()).await {
                Ok(Ok(collected)) => (collected.to_bytes(), None),
                Ok(Err(e)) if e.is::<LengthLimitError>() => {
                    debug!(
                        remote_addr = %remote_addr,
                        limit = self.config.max_body_bytes,
                        "request body too large"
                    );
                    (Bytes::new(), Some(BODY_TOO_LARGE))
                }
                Ok(Err(e)) => {
                    debug!(remote_addr = %remote_addr, error = %e, "failed to read request body");
                    (Bytes::new(), Some(BODY_UNREADABLE))
                }
                Err(_) => {
                    debug!(remote_addr = %remote_addr, "request body read timed out");
                    (Bytes::new(), Some(BODY_LATE))
                }
            };
        let rejected = rejection.map(reject_body);
        let handler: &dyn Handler = match &rejected {
            Some(rejected) => rejected,
            None => self.handler.as_ref(),
        };

        let request: Request = http::Request::from_parts(parts, Full::new(bytes));
        let path = request.uri().path().to_string();
        let mut ctx = self
            .pipeline
            .new_context(&request, Some(remote_addr))
            .with_cancellation(cancellation.clone());

        let process = self.pipeline.process(&mut ctx, request, handler);
        tokio::pin!(process);
        let deadline = tokio::time::sleep(self.config.write_timeout());
        tokio::pin!(deadline);
        let mut expired = false;

        loop {
            tokio::select! {
                response = &mut process => return response,
                () = &mut deadline, if !expired => {
                    expired = true;
                    warn!(
                        path = %path,
                        timeout_secs = self.config.write_timeout().as_secs(),
                        "write timeout reached, cancelling request"
                    );
                    cancellation.cancel();
                }
            }
        }
    }
}

const BODY_TOO_LARGE: &str = "Request body too large";
const BODY_UNREADABLE: &str = "Failed to read request body";
const BODY_LATE: &str = "Request body was not received in time";

/// Handler standing in for the application when the body was rejected.
fn reject_body(message: &'static str) -> impl Handler {
    handler_fn(move |_, _| async move { Err::<Response, _>(PipelineError::bad_request(message)) })
}

/// Per-connection request activity, used to detect idle keep-alive.
#[derive(Debug, Default)]
struct Activity {
    in_flight: AtomicUsize,
    notify: Notify,
}

impl Activity {
    fn begin(self: &Arc<Self>) -> ActiveRequest {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        ActiveRequest {
            activity: Arc::clone(self),
        }
    }

    /// Completes once the connection has had no request in flight for `timeout`.
    async fn idle(&self, timeout: Duration) {
        loop {
            match tokio::time::timeout(timeout, self.notify.notified()).await {
                Ok(()) => continue,
                Err(_) if self.in_flight.load(Ordering::SeqCst) == 0 => return,
                Err(_) => continue,
            }
        }
    }
}

struct ActiveRequest {
    activity: Arc<Activity>,
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        self.activity.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.activity.notify.notify_one();
    }
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    pipeline: Option<Pipeline>,
    handler: Option<Arc<dyn Handler>>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline.is_some())
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl ServerBuilder {
    /// Sets the listener and timeout configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the request pipeline.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Sets the application handler. Defaults to answering 404.
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Incomplete`] when no pipeline was set.
    pub fn build(self) -> ServerResult<Server> {
        let pipeline = self.pipeline.ok_or(ServerError::Incomplete("a pipeline"))?;
        let app = self.handler.unwrap_or_else(|| Arc::new(NotFoundHandler));
        let readiness = Readiness::new();
        let handler = BuiltinRoutes::new(app, readiness.clone())
            .with_breakers(pipeline.breakers().cloned());

        Ok(Server {
            config: self.config.unwrap_or_default(),
            pipeline: Arc::new(pipeline),
            handler: Arc::new(handler),
            readiness,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_pipeline() {
        let err = Server::builder().build().unwrap_err();
        assert!(matches!(err, ServerError::Incomplete(_)));
    }

    #[test]
    fn test_builder_defaults() {
        let server = Server::builder()
            .pipeline(Pipeline::builder().build())
            .build()
            .unwrap();
        assert_eq!(server.config(), &ServerConfig::default());
        assert!(!server.readiness().is_draining());
        assert_eq!(server.pipeline().stage_names().last(), Some(&"error_translate"));
    }

    #[tokio::test]
    async fn test_rejected_body_gets_pipeline_headers() {
        let pipeline = Pipeline::builder().build();
        let request: Request = http::Request::builder()
            .uri("/health")
            .header("x-correlation-id", "corr-7")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let mut ctx = pipeline.new_context(&request, None);

        let response = pipeline
            .process(&mut ctx, request, &reject_body(BODY_TOO_LARGE))
            .await;

        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(response.headers().get("x-correlation-id").unwrap(), "corr-7");
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["correlation_id"], "corr-7");
        assert_eq!(body["code"], "bad-request");
        assert_eq!(body["message"], BODY_TOO_LARGE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_in_flight_requests() {
        let activity = Arc::new(Activity::default());
        let request = activity.begin();

        let idle = activity.idle(Duration::from_secs(5));
        tokio::pin!(idle);

        let early = tokio::time::timeout(Duration::from_secs(12), idle.as_mut()).await;
        assert!(early.is_err(), "a request is still in flight");

        drop(request);
        tokio::time::timeout(Duration::from_secs(6), idle.as_mut())
            .await
            .expect("idle after the request finished");
    }
}
