//! Configuration schema types.
//!
//! This module defines the structure of every configuration section. Durations
//! are stored as integer seconds or milliseconds (the field suffix says which)
//! and exposed through [`Duration`] accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// server
// ---------------------------------------------------------------------------

/// Server configuration section.
///
/// # Example
///
/// ```
/// use rampart_config::ServerConfig;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.port, 8080);
/// assert_eq!(config.read_timeout().as_secs(), 15);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bound on reading request headers and body, in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Bound on producing the response, in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Keep-alive idle timeout, in seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Graceful shutdown drain bound, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Enable HTTP/2 alongside HTTP/1.1.
    #[serde(default = "default_true")]
    pub http2_enabled: bool,

    /// Largest request body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            http2_enabled: true,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Returns `host:port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Write timeout.
    #[must_use]
    pub const fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Idle timeout.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Shutdown timeout.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_read_timeout() -> u64 {
    15
}

fn default_write_timeout() -> u64 {
    15
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// auth
// ---------------------------------------------------------------------------

/// How bearer tokens are validated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Verify the token signature in process.
    #[default]
    Local,
    /// Ask the auth collaborator over HTTP.
    Remote,
}

/// HMAC algorithm accepted by the local validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    /// HMAC-SHA256.
    #[default]
    HS256,
    /// HMAC-SHA384.
    HS384,
    /// HMAC-SHA512.
    HS512,
}

/// Authentication configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Validation mode.
    #[serde(default)]
    pub mode: AuthMode,

    /// Path of the login endpoint (never authenticated, CSRF exempt).
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Local verifier settings.
    #[serde(default)]
    pub local: LocalAuthConfig,

    /// Remote verifier settings.
    #[serde(default)]
    pub remote: RemoteAuthConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            login_path: default_login_path(),
            local: LocalAuthConfig::default(),
            remote: RemoteAuthConfig::default(),
        }
    }
}

fn default_login_path() -> String {
    "/api/v1/auth/login".to_string()
}

/// Settings for the in-process JWT verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LocalAuthConfig {
    /// Signing algorithm.
    #[serde(default)]
    pub algorithm: SigningAlgorithm,

    /// Shared HMAC secret.
    #[serde(default)]
    pub secret: String,

    /// Accepted `iss` claim; any issuer when unset.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Tolerance applied to `exp` and `nbf`, in seconds.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,
}

impl Default for LocalAuthConfig {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::default(),
            secret: String::new(),
            issuer: None,
            clock_skew_secs: default_clock_skew(),
        }
    }
}

impl LocalAuthConfig {
    /// Clock skew tolerance.
    #[must_use]
    pub const fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

fn default_clock_skew() -> u64 {
    60
}

/// Settings for the remote auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteAuthConfig {
    /// Base URL of the auth service (e.g. `http://auth:8081`).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-call timeout, in milliseconds.
    #[serde(default = "default_remote_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for RemoteAuthConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: default_remote_timeout(),
        }
    }
}

impl RemoteAuthConfig {
    /// Per-call timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_remote_timeout() -> u64 {
    5000
}

// ---------------------------------------------------------------------------
// rate_limit
// ---------------------------------------------------------------------------

/// How rate-limit buckets are keyed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Client IP only.
    #[default]
    #[serde(rename = "ip")]
    Ip,
    /// Client IP combined with the authenticated subject.
    #[serde(rename = "ip+principal")]
    IpPrincipal,
}

/// Rate limiting configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Enable the rate limit stage.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Refill rate, tokens per second.
    #[serde(default = "default_rps")]
    pub requests_per_second: f64,

    /// Bucket capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Buckets untouched for this long are evicted, in seconds.
    #[serde(default = "default_bucket_ttl")]
    pub bucket_idle_ttl_secs: u64,

    /// How often the idle sweep runs, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Bucket key strategy.
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: default_rps(),
            burst: default_burst(),
            bucket_idle_ttl_secs: default_bucket_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

impl RateLimitConfig {
    /// Idle TTL of a bucket.
    #[must_use]
    pub const fn bucket_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_ttl_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_rps() -> f64 {
    1.0
}

fn default_burst() -> u32 {
    10
}

fn default_bucket_ttl() -> u64 {
    600
}

fn default_sweep_interval() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// circuit_breaker
// ---------------------------------------------------------------------------

/// Circuit breaker configuration section.
///
/// Applies to every route breaker and to the auth-service breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Enable per-route breakers.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failure percentage (1-100) that trips the breaker.
    #[serde(default = "default_error_threshold")]
    pub error_threshold_percent: u8,

    /// Minimum requests in the rolling interval before tripping.
    #[serde(default = "default_volume_threshold")]
    pub request_volume_threshold: u32,

    /// Time spent open before probing, in milliseconds.
    #[serde(default = "default_sleep_window")]
    pub sleep_window_ms: u64,

    /// Concurrent probes admitted while half-open.
    #[serde(default = "default_max_half_open")]
    pub max_half_open_concurrency: u32,

    /// Length of the counting window while closed, in milliseconds.
    #[serde(default = "default_rolling_interval")]
    pub rolling_interval_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold_percent: default_error_threshold(),
            request_volume_threshold: default_volume_threshold(),
            sleep_window_ms: default_sleep_window(),
            max_half_open_concurrency: default_max_half_open(),
            rolling_interval_ms: default_rolling_interval(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Sleep window.
    #[must_use]
    pub const fn sleep_window(&self) -> Duration {
        Duration::from_millis(self.sleep_window_ms)
    }

    /// Rolling interval.
    #[must_use]
    pub const fn rolling_interval(&self) -> Duration {
        Duration::from_millis(self.rolling_interval_ms)
    }
}

fn default_error_threshold() -> u8 {
    50
}

fn default_volume_threshold() -> u32 {
    20
}

fn default_sleep_window() -> u64 {
    5000
}

fn default_max_half_open() -> u32 {
    1
}

fn default_rolling_interval() -> u64 {
    10_000
}

// ---------------------------------------------------------------------------
// cors
// ---------------------------------------------------------------------------

/// CORS configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins; a single `"*"` allows any origin.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    /// Methods advertised to browsers.
    #[serde(default = "default_methods")]
    pub allowed_methods: Vec<String>,

    /// Request headers advertised to browsers.
    #[serde(default = "default_headers")]
    pub allowed_headers: Vec<String>,

    /// Response headers exposed to scripts.
    #[serde(default = "default_exposed_headers")]
    pub exposed_headers: Vec<String>,

    /// Preflight cache lifetime, in seconds.
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Send `Access-Control-Allow-Credentials: true`.
    #[serde(default)]
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_origins(),
            allowed_methods: default_methods(),
            allowed_headers: default_headers(),
            exposed_headers: default_exposed_headers(),
            max_age_secs: default_max_age(),
            allow_credentials: false,
        }
    }
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
        .map(String::from)
        .to_vec()
}

fn default_headers() -> Vec<String> {
    [
        "Authorization",
        "Content-Type",
        "X-CSRF-Token",
        "X-Correlation-Id",
    ]
    .map(String::from)
    .to_vec()
}

fn default_exposed_headers() -> Vec<String> {
    ["X-Correlation-Id", "X-Trace-Id"].map(String::from).to_vec()
}

fn default_max_age() -> u64 {
    86_400
}

// ---------------------------------------------------------------------------
// csrf
// ---------------------------------------------------------------------------

/// CSRF configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CsrfConfig {
    /// Enable the CSRF stage.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Header carrying the token.
    #[serde(default = "default_csrf_header")]
    pub header_name: String,

    /// Route patterns or paths that bypass the check.
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: default_csrf_header(),
            exempt_paths: default_exempt_paths(),
        }
    }
}

fn default_csrf_header() -> String {
    "X-CSRF-Token".to_string()
}

fn default_exempt_paths() -> Vec<String> {
    vec![default_login_path()]
}

// ---------------------------------------------------------------------------
// tracing
// ---------------------------------------------------------------------------

/// Sampler used for new root spans.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Sample everything (rate >= 1.0) or nothing (rate 0.0).
    #[default]
    Const,
    /// Sample a fraction of trace ids.
    Rate,
}

/// Distributed tracing configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TracingConfig {
    /// Export spans over OTLP.
    #[serde(default)]
    pub enabled: bool,

    /// Service name reported with spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Sampler kind.
    #[serde(default)]
    pub sampler: SamplerKind,

    /// Sampling rate in `[0.0, 1.0]`.
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,

    /// OTLP collector endpoint.
    #[serde(default = "default_otlp_endpoint")]
    pub otlp_endpoint: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: default_service_name(),
            sampler: SamplerKind::default(),
            sampling_rate: default_sampling_rate(),
            otlp_endpoint: default_otlp_endpoint(),
        }
    }
}

fn default_service_name() -> String {
    "rampart".to_string()
}

fn default_sampling_rate() -> f64 {
    1.0
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

// ---------------------------------------------------------------------------
// logging
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable text.
    Text,
}

/// Log output sink.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    /// Standard output.
    #[default]
    Stdout,
    /// Standard error.
    Stderr,
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Level filter (`trace`, `debug`, `info`, `warn`, `error`) or directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output sink.
    #[serde(default)]
    pub sink: LogSink,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            sink: LogSink::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// metrics
// ---------------------------------------------------------------------------

/// Metrics configuration section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder and serve `/metrics`.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
