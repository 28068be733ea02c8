//! Prometheus metrics.
//!
//! The recorder is installed once per process and rendered by the built-in
//! `/metrics` route rather than a separate listener.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `http_requests_total` | Counter | `method`, `route`, `status` |
//! | `http_request_duration_seconds` | Histogram | `method`, `route` |
//! | `http_requests_in_flight` | Gauge | - |
//! | `rate_limit_rejections_total` | Counter | `route` |
//! | `auth_attempts_total` | Counter | `outcome` |
//! | `circuit_breaker_transitions_total` | Counter | `breaker`, `from`, `to` |
//! | `circuit_breaker_state` | Gauge | `breaker` |

use crate::error::TelemetryError;
use crate::TelemetryResult;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rampart_config::MetricsConfig;
use std::sync::OnceLock;
use std::time::Duration;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Request-duration histogram buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Request counter name.
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Request latency histogram name.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
/// In-flight gauge name.
pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";
/// Rate-limit rejection counter name.
pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
/// Authentication attempt counter name.
pub const AUTH_ATTEMPTS_TOTAL: &str = "auth_attempts_total";
/// Breaker transition counter name.
pub const CIRCUIT_BREAKER_TRANSITIONS_TOTAL: &str = "circuit_breaker_transitions_total";
/// Breaker state gauge name.
pub const CIRCUIT_BREAKER_STATE: &str = "circuit_breaker_state";

/// Installs the Prometheus recorder.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns `TelemetryError::MetricsInit` if another recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled || METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
            DURATION_BUCKETS,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let _ = METRICS_HANDLE.set(handle);

    register_metric_descriptions();

    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        HTTP_REQUESTS_IN_FLIGHT,
        "Number of HTTP requests currently being processed"
    );
    describe_counter!(
        RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected by the rate limiter"
    );
    describe_counter!(AUTH_ATTEMPTS_TOTAL, "Authentication attempts by outcome");
    describe_counter!(
        CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
        "Circuit breaker state transitions"
    );
    describe_gauge!(
        CIRCUIT_BREAKER_STATE,
        "Circuit breaker state (0 closed, 1 half-open, 2 open)"
    );
}

/// Records a completed request.
pub fn record_request(method: &str, route: &str, status: u16, duration: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records a rate-limit rejection.
pub fn record_rate_limit_rejection(route: &str) {
    counter!(RATE_LIMIT_REJECTIONS_TOTAL, "route" => route.to_string()).increment(1);
}

/// Records an authentication attempt.
///
/// `outcome` is one of `success`, `missing_token`, `invalid_token` or `unavailable`.
pub fn record_auth_attempt(outcome: &'static str) {
    counter!(AUTH_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

/// Records a breaker transition and updates its state gauge.
///
/// `state_value` is 0 for closed, 1 for half-open and 2 for open.
pub fn record_breaker_transition(breaker: &str, from: &'static str, to: &'static str, state_value: f64) {
    counter!(
        CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
        "breaker" => breaker.to_string(),
        "from" => from,
        "to" => to
    )
    .increment(1);

    gauge!(CIRCUIT_BREAKER_STATE, "breaker" => breaker.to_string()).set(state_value);
}

/// Guard that tracks one in-flight request.
///
/// Decrements the gauge on drop, including when the request future is
/// cancelled.
#[derive(Debug)]
pub struct InFlightGuard {
    _private: (),
}

impl InFlightGuard {
    /// Creates a new guard and increments the in-flight gauge.
    #[must_use]
    pub fn new() -> Self {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
        Self { _private: () }
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig { enabled: false };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_record_functions_dont_panic_without_recorder() {
        record_request("GET", "/api/v1/users/{id}", 200, Duration::from_millis(10));
        record_rate_limit_rejection("/api/v1/users/{id}");
        record_auth_attempt("missing_token");
        record_breaker_transition("/api/v1/users/{id}", "closed", "open", 2.0);
        drop(InFlightGuard::new());
    }

    #[test]
    fn test_render_after_init() {
        init_metrics(&MetricsConfig::default()).unwrap();
        init_metrics(&MetricsConfig::default()).unwrap();

        record_request("GET", "/api/v1/portfolios", 200, Duration::from_millis(3));
        record_auth_attempt("success");

        let rendered = render_metrics().unwrap();
        assert!(rendered.contains(HTTP_REQUESTS_TOTAL));
        assert!(rendered.contains("route=\"/api/v1/portfolios\""));
        assert!(rendered.contains(AUTH_ATTEMPTS_TOTAL));
    }
}
