//! Observability for the Rampart edge pipeline.
//!
//! - **Logging**: structured JSON or text events via `tracing-subscriber`
//! - **Metrics**: Prometheus text rendered by the built-in `/metrics` route
//! - **Tracing**: W3C trace context and OpenTelemetry spans with OTLP export
//!
//! # Example
//!
//! ```rust,ignore
//! use rampart_config::RampartConfig;
//! use rampart_telemetry::init_telemetry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RampartConfig::development();
//!     let _guard = init_telemetry(&config).expect("telemetry");
//! }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use error::TelemetryError;
pub use logging::{fields, init_logging};
pub use metrics::{init_metrics, render_metrics, InFlightGuard};
pub use tracing::{init_tracing, RequestSpan, TraceContext, TraceSampler, TRACEPARENT_HEADER};

use rampart_config::RampartConfig;

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Guard that shuts down telemetry providers on drop.
///
/// Keep it alive for the lifetime of the process; dropping it flushes
/// pending spans.
pub struct TelemetryGuard {
    tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl std::fmt::Debug for TelemetryGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryGuard")
            .field("tracing", &self.tracer_provider.is_some())
            .finish()
    }
}

impl TelemetryGuard {
    /// Creates a new telemetry guard.
    #[must_use]
    pub fn new(tracer_provider: Option<opentelemetry_sdk::trace::TracerProvider>) -> Self {
        Self { tracer_provider }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            for result in provider.force_flush() {
                if let Err(e) = result {
                    ::tracing::warn!(error = %e, "failed to flush tracer provider");
                }
            }
            if let Err(e) = provider.shutdown() {
                ::tracing::warn!(error = %e, "failed to shut down tracer provider");
            }
        }
    }
}

/// Initializes logging, metrics and tracing from the loaded configuration.
///
/// Logging is installed first so later failures are reported.
///
/// # Errors
///
/// Returns `TelemetryError` if any subsystem fails to initialize.
pub fn init_telemetry(config: &RampartConfig) -> TelemetryResult<TelemetryGuard> {
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;
    let tracer_provider = init_tracing(&config.tracing)?;

    ::tracing::info!(
        tracing = tracer_provider.is_some(),
        metrics = config.metrics.enabled,
        "telemetry initialized"
    );

    Ok(TelemetryGuard::new(tracer_provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_guard_without_provider() {
        let guard = TelemetryGuard::new(None);
        assert!(format!("{guard:?}").contains("false"));
        drop(guard);
    }
}
