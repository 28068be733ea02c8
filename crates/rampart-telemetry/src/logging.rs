//! Structured logging.
//!
//! Installs a `tracing-subscriber` registry with an [`EnvFilter`] and a
//! single fmt layer. `RUST_LOG`, when set, takes precedence over the
//! configured level.
//!
//! # Example
//!
//! ```rust,ignore
//! use rampart_config::LoggingConfig;
//! use rampart_telemetry::init_logging;
//!
//! init_logging(&LoggingConfig::default())?;
//! tracing::info!(route = "/api/v1/users/{id}", "request completed");
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use rampart_config::{LogFormat, LogSink, LoggingConfig};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initializes the logging subsystem.
///
/// # Errors
///
/// Returns `TelemetryError::LoggingInit` if the level directive is invalid
/// or a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> TelemetryResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => create_env_filter(&config.level)?,
    };

    let writer = match config.sink {
        LogSink::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogSink::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(writer)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(writer)
                .with_filter(filter);

            tracing_subscriber::registry()
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    Ok(())
}

/// Creates an env filter from a level or directive string.
///
/// # Errors
///
/// Returns error if the filter string is invalid.
pub fn create_env_filter(filter: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(filter)
        .map_err(|e| TelemetryError::LoggingInit(format!("Invalid log level '{filter}': {e}")))
}

/// Standard log field names.
///
/// Every stage logs with these keys so events line up across the pipeline.
pub mod fields {
    /// Correlation id field name.
    pub const CORRELATION_ID: &str = "correlation_id";

    /// Trace ID field name.
    pub const TRACE_ID: &str = "trace_id";

    /// Route pattern field name.
    pub const ROUTE: &str = "route";

    /// Principal log id field name.
    pub const PRINCIPAL: &str = "principal";

    /// HTTP method field name.
    pub const METHOD: &str = "method";

    /// Request path field name.
    pub const PATH: &str = "path";

    /// HTTP status code field name.
    pub const STATUS: &str = "status";

    /// Latency field name (milliseconds).
    pub const LATENCY_MS: &str = "latency_ms";

    /// Response size field name.
    pub const BYTES: &str = "bytes";

    /// Client address field name.
    pub const REMOTE_IP: &str = "remote_ip";
}
