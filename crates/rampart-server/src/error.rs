//! Server startup and runtime errors.

use rampart_auth::SetupError;
use rampart_config::ConfigError;
use rampart_core::RouteError;
use rampart_telemetry::TelemetryError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that stop the server from starting or running.
///
/// Each of these is fatal for the `rampart` binary and maps to exit code 1.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging, metrics or tracing could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The token validator could not be built.
    #[error("auth setup error: {0}")]
    Auth(#[from] SetupError),

    /// A declared route is invalid.
    #[error("route error: {0}")]
    Route(#[from] RouteError),

    /// A required builder field was not provided.
    #[error("server builder is missing {0}")]
    Incomplete(&'static str),

    /// I/O error while serving.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_address() {
        let err = ServerError::bind(
            "0.0.0.0:80",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let text = err.to_string();
        assert!(text.contains("0.0.0.0:80"));
        assert!(text.contains("denied"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_config_error_converts() {
        let err: ServerError = ConfigError::missing_field("auth.remote.base_url").into();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("auth.remote.base_url"));
    }
}
