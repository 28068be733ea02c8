//! Main configuration types.
//!
//! This module provides the top-level [`RampartConfig`] struct and its builder.

use std::collections::HashSet;

use rampart_core::RouteDescriptor;
use serde::{Deserialize, Serialize};

use crate::{
    AuthConfig, AuthMode, CircuitBreakerConfig, ConfigError, CorsConfig, CsrfConfig, LogFormat,
    LoggingConfig, MetricsConfig, RateLimitConfig, SamplerKind, ServerConfig, TracingConfig,
};

/// Complete edge pipeline configuration.
///
/// Loaded once at startup and frozen thereafter. Use
/// [`ConfigLoader`](crate::ConfigLoader) to layer defaults, files and
/// environment variables.
///
/// # Example
///
/// ```
/// use rampart_config::RampartConfig;
///
/// let config = RampartConfig::default();
/// assert_eq!(config.server.port, 8080);
/// assert!(config.rate_limit.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RampartConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Token validation configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker configuration.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// CSRF configuration.
    #[serde(default)]
    pub csrf: CsrfConfig,

    /// Distributed tracing configuration.
    #[serde(default)]
    pub tracing: TracingConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Declared routes.
    #[serde(default)]
    pub routes: Vec<RouteDescriptor>,
}

impl RampartConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> RampartConfigBuilder {
        RampartConfigBuilder::new()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found, naming its field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_auth()?;
        self.validate_rate_limit()?;
        self.validate_circuit_breaker()?;
        self.validate_cors()?;
        self.validate_tracing()?;
        self.validate_routes()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.port == 0 {
            return Err(ConfigError::invalid_value("server.port", "must be 1-65535"));
        }
        for (field, value) in [
            ("server.read_timeout_secs", server.read_timeout_secs),
            ("server.write_timeout_secs", server.write_timeout_secs),
            ("server.idle_timeout_secs", server.idle_timeout_secs),
            ("server.shutdown_timeout_secs", server.shutdown_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::invalid_value(field, "must be greater than 0"));
            }
        }
        if server.max_body_bytes == 0 {
            return Err(ConfigError::invalid_value(
                "server.max_body_bytes",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_auth(&self) -> Result<(), ConfigError> {
        match self.auth.mode {
            AuthMode::Local => {
                if self.auth.local.secret.trim().is_empty() {
                    return Err(ConfigError::missing_field("auth.local.secret"));
                }
            }
            AuthMode::Remote => {
                let base_url = self
                    .auth
                    .remote
                    .base_url
                    .as_deref()
                    .ok_or_else(|| ConfigError::missing_field("auth.remote.base_url"))?;
                let uri = base_url.parse::<http::Uri>().map_err(|e| {
                    ConfigError::invalid_value("auth.remote.base_url", e.to_string())
                })?;
                if uri.scheme().is_none() || uri.host().is_none() {
                    return Err(ConfigError::invalid_value(
                        "auth.remote.base_url",
                        "must be an absolute http(s) URL",
                    ));
                }
                if self.auth.remote.request_timeout_ms == 0 {
                    return Err(ConfigError::invalid_value(
                        "auth.remote.request_timeout_ms",
                        "must be greater than 0",
                    ));
                }
            }
        }
        if !self.auth.login_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "auth.login_path",
                "must start with '/'",
            ));
        }
        Ok(())
    }

    fn validate_rate_limit(&self) -> Result<(), ConfigError> {
        let limit = &self.rate_limit;
        if !limit.enabled {
            return Ok(());
        }
        if !(limit.requests_per_second.is_finite() && limit.requests_per_second >= 0.0) {
            return Err(ConfigError::invalid_value(
                "rate_limit.requests_per_second",
                "must be a non-negative number",
            ));
        }
        if limit.burst == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.burst",
                "must be greater than 0",
            ));
        }
        if limit.bucket_idle_ttl_secs == 0 || limit.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "rate_limit.bucket_idle_ttl_secs",
                "ttl and sweep interval must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_circuit_breaker(&self) -> Result<(), ConfigError> {
        let breaker = &self.circuit_breaker;
        if !(1..=100).contains(&breaker.error_threshold_percent) {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.error_threshold_percent",
                "must be between 1 and 100",
            ));
        }
        if breaker.request_volume_threshold == 0 {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.request_volume_threshold",
                "must be greater than 0",
            ));
        }
        if breaker.max_half_open_concurrency == 0 {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.max_half_open_concurrency",
                "must be greater than 0",
            ));
        }
        if breaker.sleep_window_ms == 0 || breaker.rolling_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "circuit_breaker.sleep_window_ms",
                "sleep window and rolling interval must be greater than 0",
            ));
        }
        Ok(())
    }

    fn validate_cors(&self) -> Result<(), ConfigError> {
        let origins = &self.cors.allowed_origins;
        if origins.is_empty() {
            return Err(ConfigError::invalid_value(
                "cors.allowed_origins",
                "must not be empty",
            ));
        }
        if origins.len() > 1 && origins.iter().any(|o| o == "*") {
            return Err(ConfigError::invalid_value(
                "cors.allowed_origins",
                "'*' must be the only entry",
            ));
        }
        Ok(())
    }

    fn validate_tracing(&self) -> Result<(), ConfigError> {
        let tracing = &self.tracing;
        if !(0.0..=1.0).contains(&tracing.sampling_rate) {
            return Err(ConfigError::invalid_value(
                "tracing.sampling_rate",
                "must be between 0.0 and 1.0",
            ));
        }
        if tracing.enabled && tracing.service_name.trim().is_empty() {
            return Err(ConfigError::missing_field("tracing.service_name"));
        }
        Ok(())
    }

    fn validate_routes(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for route in &self.routes {
            route
                .validate()
                .map_err(|e| ConfigError::invalid_value("routes", e.to_string()))?;
            if !seen.insert(route.pattern.as_str()) {
                return Err(ConfigError::invalid_value(
                    "routes",
                    format!("duplicate route pattern '{}'", route.pattern),
                ));
            }
        }
        Ok(())
    }

    /// Returns the routes with the login endpoint added when it is not declared.
    #[must_use]
    pub fn effective_routes(&self) -> Vec<RouteDescriptor> {
        let mut routes = self.routes.clone();
        if !routes.iter().any(|r| r.pattern == self.auth.login_path) {
            routes.push(RouteDescriptor::public(self.auth.login_path.clone()).csrf_exempt());
        }
        routes
    }

    /// Create a development configuration preset.
    ///
    /// Text logs at debug level, a throwaway signing secret and always-on
    /// sampling.
    ///
    /// # Example
    ///
    /// ```
    /// use rampart_config::RampartConfig;
    ///
    /// let config = RampartConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// assert!(config.validate().is_ok());
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Text;

        config.auth.local.secret = "development-only-secret".to_string();

        config.tracing.sampler = SamplerKind::Const;
        config.tracing.sampling_rate = 1.0;

        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON logs at info level and ratio sampling. The signing secret or the
    /// remote auth URL must still be supplied.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;

        config.tracing.enabled = true;
        config.tracing.sampler = SamplerKind::Rate;
        config.tracing.sampling_rate = 0.1;

        config
    }
}

/// Builder for [`RampartConfig`].
#[derive(Debug, Default)]
pub struct RampartConfigBuilder {
    config: RampartConfig,
}

impl RampartConfigBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server configuration.
    #[must_use]
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.config.server = server;
        self
    }

    /// Set the auth configuration.
    #[must_use]
    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    /// Set the rate limit configuration.
    #[must_use]
    pub fn rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Set the circuit breaker configuration.
    #[must_use]
    pub fn circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = circuit_breaker;
        self
    }

    /// Set the CORS configuration.
    #[must_use]
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = cors;
        self
    }

    /// Set the CSRF configuration.
    #[must_use]
    pub fn csrf(mut self, csrf: CsrfConfig) -> Self {
        self.config.csrf = csrf;
        self
    }

    /// Set the tracing configuration.
    #[must_use]
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.config.tracing = tracing;
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Add a route.
    #[must_use]
    pub fn route(mut self, route: RouteDescriptor) -> Self {
        self.config.routes.push(route);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> RampartConfig {
        self.config
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if validation fails.
    pub fn build_validated(self) -> Result<RampartConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
