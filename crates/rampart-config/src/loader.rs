//! Configuration loader with layered approach.
//!
//! Layers are applied in order, later layers winning:
//! 1. Default values
//! 2. Configuration file (TOML or JSON)
//! 3. Environment variables (`PREFIX__SECTION__KEY`)

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{
    AuthMode, ConfigError, KeyStrategy, LogFormat, LogSink, RampartConfig, SamplerKind,
    SigningAlgorithm,
};

/// Configuration loader with layered approach.
///
/// # Example
///
/// ```no_run
/// use rampart_config::ConfigLoader;
///
/// # fn main() -> Result<(), rampart_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_defaults()
///     .with_file("rampart.toml")?
///     .with_env_prefix("RAMPART")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: RampartConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RampartConfig::default(),
            env_prefix: None,
        }
    }

    /// Reset to default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = RampartConfig::default();
        self
    }

    /// Start from the development preset.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = RampartConfig::development();
        self
    }

    /// Start from the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = RampartConfig::production();
        self
    }

    /// Load configuration from a file; the format follows the extension.
    ///
    /// Sections absent from the file keep their default values. Unknown
    /// fields are rejected.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| ConfigError::unsupported_format(path.display().to_string()))?;

        self.config = parse(&content, &format)?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in the given format (`toml` or `json`).
    ///
    /// # Example
    ///
    /// ```
    /// use rampart_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     port = 9000
    ///
    ///     [auth.local]
    ///     secret = "s3cr3t"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.port, 9000);
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, &format.to_lowercase())?;
        Ok(self)
    }

    /// Set the environment variable prefix applied by [`load`](Self::load).
    ///
    /// With prefix `RAMPART`, `RAMPART__RATE_LIMIT__BURST=20` overrides
    /// `rate_limit.burst`. List values are comma separated.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment if one exists.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply overrides from explicit `(key, value)` pairs.
    ///
    /// Keys use the same `PREFIX__SECTION__KEY` shape as the environment.
    pub fn with_overrides<I, K, V>(mut self, prefix: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.apply_overrides(&prefix.to_uppercase(), vars)?;
        Ok(self)
    }

    /// Apply environment overrides and validate.
    pub fn load(mut self) -> Result<RampartConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_overrides(&prefix, env::vars())?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> RampartConfig {
        self.config
    }

    fn apply_overrides<I, K, V>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let scoped = format!("{prefix}__");
        for (key, value) in vars {
            let key = key.as_ref();
            if let Some(rest) = key.strip_prefix(&scoped) {
                self.apply_env_var(key, rest, value.as_ref())?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, path: &str, value: &str) -> Result<(), ConfigError> {
        let parts: Vec<&str> = path.split("__").collect();
        let c = &mut self.config;

        match parts.as_slice() {
            // server
            ["SERVER", "HOST"] => c.server.host = value.to_string(),
            ["SERVER", "PORT"] => c.server.port = parse_num(key, value)?,
            ["SERVER", "READ_TIMEOUT_SECS"] => c.server.read_timeout_secs = parse_num(key, value)?,
            ["SERVER", "WRITE_TIMEOUT_SECS"] => {
                c.server.write_timeout_secs = parse_num(key, value)?;
            }
            ["SERVER", "IDLE_TIMEOUT_SECS"] => c.server.idle_timeout_secs = parse_num(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                c.server.shutdown_timeout_secs = parse_num(key, value)?;
            }
            ["SERVER", "HTTP2_ENABLED"] => c.server.http2_enabled = parse_flag(key, value)?,
            ["SERVER", "MAX_BODY_BYTES"] => c.server.max_body_bytes = parse_num(key, value)?,

            // auth
            ["AUTH", "MODE"] => {
                c.auth.mode = match value.to_lowercase().as_str() {
                    "local" => AuthMode::Local,
                    "remote" => AuthMode::Remote,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'local' or 'remote'")),
                };
            }
            ["AUTH", "LOGIN_PATH"] => c.auth.login_path = value.to_string(),
            ["AUTH", "LOCAL", "ALGORITHM"] => {
                c.auth.local.algorithm = match value.to_uppercase().as_str() {
                    "HS256" => SigningAlgorithm::HS256,
                    "HS384" => SigningAlgorithm::HS384,
                    "HS512" => SigningAlgorithm::HS512,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'HS256', 'HS384' or 'HS512'",
                        ))
                    }
                };
            }
            ["AUTH", "LOCAL", "SECRET"] => c.auth.local.secret = value.to_string(),
            ["AUTH", "LOCAL", "ISSUER"] => c.auth.local.issuer = non_empty(value),
            ["AUTH", "LOCAL", "CLOCK_SKEW_SECS"] => {
                c.auth.local.clock_skew_secs = parse_num(key, value)?;
            }
            ["AUTH", "REMOTE", "BASE_URL"] => c.auth.remote.base_url = non_empty(value),
            ["AUTH", "REMOTE", "REQUEST_TIMEOUT_MS"] => {
                c.auth.remote.request_timeout_ms = parse_num(key, value)?;
            }

            // rate_limit
            ["RATE_LIMIT", "ENABLED"] => c.rate_limit.enabled = parse_flag(key, value)?,
            ["RATE_LIMIT", "REQUESTS_PER_SECOND"] => {
                c.rate_limit.requests_per_second = parse_num(key, value)?;
            }
            ["RATE_LIMIT", "BURST"] => c.rate_limit.burst = parse_num(key, value)?,
            ["RATE_LIMIT", "BUCKET_IDLE_TTL_SECS"] => {
                c.rate_limit.bucket_idle_ttl_secs = parse_num(key, value)?;
            }
            ["RATE_LIMIT", "SWEEP_INTERVAL_SECS"] => {
                c.rate_limit.sweep_interval_secs = parse_num(key, value)?;
            }
            ["RATE_LIMIT", "KEY_STRATEGY"] => {
                c.rate_limit.key_strategy = match value.to_lowercase().as_str() {
                    "ip" => KeyStrategy::Ip,
                    "ip+principal" => KeyStrategy::IpPrincipal,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'ip' or 'ip+principal'",
                        ))
                    }
                };
            }

            // circuit_breaker
            ["CIRCUIT_BREAKER", "ENABLED"] => c.circuit_breaker.enabled = parse_flag(key, value)?,
            ["CIRCUIT_BREAKER", "ERROR_THRESHOLD_PERCENT"] => {
                c.circuit_breaker.error_threshold_percent = parse_num(key, value)?;
            }
            ["CIRCUIT_BREAKER", "REQUEST_VOLUME_THRESHOLD"] => {
                c.circuit_breaker.request_volume_threshold = parse_num(key, value)?;
            }
            ["CIRCUIT_BREAKER", "SLEEP_WINDOW_MS"] => {
                c.circuit_breaker.sleep_window_ms = parse_num(key, value)?;
            }
            ["CIRCUIT_BREAKER", "MAX_HALF_OPEN_CONCURRENCY"] => {
                c.circuit_breaker.max_half_open_concurrency = parse_num(key, value)?;
            }
            ["CIRCUIT_BREAKER", "ROLLING_INTERVAL_MS"] => {
                c.circuit_breaker.rolling_interval_ms = parse_num(key, value)?;
            }

            // cors
            ["CORS", "ALLOWED_ORIGINS"] => c.cors.allowed_origins = parse_list(value),
            ["CORS", "ALLOWED_METHODS"] => c.cors.allowed_methods = parse_list(value),
            ["CORS", "ALLOWED_HEADERS"] => c.cors.allowed_headers = parse_list(value),
            ["CORS", "EXPOSED_HEADERS"] => c.cors.exposed_headers = parse_list(value),
            ["CORS", "MAX_AGE_SECS"] => c.cors.max_age_secs = parse_num(key, value)?,
            ["CORS", "ALLOW_CREDENTIALS"] => c.cors.allow_credentials = parse_flag(key, value)?,

            // csrf
            ["CSRF", "ENABLED"] => c.csrf.enabled = parse_flag(key, value)?,
            ["CSRF", "HEADER_NAME"] => c.csrf.header_name = value.to_string(),
            ["CSRF", "EXEMPT_PATHS"] => c.csrf.exempt_paths = parse_list(value),

            // tracing
            ["TRACING", "ENABLED"] => c.tracing.enabled = parse_flag(key, value)?,
            ["TRACING", "SERVICE_NAME"] => c.tracing.service_name = value.to_string(),
            ["TRACING", "SAMPLER"] => {
                c.tracing.sampler = match value.to_lowercase().as_str() {
                    "const" => SamplerKind::Const,
                    "rate" => SamplerKind::Rate,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'const' or 'rate'")),
                };
            }
            ["TRACING", "SAMPLING_RATE"] => c.tracing.sampling_rate = parse_num(key, value)?,
            ["TRACING", "OTLP_ENDPOINT"] => c.tracing.otlp_endpoint = value.to_string(),

            // logging
            ["LOGGING", "LEVEL"] => c.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                c.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "text" => LogFormat::Text,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'json' or 'text'")),
                };
            }
            ["LOGGING", "SINK"] => {
                c.logging.sink = match value.to_lowercase().as_str() {
                    "stdout" => LogSink::Stdout,
                    "stderr" => LogSink::Stderr,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'stdout' or 'stderr'",
                        ))
                    }
                };
            }

            // metrics
            ["METRICS", "ENABLED"] => c.metrics.enabled = parse_flag(key, value)?,

            // Unknown keys are ignored so unrelated variables sharing the prefix do not fail startup.
            _ => {}
        }

        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<RampartConfig, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::unsupported_format(other)),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected a number"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
