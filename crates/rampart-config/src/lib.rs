//! Typed configuration for the Rampart edge pipeline.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! [`RampartConfig`] holds one section per concern:
//!
//! - [`ServerConfig`] - listener address and timeouts
//! - [`AuthConfig`] - local or remote token validation
//! - [`RateLimitConfig`] - token bucket sizing and keying
//! - [`CircuitBreakerConfig`] - trip thresholds and recovery timing
//! - [`CorsConfig`], [`CsrfConfig`] - browser-facing policies
//! - [`TracingConfig`], [`LoggingConfig`], [`MetricsConfig`] - observability
//!
//! plus the declared routes.
//!
//! # Example
//!
//! ```no_run
//! use rampart_config::ConfigLoader;
//!
//! # fn main() -> Result<(), rampart_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("rampart.toml")?
//!     .with_env_prefix("RAMPART")
//!     .load()?;
//!
//! println!("listening on {}", config.server.bind_addr());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 8080
//! read_timeout_secs = 15
//!
//! [auth]
//! mode = "local"
//!
//! [auth.local]
//! secret = "change-me"
//! issuer = "auth.example.com"
//!
//! [rate_limit]
//! requests_per_second = 5.0
//! burst = 20
//! key_strategy = "ip+principal"
//!
//! [circuit_breaker]
//! error_threshold_percent = 50
//! sleep_window_ms = 5000
//!
//! [[routes]]
//! pattern = "/api/v1/admin/{id}"
//! required_role = "admin"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Values can be overridden with `PREFIX__SECTION__KEY` variables:
//!
//! - `RAMPART__SERVER__PORT=9000`
//! - `RAMPART__AUTH__LOCAL__SECRET=...`
//! - `RAMPART__CORS__ALLOWED_ORIGINS=https://a.example,https://b.example`

#![deny(missing_docs)]
#![deny(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::{RampartConfig, RampartConfigBuilder};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
