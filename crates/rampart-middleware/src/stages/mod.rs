//! Pipeline stages.
//!
//! ## Inbound order
//!
//! 1. [`recover`] - Panic guard, correlation id
//! 2. [`trace`] - Server span, W3C trace context
//! 3. [`request_log`] - Completion log line and request metrics
//! 4. [`cors`] - Origin allow-list, preflight answers
//! 5. [`security_headers`] - Browser hardening headers
//! 6. [`rate_limit`] - Token bucket admission (repeated per principal after 7 under `ip+principal`)
//! 7. [`authenticate`] - Bearer token validation
//! 8. [`authorize`] - Required role check
//! 9. [`csrf`] - Token header on state-changing methods
//! 10. [`circuit_break`] - Per-route breaker around the handler
//!
//! [`error_translate`] is not a stage in the chain; the pipeline applies it
//! to whatever the chain returns.

pub mod authenticate;
pub mod authorize;
pub mod circuit_break;
pub mod cors;
pub mod csrf;
pub mod error_translate;
pub mod rate_limit;
pub mod recover;
pub mod request_log;
pub mod security_headers;
pub mod trace;

pub use authenticate::AuthenticateMiddleware;
pub use authorize::AuthorizeMiddleware;
pub use circuit_break::CircuitBreakMiddleware;
pub use cors::CorsMiddleware;
pub use csrf::CsrfMiddleware;
pub use error_translate::ErrorTranslator;
pub use rate_limit::RateLimitMiddleware;
pub use recover::RecoverMiddleware;
pub use request_log::RequestLogMiddleware;
pub use security_headers::SecurityHeadersMiddleware;
pub use trace::TraceMiddleware;
