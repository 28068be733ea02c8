//! # Rampart Auth
//!
//! Bearer token validation for the Rampart edge pipeline.
//!
//! Two interchangeable [`TokenValidator`] implementations:
//!
//! - [`LocalValidator`]: verifies HMAC-signed JWTs in-process
//! - [`RemoteValidator`]: asks the auth service (`GET /auth/validate`),
//!   guarded by its own circuit breaker
//!
//! [`from_config`] picks one based on `auth.mode`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod local;
pub mod remote;
pub mod validator;

pub use error::{SetupError, ValidationError};
pub use local::LocalValidator;
pub use remote::{RemoteValidator, VALIDATE_PATH};
pub use validator::{bearer_token, from_config, TokenValidator};
