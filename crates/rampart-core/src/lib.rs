//! # Rampart Core
//!
//! Core types shared by every crate of the Rampart edge pipeline.
//!
//! - [`PipelineError`] / [`ErrorKind`] - The single failure contract and its wire body
//! - [`Principal`] - Authenticated caller derived from a bearer token
//! - [`CorrelationId`] - Opaque per-request identifier threaded through logs and traces
//! - [`RouteDescriptor`] / [`RouteTable`] - Static per-endpoint policy and path resolution

#![doc(html_root_url = "https://docs.rs/rampart-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod correlation;
mod error;
mod principal;
mod route;

use std::future::Future;
use std::pin::Pin;

pub use correlation::{CorrelationId, CORRELATION_ID_MAX_LEN};
pub use error::{ErrorBody, ErrorKind, PipelineError, PipelineResult};
pub use principal::Principal;
pub use route::{RouteDescriptor, RouteError, RouteTable, BUILTIN_PATHS, UNMATCHED_PATTERN};

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
