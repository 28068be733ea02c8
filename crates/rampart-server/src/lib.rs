//! # Rampart Server
//!
//! HTTP/1.1 and HTTP/2 server for the Rampart edge pipeline.
//!
//! - Accept loop and per-connection tasks on hyper-util's auto builder
//! - Read, write, idle and shutdown timeouts
//! - Built-in `/health`, `/live`, `/ready` and `/metrics` routes
//! - Graceful shutdown on SIGTERM / Ctrl-C
//!
//! ## Example
//!
//! ```rust,no_run
//! use rampart_config::RampartConfig;
//! use rampart_server::{build_server, ShutdownSignal};
//!
//! # async fn run() -> Result<(), rampart_server::ServerError> {
//! let config = RampartConfig::development();
//! let server = build_server(&config, None)?;
//!
//! let shutdown = ShutdownSignal::new();
//! server.run_with_shutdown(shutdown).await?;
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/rampart-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod bootstrap;
pub mod error;
pub mod health;
pub mod server;
pub mod shutdown;

pub use bootstrap::{build_server, load_config, DEFAULT_CONFIG_FILE, ENV_PREFIX};
pub use error::{ServerError, ServerResult};
pub use health::{BuiltinRoutes, NotFoundHandler, Readiness};
pub use server::{Server, ServerBuilder};
pub use shutdown::{ConnectionTracker, ShutdownSignal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
