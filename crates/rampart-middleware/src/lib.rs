//! # Rampart Middleware
//!
//! The ordered request pipeline that wraps every business handler.
//!
//! ## Pipeline Stages
//!
//! ```text
//! Request → Recover → Trace → RequestLog → CORS → SecurityHeaders → RateLimit
//!         → Authenticate → Authorize → CSRF → CircuitBreak → Handler
//!                                                              ↓
//! Response ← ErrorTranslate ←──── (stages unwind in reverse) ──┘
//! ```
//!
//! | Stage | Middleware       | Purpose                                        |
//! |-------|------------------|------------------------------------------------|
//! | 1     | Recover          | Panic guard, correlation id                    |
//! | 2     | Trace            | Server span, `X-Trace-Id`, `traceparent`       |
//! | 3     | RequestLog       | One structured log line and request metrics    |
//! | 4     | CORS             | Origin allow-list, preflight answers           |
//! | 5     | SecurityHeaders  | nosniff, frame options, CSP and friends        |
//! | 6     | RateLimit        | Token buckets keyed by client                  |
//! | 7     | Authenticate     | Bearer token → principal                       |
//! | 8     | Authorize        | Required role                                  |
//! | 9     | CSRF             | Token header on state-changing methods         |
//! | 10    | CircuitBreak     | Per-route breaker                              |
//! | 11    | ErrorTranslate   | JSON error body, header merge                  |
//!
//! Stages return `PipelineResult<Response>`; errors travel back through
//! every stage so logging, tracing and breaker bookkeeping all see the final
//! status. Headers a stage wants on the response are queued on the
//! [`RequestContext`] and merged by ErrorTranslate, so they appear on
//! success and error responses alike.
//!
//! ## Example
//!
//! ```
//! use rampart_middleware::pipeline::{Pipeline, Stage};
//!
//! let stages = Stage::all();
//! assert_eq!(stages[0].name(), "recover");
//! assert_eq!(stages[10].name(), "error_translate");
//!
//! let pipeline = Pipeline::builder().build();
//! assert_eq!(pipeline.stage_names().first(), Some(&"recover"));
//! ```

#![doc(html_root_url = "https://docs.rs/rampart-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod headers;
pub mod middleware;
pub mod pipeline;
pub mod stages;
pub mod types;

// Re-export main types at crate root
pub use context::RequestContext;
pub use middleware::{handler_fn, BoxFuture, Handler, HandlerFn, Middleware, Next, HANDLER_STAGE};
pub use pipeline::{Pipeline, PipelineBuilder, Stage};
pub use types::{result_status, Request, Response, ResponseExt};
