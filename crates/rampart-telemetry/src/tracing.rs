//! Distributed tracing.
//!
//! W3C Trace Context parsing, the sampling decision for new roots, and the
//! OpenTelemetry provider with OTLP export.
//!
//! Request spans are always created through the global tracer. When no
//! provider is installed the tracer is a no-op and [`RequestSpan`] falls
//! back to locally generated ids, so `X-Trace-Id` is emitted either way.

use crate::error::TelemetryError;
use crate::TelemetryResult;
use opentelemetry::trace::{
    Span, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId, TraceState,
    Tracer,
};
use opentelemetry::{global, Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, TracerProvider};
use opentelemetry_sdk::Resource;
use rampart_config::{SamplerKind, TracingConfig};
use uuid::Uuid;

/// The W3C Trace Context header for trace propagation.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Instrumentation scope name for request spans.
const TRACER_NAME: &str = "rampart";

/// Trace identity of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// 32 lowercase hex characters.
    pub trace_id: String,
    /// 16 lowercase hex characters.
    pub span_id: String,
    /// Whether the trace is sampled.
    pub sampled: bool,
}

impl TraceContext {
    /// Parses a `traceparent` header value.
    ///
    /// Format: `{version}-{trace-id}-{span-id}-{flags}`, e.g.
    /// `00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01`.
    /// All-zero ids and version `ff` are rejected.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        // Version 00 has exactly four fields.
        if version == "00" && parts.next().is_some() {
            return None;
        }
        if !is_hex(version, 2) || version.eq_ignore_ascii_case("ff") {
            return None;
        }
        if !is_hex(trace_id, 32) || is_zero(trace_id) {
            return None;
        }
        if !is_hex(span_id, 16) || is_zero(span_id) {
            return None;
        }
        if !is_hex(flags, 2) {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    /// Starts a new trace.
    #[must_use]
    pub fn new_root(sampled: bool) -> Self {
        Self {
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: generate_span_id(),
            sampled,
        }
    }

    /// Returns a child context in the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: generate_span_id(),
            sampled: self.sampled,
        }
    }

    /// Formats the context as a `traceparent` header value.
    #[must_use]
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!("00-{}-{}-{}", self.trace_id, self.span_id, flags)
    }

    fn to_span_context(&self) -> Option<SpanContext> {
        let trace_id = TraceId::from_hex(&self.trace_id).ok()?;
        let span_id = SpanId::from_hex(&self.span_id).ok()?;
        let flags = if self.sampled {
            TraceFlags::SAMPLED
        } else {
            TraceFlags::default()
        };
        Some(SpanContext::new(
            trace_id,
            span_id,
            flags,
            true,
            TraceState::default(),
        ))
    }
}

// The low 64 bits of a v4 UUID carry the variant bits, so they are never zero.
fn generate_span_id() -> String {
    Uuid::new_v4().simple().to_string()[16..].to_string()
}

// Bits of the trace id's low half below the UUID variant bits.
const SAMPLE_BITS: u32 = 62;

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

/// Sampling decision for traces that start at this service.
///
/// Inbound contexts keep their own sampled flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSampler {
    kind: SamplerKind,
    rate: f64,
}

impl TraceSampler {
    /// Creates a sampler from the tracing section.
    #[must_use]
    pub fn from_config(config: &TracingConfig) -> Self {
        Self {
            kind: config.sampler,
            rate: config.sampling_rate.clamp(0.0, 1.0),
        }
    }

    /// Decides whether a new trace with this id is sampled.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn should_sample(&self, trace_id: &str) -> bool {
        match self.kind {
            SamplerKind::Const => self.rate >= 1.0,
            SamplerKind::Rate => {
                if self.rate >= 1.0 {
                    return true;
                }
                if self.rate <= 0.0 {
                    return false;
                }
                let low = trace_id
                    .get(16..)
                    .and_then(|hex| u64::from_str_radix(hex, 16).ok())
                    .unwrap_or(0);
                let space = 1u64 << SAMPLE_BITS;
                let bound = (self.rate * space as f64) as u64;
                (low & (space - 1)) < bound
            }
        }
    }

    fn sdk_sampler(&self) -> Sampler {
        let root = match self.kind {
            SamplerKind::Const if self.rate >= 1.0 => Sampler::AlwaysOn,
            SamplerKind::Const => Sampler::AlwaysOff,
            SamplerKind::Rate => Sampler::TraceIdRatioBased(self.rate),
        };
        Sampler::ParentBased(Box::new(root))
    }
}

impl Default for TraceSampler {
    fn default() -> Self {
        Self::from_config(&TracingConfig::default())
    }
}

/// Server span for one request.
///
/// The span ends when [`finish`](Self::finish) is called or the value is
/// dropped.
pub struct RequestSpan {
    span: global::BoxedSpan,
    context: TraceContext,
}

impl std::fmt::Debug for RequestSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSpan")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl RequestSpan {
    /// Starts a span named `name` as a child of `parent`, or as a new root.
    #[must_use]
    pub fn start(
        name: &str,
        parent: Option<&TraceContext>,
        sampler: &TraceSampler,
        attributes: Vec<(&'static str, String)>,
    ) -> Self {
        let tracer = global::tracer(TRACER_NAME);

        let parent_cx = parent
            .and_then(TraceContext::to_span_context)
            .map(|sc| Context::new().with_remote_span_context(sc))
            .unwrap_or_default();

        let span = tracer
            .span_builder(name.to_string())
            .with_kind(SpanKind::Server)
            .with_attributes(attributes.into_iter().map(|(k, v)| KeyValue::new(k, v)))
            .start_with_context(&tracer, &parent_cx);

        let sc = span.span_context();
        let exported = sc.is_valid()
            && parent.map_or(true, |p| sc.span_id().to_string() != p.span_id);

        let context = if exported {
            TraceContext {
                trace_id: sc.trace_id().to_string(),
                span_id: sc.span_id().to_string(),
                sampled: sc.is_sampled(),
            }
        } else {
            match parent {
                Some(p) => p.child(),
                None => {
                    let mut root = TraceContext::new_root(false);
                    root.sampled = sampler.should_sample(&root.trace_id);
                    root
                }
            }
        };

        Self { span, context }
    }

    /// The trace identity of this span.
    #[must_use]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// Tags the final status, flags errors, and ends the span.
    pub fn finish(mut self, status: u16) {
        self.span
            .set_attribute(KeyValue::new("http.response.status_code", i64::from(status)));
        if status >= 400 {
            self.span.set_attribute(KeyValue::new("error", true));
            self.span.set_status(Status::error(format!("HTTP {status}")));
        }
        self.span.end();
    }
}

/// Installs the OTLP tracer provider.
///
/// Returns `None` when tracing is disabled.
///
/// # Errors
///
/// Returns `TelemetryError::TracingInit` if the exporter cannot be built.
pub fn init_tracing(config: &TracingConfig) -> TelemetryResult<Option<TracerProvider>> {
    if !config.enabled {
        return Ok(None);
    }

    let resource = Resource::new([KeyValue::new(
        opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
        config.service_name.clone(),
    )]);

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_sampler(TraceSampler::from_config(config).sdk_sampler())
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(Some(provider))
}

/// Shuts down the global tracer provider, flushing pending spans.
pub fn shutdown_tracing() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";

    #[test]
    fn test_parse_traceparent() {
        let ctx = TraceContext::parse(PARENT).unwrap();
        assert_eq!(ctx.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(ctx.span_id, "b7ad6b7169203331");
        assert!(ctx.sampled);
        assert_eq!(ctx.to_traceparent(), PARENT);
    }

    #[test]
    fn test_parse_unsampled() {
        let ctx =
            TraceContext::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00").unwrap();
        assert!(!ctx.sampled);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for value in [
            "",
            "garbage",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319z-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
        ] {
            assert!(TraceContext::parse(value).is_none(), "{value}");
        }
    }

    #[test]
    fn test_root_and_child_ids() {
        let root = TraceContext::new_root(true);
        assert_eq!(root.trace_id.len(), 32);
        assert_eq!(root.span_id.len(), 16);

        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_ne!(child.span_id, root.span_id);
        assert!(TraceContext::parse(&child.to_traceparent()).is_some());
    }

    #[test]
    fn test_const_sampler() {
        let mut config = TracingConfig::default();
        let id = TraceContext::new_root(false).trace_id;

        config.sampling_rate = 1.0;
        assert!(TraceSampler::from_config(&config).should_sample(&id));

        config.sampling_rate = 0.0;
        assert!(!TraceSampler::from_config(&config).should_sample(&id));
    }

    #[test]
    fn test_rate_sampler_is_deterministic_per_trace() {
        let config = TracingConfig {
            sampler: SamplerKind::Rate,
            sampling_rate: 0.5,
            ..TracingConfig::default()
        };
        let sampler = TraceSampler::from_config(&config);

        assert!(sampler.should_sample("0af7651916cd43dd0000000000000001"));
        assert!(!sampler.should_sample("0af7651916cd43ddffffffffffffffff"));
        assert!(sampler.should_sample("0af7651916cd43dd8000000000000001"));
    }

    #[test]
    fn test_rate_sampler_matches_configured_fraction() {
        const TRACES: u32 = 10_000;

        for rate in [0.1, 0.5, 0.8] {
            let sampler = TraceSampler::from_config(&TracingConfig {
                sampler: SamplerKind::Rate,
                sampling_rate: rate,
                ..TracingConfig::default()
            });
            let sampled = (0..TRACES)
                .filter(|_| sampler.should_sample(&TraceContext::new_root(false).trace_id))
                .count();

            let fraction = sampled as f64 / f64::from(TRACES);
            assert!((fraction - rate).abs() < 0.03, "rate {rate}: sampled {fraction}");
        }
    }

    #[test]
    fn test_request_span_without_provider_keeps_parent_trace() {
        let parent = TraceContext::parse(PARENT).unwrap();
        let span = RequestSpan::start(
            "/api/v1/users/{id}",
            Some(&parent),
            &TraceSampler::default(),
            vec![("http.request.method", "GET".to_string())],
        );

        assert_eq!(span.context().trace_id, parent.trace_id);
        assert_ne!(span.context().span_id, parent.span_id);
        assert!(span.context().sampled);
        span.finish(200);
    }

    #[test]
    fn test_request_span_root() {
        let span = RequestSpan::start("/health", None, &TraceSampler::default(), Vec::new());
        assert_eq!(span.context().trace_id.len(), 32);
        span.finish(503);
    }

    #[test]
    fn test_disabled_tracing() {
        let result = init_tracing(&TracingConfig::default());
        assert!(result.unwrap().is_none());
    }
}
