//! Span correlation
//!
//! Every enabled request gets one span named `Logging`. Its trace and span
//! identifiers are copied into both captured records so log lines can be
//! joined with distributed traces. When the caller sends a valid W3C
//! `traceparent` header the span continues that trace.

use crate::PLUGIN_NAME;
use http::HeaderMap;
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState, Tracer as _,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Config as TraceConfig, Sampler, Span, Tracer, TracerProvider};

/// W3C Trace Context header name for traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Name of the per-request span
pub const SPAN_NAME: &str = "Logging";

/// Correlation identifiers of a request span, hex encoded
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanIds {
    /// 128-bit trace id, 32 hex chars
    pub trace_id: String,
    /// 64-bit span id, 16 hex chars
    pub span_id: String,
}

impl SpanIds {
    fn from_context(context: &SpanContext) -> Self {
        Self {
            trace_id: context.trace_id().to_string(),
            span_id: context.span_id().to_string(),
        }
    }
}

/// Opens request spans on a tracer owned by the layer
#[derive(Clone)]
pub struct RequestTracer {
    provider: TracerProvider,
    tracer: Tracer,
}

impl RequestTracer {
    /// Tracer on a fresh provider that samples every span
    ///
    /// The provider has no exporter attached; spans only feed the records.
    pub fn new() -> Self {
        let provider = TracerProvider::builder()
            .with_config(TraceConfig::default().with_sampler(Sampler::AlwaysOn))
            .build();
        Self::with_provider(provider)
    }

    /// Tracer on a host-supplied provider (with its own exporters)
    pub fn with_provider(provider: TracerProvider) -> Self {
        let tracer = provider.tracer(PLUGIN_NAME);
        Self { provider, tracer }
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Open the span for one request
    pub fn start(&self, path: &str, headers: &HeaderMap) -> RequestSpan {
        let parent = parent_context(headers);
        let mut span = self.tracer.start_with_context(SPAN_NAME, &parent);
        span.set_attribute(KeyValue::new("req.path", path.to_owned()));
        let ids = SpanIds::from_context(span.span_context());
        RequestSpan { span, ids }
    }
}

impl Default for RequestTracer {
    fn default() -> Self {
        Self::new()
    }
}

/// A live request span
///
/// Dropping it ends the span.
pub struct RequestSpan {
    span: Span,
    ids: SpanIds,
}

impl RequestSpan {
    pub fn ids(&self) -> &SpanIds {
        &self.ids
    }

    /// Record a lifecycle event (`REQUEST`, `RESPONSE`) on the span
    pub fn event(&mut self, name: &'static str) {
        self.span.add_event(name, Vec::new());
    }

    pub fn end(mut self) {
        self.span.end();
    }
}

fn parent_context(headers: &HeaderMap) -> Context {
    headers
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_traceparent)
        .map(|remote| Context::new().with_remote_span_context(remote))
        .unwrap_or_else(Context::new)
}

/// Parse a W3C traceparent header value (version 00 only)
pub fn parse_traceparent(value: &str) -> Option<SpanContext> {
    let parts: Vec<&str> = value.trim().split('-').collect();
    if parts.len() != 4 || parts[0] != "00" {
        return None;
    }

    let (trace_id, span_id, flags) = (parts[1], parts[2], parts[3]);
    if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
        return None;
    }
    if !parts[1..]
        .iter()
        .all(|p| p.bytes().all(|b| b.is_ascii_hexdigit()))
    {
        return None;
    }

    let trace_id = TraceId::from_hex(trace_id).ok()?;
    let span_id = SpanId::from_hex(span_id).ok()?;
    if trace_id == TraceId::INVALID || span_id == SpanId::INVALID {
        return None;
    }
    let flags = u8::from_str_radix(flags, 16).ok()?;

    Some(SpanContext::new(
        trace_id,
        span_id,
        TraceFlags::new(flags),
        true,
        TraceState::default(),
    ))
}
