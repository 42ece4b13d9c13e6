//! Narrow request-tracing capability consumed by the execution engine.
//!
//! The engine only ever creates spans, sets attributes, ends spans and hands
//! out a propagatable [`SpanContext`]. [`TracingTracer`] implements this on top
//! of the `tracing` crate; [`NoopTracer`] discards everything.

use std::fmt;

/// Attribute keys set by the engine and its providers.
pub mod attributes {
    pub const SERVICE: &str = "db.couchbase.service";
    pub const BUCKET: &str = "db.name";
    pub const SCOPE: &str = "db.couchbase.scope";
    pub const COLLECTION: &str = "db.couchbase.collection";
    pub const OPERATION: &str = "db.operation";
    pub const OPERATION_ID: &str = "db.couchbase.operation_id";
    pub const DURABILITY: &str = "db.couchbase.durability";
    pub const STATEMENT: &str = "db.statement";
    pub const RETRIES: &str = "db.couchbase.retries";
}

/// Span name used for payload encoding sub-phases.
pub const REQUEST_ENCODING_SPAN: &str = "request_encoding";

// ---------------------------------------------------------------------------
// AttributeValue
// ---------------------------------------------------------------------------

/// Value attached to a span attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ---------------------------------------------------------------------------
// SpanContext
// ---------------------------------------------------------------------------

/// Propagatable handle identifying a span as a parent.
///
/// Tracers fill in whichever representation they understand: a numeric id
/// for custom backends, a `tracing::Span` for [`TracingTracer`].
#[derive(Debug, Clone, Default)]
pub struct SpanContext {
    id: Option<u64>,
    span: Option<tracing::Span>,
}

impl SpanContext {
    #[must_use]
    pub fn from_id(id: u64) -> Self {
        Self {
            id: Some(id),
            span: None,
        }
    }

    #[must_use]
    pub fn from_span(span: tracing::Span) -> Self {
        Self {
            id: span.id().map(|id| tracing::Id::into_u64(&id)),
            span: Some(span),
        }
    }

    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    #[must_use]
    pub fn tracing_span(&self) -> Option<&tracing::Span> {
        self.span.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A single in-flight span.
pub trait RequestSpan: Send + Sync {
    fn set_attribute(&self, key: &'static str, value: AttributeValue);

    fn context(&self) -> SpanContext;

    /// Ends the span. Consumes it so a span cannot be ended twice.
    fn end(self: Box<Self>);
}

/// Factory for spans.
pub trait RequestTracer: Send + Sync + fmt::Debug {
    fn request_span(&self, name: &str, parent: Option<&SpanContext>) -> Box<dyn RequestSpan>;
}

// ---------------------------------------------------------------------------
// TracingTracer
// ---------------------------------------------------------------------------

/// Tracer backed by `tracing` spans.
///
/// Only the keys in [`attributes`] are declared on the span; setting any other
/// key is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTracer;

impl RequestTracer for TracingTracer {
    fn request_span(&self, name: &str, parent: Option<&SpanContext>) -> Box<dyn RequestSpan> {
        let parent_id = parent
            .and_then(SpanContext::tracing_span)
            .and_then(tracing::Span::id)
            .or_else(|| tracing::Span::current().id());

        let span = tracing::info_span!(
            parent: parent_id,
            "request",
            otel.name = name,
            db.system = "couchbase",
            db.couchbase.service = tracing::field::Empty,
            db.name = tracing::field::Empty,
            db.couchbase.scope = tracing::field::Empty,
            db.couchbase.collection = tracing::field::Empty,
            db.operation = tracing::field::Empty,
            db.couchbase.operation_id = tracing::field::Empty,
            db.couchbase.durability = tracing::field::Empty,
            db.statement = tracing::field::Empty,
            db.couchbase.retries = tracing::field::Empty,
        );
        Box::new(TracingSpan { span })
    }
}

struct TracingSpan {
    span: tracing::Span,
}

impl RequestSpan for TracingSpan {
    fn set_attribute(&self, key: &'static str, value: AttributeValue) {
        match value {
            AttributeValue::Str(s) => self.span.record(key, s.as_str()),
            AttributeValue::Int(i) => self.span.record(key, i),
            AttributeValue::Bool(b) => self.span.record(key, b),
        };
    }

    fn context(&self) -> SpanContext {
        SpanContext::from_span(self.span.clone())
    }

    fn end(self: Box<Self>) {
        drop(self.span);
    }
}

// ---------------------------------------------------------------------------
// NoopTracer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RequestTracer for NoopTracer {
    fn request_span(&self, _name: &str, _parent: Option<&SpanContext>) -> Box<dyn RequestSpan> {
        Box::new(NoopSpan)
    }
}

struct NoopSpan;

impl RequestSpan for NoopSpan {
    fn set_attribute(&self, _key: &'static str, _value: AttributeValue) {}

    fn context(&self) -> SpanContext {
        SpanContext::default()
    }

    fn end(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_tracer_accepts_declared_and_unknown_keys() {
        let span = TracingTracer.request_span("get", None);
        span.set_attribute(attributes::BUCKET, "default".into());
        span.set_attribute(attributes::RETRIES, 3u32.into());
        span.set_attribute("not.declared", true.into());
        let child = TracingTracer.request_span(REQUEST_ENCODING_SPAN, Some(&span.context()));
        child.end();
        span.end();
    }

    #[test]
    fn span_context_carries_numeric_id() {
        let ctx = SpanContext::from_id(7);
        assert_eq!(ctx.id(), Some(7));
        assert!(ctx.tracing_span().is_none());
    }

    #[test]
    fn attribute_conversions() {
        assert_eq!(AttributeValue::from("x"), AttributeValue::Str("x".to_string()));
        assert_eq!(AttributeValue::from(5u32), AttributeValue::Int(5));
        assert_eq!(AttributeValue::from(false), AttributeValue::Bool(false));
    }
}
