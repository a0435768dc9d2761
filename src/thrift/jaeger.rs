//! Thrift components defined in [jaeger.thrift].
//!
//! [jaeger.thrift]: https://github.com/uber/jaeger-idl/blob/master/thrift/jaeger.thrift
use thrift_codec::data::{Field, List, Struct};

use crate::constants;
use crate::span::{FinishedSpan, ReferenceType, SpanReference};
use crate::tag::{Tag as CrateTag, TagValue};

/// `TagKind` denotes the kind of a `Tag`'s value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum TagKind {
    String = 0,
    Double = 1,
    Bool = 2,
    Long = 3,
    Binary = 4,
}

/// `Tag` is a basic strongly typed key/value pair.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
#[allow(missing_docs)]
pub enum Tag {
    String { key: String, value: String },
    Double { key: String, value: f64 },
    Bool { key: String, value: bool },
    Long { key: String, value: i64 },
    Binary { key: String, value: Vec<u8> },
}
impl Tag {
    /// Returns the key of this tag.
    pub fn key(&self) -> &str {
        match *self {
            Tag::String { ref key, .. }
            | Tag::Double { ref key, .. }
            | Tag::Bool { ref key, .. }
            | Tag::Long { ref key, .. }
            | Tag::Binary { ref key, .. } => key,
        }
    }

    /// Returns the kind of this tag.
    pub fn kind(&self) -> TagKind {
        match *self {
            Tag::String { .. } => TagKind::String,
            Tag::Double { .. } => TagKind::Double,
            Tag::Bool { .. } => TagKind::Bool,
            Tag::Long { .. } => TagKind::Long,
            Tag::Binary { .. } => TagKind::Binary,
        }
    }
}
impl From<Tag> for Struct {
    fn from(f: Tag) -> Self {
        let mut fields = vec![Field::new(1, f.key()), Field::new(2, f.kind() as i32)];
        match f {
            Tag::String { value, .. } => fields.push(Field::new(3, value)),
            Tag::Double { value, .. } => fields.push(Field::new(4, value)),
            Tag::Bool { value, .. } => fields.push(Field::new(5, value)),
            Tag::Long { value, .. } => fields.push(Field::new(6, value)),
            Tag::Binary { value, .. } => fields.push(Field::new(7, value)),
        };
        Struct::new(fields)
    }
}
impl<'a> From<&'a CrateTag> for Tag {
    fn from(f: &'a CrateTag) -> Self {
        let key = f.name().to_owned();
        match *f.value() {
            TagValue::Boolean(value) => Tag::Bool { key, value },
            TagValue::Float(value) => Tag::Double { key, value },
            TagValue::Integer(value) => Tag::Long { key, value },
            TagValue::UInteger(value) => Tag::Long {
                key,
                value: value as i64,
            },
            TagValue::String(ref value) => Tag::String {
                key,
                value: value.clone(),
            },
        }
    }
}

/// `Log` is a timed event with an arbitrary set of tags.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Log {
    pub timestamp: i64,
    pub fields: Vec<Tag>,
}
impl From<Log> for Struct {
    fn from(f: Log) -> Self {
        Struct::from((
            f.timestamp,
            List::from(f.fields.into_iter().map(Struct::from).collect::<Vec<_>>()),
        ))
    }
}
impl<'a> From<&'a crate::span::LogEntry> for Log {
    fn from(f: &'a crate::span::LogEntry) -> Self {
        Log {
            timestamp: f.time_micros(),
            fields: f.fields().iter().map(Tag::from).collect(),
        }
    }
}

/// Span reference kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum SpanRefKind {
    ChildOf = 0,
    FollowsFrom = 1,
}

/// `SpanRef` describes the causal relationship of the current span to another span.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct SpanRef {
    pub kind: SpanRefKind,
    pub trace_id_low: i64,
    pub trace_id_high: i64,
    pub span_id: i64,
}
impl From<SpanRef> for Struct {
    fn from(f: SpanRef) -> Self {
        Struct::from((f.kind as i32, f.trace_id_low, f.trace_id_high, f.span_id))
    }
}
impl<'a> From<&'a SpanReference> for SpanRef {
    fn from(f: &'a SpanReference) -> Self {
        let kind = match f.kind() {
            ReferenceType::ChildOf => SpanRefKind::ChildOf,
            ReferenceType::FollowsFrom => SpanRefKind::FollowsFrom,
        };
        SpanRef {
            kind,
            trace_id_low: f.context().trace_id().low as i64,
            trace_id_high: f.context().trace_id().high as i64,
            span_id: f.context().span_id() as i64,
        }
    }
}

/// `Span` represents a named unit of work performed by a service.
#[derive(Debug, Clone)]
pub struct Span {
    /// The least significant 64 bits of a traceID.
    pub trace_id_low: i64,

    /// The most significant 64 bits of a traceID; 0 when only 64bit IDs are used.
    pub trace_id_high: i64,

    /// Unique span id (only unique within a given trace).
    pub span_id: i64,

    /// Since nearly all spans will have parents spans, `ChildOf` refs do not have to be explicit.
    ///
    /// Should be `0` if the current span is a root span.
    pub parent_span_id: i64,

    /// The name of operation.
    pub operation_name: String,

    /// Causal references to other spans.
    pub references: Vec<SpanRef>,

    /// A bit field used to propagate sampling decisions.
    ///
    /// `1` signifies a SAMPLED span, `2` signifies a DEBUG span.
    pub flags: i32,

    /// Start time of this span, in microseconds since the Unix epoch.
    pub start_time: i64,

    /// Duration of this span, in microseconds.
    pub duration: i64,

    /// Tag list.
    pub tags: Vec<Tag>,

    /// Log list.
    pub logs: Vec<Log>,
}
impl From<Span> for Struct {
    fn from(f: Span) -> Self {
        let mut fields = Vec::with_capacity(11);
        fields.push(Field::new(1, f.trace_id_low));
        fields.push(Field::new(2, f.trace_id_high));
        fields.push(Field::new(3, f.span_id));
        fields.push(Field::new(4, f.parent_span_id));
        fields.push(Field::new(5, f.operation_name));
        if !f.references.is_empty() {
            fields.push(Field::new(
                6,
                List::from(
                    f.references
                        .into_iter()
                        .map(Struct::from)
                        .collect::<Vec<_>>(),
                ),
            ));
        }
        fields.push(Field::new(7, f.flags));
        fields.push(Field::new(8, f.start_time));
        fields.push(Field::new(9, f.duration));
        if !f.tags.is_empty() {
            fields.push(Field::new(
                10,
                List::from(f.tags.into_iter().map(Struct::from).collect::<Vec<_>>()),
            ));
        }
        if !f.logs.is_empty() {
            fields.push(Field::new(
                11,
                List::from(f.logs.into_iter().map(Struct::from).collect::<Vec<_>>()),
            ));
        }
        Struct::new(fields)
    }
}
impl<'a> From<&'a FinishedSpan> for Span {
    fn from(f: &'a FinishedSpan) -> Self {
        let context = f.context();
        let parent_span_id = if context.parent_id() != 0 {
            context.parent_id() as i64
        } else {
            0
        };
        let mut span = Span {
            trace_id_low: context.trace_id().low as i64,
            trace_id_high: context.trace_id().high as i64,
            span_id: context.span_id() as i64,
            parent_span_id,
            operation_name: f.operation_name().to_owned(),
            references: f.references().iter().map(SpanRef::from).collect(),
            flags: context.flags() as i32,
            start_time: f.start_time_micros(),
            duration: f.duration_micros(),
            tags: f.tags().iter().map(Tag::from).collect(),
            logs: f.logs().iter().map(Log::from).collect(),
        };
        if let Some(id) = context.debug_id() {
            span.tags.push(Tag::from(&CrateTag::new(
                constants::JAEGER_DEBUG_ID_TAG_KEY,
                id.to_owned(),
            )));
        }
        span
    }
}

/// `Process` describes the traced process/service that emits spans.
#[derive(Debug, Clone)]
pub struct Process {
    /// The name of this service.
    pub service_name: String,

    /// Tag list.
    pub tags: Vec<Tag>,
}
impl From<Process> for Struct {
    fn from(f: Process) -> Self {
        let tags = List::from(f.tags.into_iter().map(Struct::from).collect::<Vec<_>>());
        if tags.is_empty() {
            Struct::from((f.service_name,))
        } else {
            Struct::from((f.service_name, tags))
        }
    }
}

/// `Batch` is a collection of spans reported out of process.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct Batch {
    pub process: Process,
    pub spans: Vec<Span>,
}
impl From<Batch> for Struct {
    fn from(f: Batch) -> Self {
        Struct::from((
            Struct::from(f.process),
            List::from(f.spans.into_iter().map(Struct::from).collect::<Vec<_>>()),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::span::{new_span_id, Span as CrateSpan, SpanContext, SpanSink, TraceId, FLAG_SAMPLED};
    use std::borrow::Cow;
    use std::sync::Arc;

    #[derive(Debug)]
    struct CaptureSink(std::sync::Mutex<Option<FinishedSpan>>);
    impl SpanSink for CaptureSink {
        fn report(&self, span: FinishedSpan) {
            *self.0.lock().unwrap() = Some(span);
        }
    }

    #[test]
    fn finished_span_converts_to_thrift_span() {
        let sink = Arc::new(CaptureSink(std::sync::Mutex::new(None)));
        let ctx = SpanContext::root(TraceId { high: 0, low: 7 }, 9, FLAG_SAMPLED);
        let span = CrateSpan::new(
            sink.clone(),
            Cow::Borrowed("op"),
            ctx,
            Vec::new(),
            1_000,
            None,
            vec![CrateTag::new("k", "v")],
        );
        span.finish(2_000, None);

        let finished = sink.0.lock().unwrap().take().expect("span reported");
        let thrift_span = Span::from(&finished);
        assert_eq!(thrift_span.trace_id_low, 7);
        assert_eq!(thrift_span.span_id, 9);
        assert_eq!(thrift_span.operation_name, "op");
        assert_eq!(thrift_span.duration, 1_000);
        assert_eq!(thrift_span.tags.len(), 1);
    }

    #[test]
    fn debug_id_becomes_a_tag() {
        let sink = Arc::new(CaptureSink(std::sync::Mutex::new(None)));
        let ctx = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED)
            .with_debug_id("req-1".to_owned());
        let span = CrateSpan::new(sink.clone(), Cow::Borrowed("op"), ctx, Vec::new(), 0, None, Vec::new());
        span.finish(0, None);

        let finished = sink.0.lock().unwrap().take().unwrap();
        let thrift_span = Span::from(&finished);
        assert!(thrift_span
            .tags
            .iter()
            .any(|t| t.key() == constants::JAEGER_DEBUG_ID_TAG_KEY));
    }
}
