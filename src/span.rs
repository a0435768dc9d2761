//! Span, SpanContext and the values that make up a finished span.
//!
//! # How to inject/extract a span
//!
//! You can inject/extract the context of a span by using
//! `PropagationRegistry::inject`/`PropagationRegistry::extract`, or the
//! codecs in [`crate::propagation`] directly.
//!
//! ```
//! use std::collections::HashMap;
//! use jaeger_tracer_core::propagation::TextMapCodec;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut carrier = HashMap::new();
//! carrier.insert(
//!     "uber-trace-id".to_string(), // NOTE: the key must be lower-case
//!     "6309ab92c95468edea0dc1a9772ae2dc:409423a204bc17a8:0:1".to_string(),
//! );
//! let codec = TextMapCodec::default();
//! let context = codec.extract(&carrier)?.unwrap();
//! assert_eq!(context.trace_id().to_string(), "6309ab92c95468edea0dc1a9772ae2dc");
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [constants.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/constants.go)
//! - [context.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/context.go)
//! - [propagation.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/propagation.go)
use rand;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::{self, FromStr};
use std::sync::Arc;

use crate::error::{self, ErrorKind};
use crate::tag::Tag;
use crate::{Error, Result};

/// Bit 0 of `SpanContext::flags`: the trace has been sampled.
pub const FLAG_SAMPLED: u8 = 0b01;
/// Bit 1 of `SpanContext::flags`: the trace is a debug trace.
pub const FLAG_DEBUG: u8 = 0b10;

/// Unique 128bit identifier of a trace.
///
/// ```
/// use jaeger_tracer_core::span::TraceId;
///
/// let id = TraceId{ high: 0, low: 10 };
/// assert_eq!(id.to_string(), "a");
/// assert_eq!("a".parse::<TraceId>().unwrap(), id);
///
/// let id = TraceId{ high: 1, low: 2 };
/// assert_eq!(id.to_string(), "10000000000000002");
/// assert_eq!("10000000000000002".parse::<TraceId>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}
impl TraceId {
    /// Makes a randomly generated 64-bit-only `TraceId` (`high == 0`).
    pub fn new64() -> Self {
        TraceId {
            high: 0,
            low: rand::random(),
        }
    }

    /// Makes a randomly generated 128-bit `TraceId`.
    ///
    /// The high 64 bits are seeded as `(epoch_seconds << 32) | (random & 0xFFFF_FFFF)`,
    /// which keeps the high word unique-per-process-start while the
    /// low 64 bits remain fully random.
    pub fn new128() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let low_bits_of_random: u32 = rand::random();
        let high = (epoch_secs << 32) | u64::from(low_bits_of_random);
        TraceId {
            high,
            low: rand::random(),
        }
    }

    /// Returns `true` if this id is the all-zero sentinel used by debug-id-only contexts.
    pub fn is_zero(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}
impl Default for TraceId {
    /// Makes a randomly generated 64-bit `TraceId`.
    fn default() -> Self {
        TraceId::new64()
    }
}
impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:x}", self.low)
        } else {
            write!(f, "{:x}{:016x}", self.high, self.low)
        }
    }
}
impl FromStr for TraceId {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 32 {
            track_panic!(ErrorKind::InvalidInput, "s={:?}", s)
        } else if s.len() <= 16 {
            let low = track!(u64::from_str_radix(s, 16).map_err(error::from_parse_int_error))?;
            Ok(TraceId { high: 0, low })
        } else {
            let (high, low) = s.as_bytes().split_at(s.len() - 16);
            let high = track!(str::from_utf8(high).map_err(error::from_utf8_error))?;
            let high = track!(u64::from_str_radix(high, 16).map_err(error::from_parse_int_error))?;

            let low = track!(str::from_utf8(low).map_err(error::from_utf8_error))?;
            let low = track!(u64::from_str_radix(low, 16).map_err(error::from_parse_int_error))?;
            Ok(TraceId { high, low })
        }
    }
}

/// Generates a random, non-zero 64-bit span id.
pub fn new_span_id() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Causal relationship of one span to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceType {
    /// The referenced span is the parent of this span.
    ChildOf,
    /// This span logically follows the referenced span, but does not block on it.
    FollowsFrom,
}

/// A causal reference from a span being built to an existing `SpanContext`.
#[derive(Debug, Clone)]
pub struct SpanReference {
    kind: ReferenceType,
    context: SpanContext,
}
impl SpanReference {
    /// Makes a new `SpanReference`.
    pub fn new(kind: ReferenceType, context: SpanContext) -> Self {
        SpanReference { kind, context }
    }

    /// Returns the kind of this reference.
    pub fn kind(&self) -> ReferenceType {
        self.kind
    }

    /// Returns the referenced context.
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// Returns `true` if this is a `ChildOf` reference.
    pub fn is_child_of(&self) -> bool {
        self.kind == ReferenceType::ChildOf
    }
}

/// Immutable identity and baggage of a span.
///
/// All mutations (`with_baggage_item`) return a new instance; existing
/// clones keep observing the baggage snapshot they were created with.
#[derive(Debug, Clone)]
pub struct SpanContext {
    trace_id: TraceId,
    span_id: u64,
    parent_id: u64,
    flags: u8,
    baggage: Arc<HashMap<String, String>>,
    debug_id: Option<String>,
}
impl SpanContext {
    /// Makes a new root `SpanContext` (`parent_id == 0`) with an already
    /// generated id pair and flags (normally computed by a `Sampler`).
    pub fn root(trace_id: TraceId, span_id: u64, flags: u8) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id: 0,
            flags,
            baggage: Arc::new(HashMap::new()),
            debug_id: None,
        }
    }

    /// Makes a new child `SpanContext` reusing `trace_id` and `flags` from the parent.
    pub fn child(
        trace_id: TraceId,
        span_id: u64,
        parent_id: u64,
        flags: u8,
        baggage: Arc<HashMap<String, String>>,
    ) -> Self {
        SpanContext {
            trace_id,
            span_id,
            parent_id,
            flags,
            baggage,
            debug_id: None,
        }
    }

    /// Makes a debug-id-only container: `trace_id = 0, span_id = 0, parent_id = 0, flags = 0`.
    ///
    /// This is what extraction returns when a `jaeger-debug-id` key is
    /// present and no trace state is.
    pub fn debug_id_container(debug_id: String) -> Self {
        SpanContext {
            trace_id: TraceId { high: 0, low: 0 },
            span_id: 0,
            parent_id: 0,
            flags: 0,
            baggage: Arc::new(HashMap::new()),
            debug_id: Some(debug_id),
        }
    }

    /// Returns `true` iff this context carries no trace identity and exists
    /// only to ferry a debug id.
    pub fn is_debug_id_container_only(&self) -> bool {
        self.trace_id.is_zero() && self.debug_id.is_some()
    }

    /// Returns the trace id.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns the span id.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Returns the parent span id (`0` if this is a root span).
    pub fn parent_id(&self) -> u64 {
        self.parent_id
    }

    /// Returns the raw flags byte.
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Returns `true` if bit 0 (sampled) is set.
    pub fn is_sampled(&self) -> bool {
        (self.flags & FLAG_SAMPLED) != 0
    }

    /// Returns `true` if bit 1 (debug) is set.
    pub fn is_debug(&self) -> bool {
        (self.flags & FLAG_DEBUG) != 0
    }

    /// Returns the debug id carried by this context, if any.
    pub fn debug_id(&self) -> Option<&str> {
        self.debug_id.as_deref()
    }

    /// Returns the baggage item named `key`, if present.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.baggage.get(key).map(String::as_str)
    }

    /// Iterates over all baggage items.
    pub fn baggage_items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.baggage.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new `SpanContext` with `key` set to `value` in its baggage.
    ///
    /// The receiver is unaffected; other holders of the old context keep
    /// observing the old baggage snapshot.
    pub fn with_baggage_item(&self, key: String, value: String) -> Self {
        let mut baggage = (*self.baggage).clone();
        baggage.insert(key, value);
        SpanContext {
            baggage: Arc::new(baggage),
            ..self.clone()
        }
    }

    /// Merges the baggage of `refs` (later references win on key conflicts),
    /// as part of the span-construction algorithm's reference-merge step.
    pub(crate) fn merged_baggage(refs: &[SpanReference]) -> Arc<HashMap<String, String>> {
        if refs.is_empty() {
            return Arc::new(HashMap::new());
        }
        let mut merged = HashMap::new();
        for r in refs {
            for (k, v) in r.context().baggage_items() {
                merged.insert(k.to_owned(), v.to_owned());
            }
        }
        Arc::new(merged)
    }

    /// Sets the debug id and forces `FLAG_SAMPLED | FLAG_DEBUG`; used when a
    /// span is rooted from a debug-id-only parent context. A debug-id root is
    /// always sampled, regardless of what the sampler decided before this was
    /// applied.
    pub(crate) fn with_debug_id(mut self, debug_id: String) -> Self {
        self.flags |= FLAG_SAMPLED | FLAG_DEBUG;
        self.debug_id = Some(debug_id);
        self
    }
}
impl fmt::Display for SpanContext {
    /// The default wire form: `traceIdHex:spanIdHex:parentIdHex:flagsHex`,
    /// lowercase, no padding.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{:x}:{:x}:{:x}",
            self.trace_id, self.span_id, self.parent_id, self.flags
        )
    }
}
impl FromStr for SpanContext {
    type Err = Error;

    /// Parses the `contextAsString()` wire form.
    ///
    /// Empty input is `ErrorKind::EmptyState`; any other field-count
    /// mismatch is `ErrorKind::MalformedState`.
    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            track_panic!(ErrorKind::EmptyState, "empty span context string");
        }
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 4 {
            track_panic!(
                ErrorKind::MalformedState,
                "expected 4 ':'-separated fields, got {}: {:?}",
                parts.len(),
                s
            );
        }
        let trace_id = track!(parts[0]
            .parse::<TraceId>()
            .map_err(|_| Error::from(ErrorKind::MalformedState)))?;
        let span_id = track!(u64::from_str_radix(parts[1], 16)
            .map_err(|_| Error::from(ErrorKind::MalformedState)))?;
        let parent_id = track!(u64::from_str_radix(parts[2], 16)
            .map_err(|_| Error::from(ErrorKind::MalformedState)))?;
        let flags = track!(u8::from_str_radix(parts[3], 16)
            .map_err(|_| Error::from(ErrorKind::MalformedState)))?;
        Ok(SpanContext {
            trace_id,
            span_id,
            parent_id,
            flags,
            baggage: Arc::new(HashMap::new()),
            debug_id: None,
        })
    }
}

/// Boolean sampling decision plus the tags that describe why.
#[derive(Debug, Clone)]
pub struct SamplingStatus {
    sampled: bool,
    tags: Vec<Tag>,
}
impl SamplingStatus {
    /// Makes a new `SamplingStatus`.
    pub fn new(sampled: bool, tags: Vec<Tag>) -> Self {
        SamplingStatus { sampled, tags }
    }

    /// Returns whether the decision was to sample.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Returns the tags describing this decision.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub(crate) fn into_parts(self) -> (bool, Vec<Tag>) {
        (self.sampled, self.tags)
    }
}

/// A single timed log event appended to a span.
#[derive(Debug, Clone)]
pub struct LogEntry {
    time_micros: i64,
    fields: Vec<Tag>,
}
impl LogEntry {
    /// Makes a new `LogEntry`.
    pub fn new(time_micros: i64, fields: Vec<Tag>) -> Self {
        LogEntry {
            time_micros,
            fields,
        }
    }

    /// Returns the timestamp, in microseconds since the Unix epoch.
    pub fn time_micros(&self) -> i64 {
        self.time_micros
    }

    /// Returns the fields of this log entry.
    pub fn fields(&self) -> &[Tag] {
        &self.fields
    }
}

/// Builder handed to `Span::log` closures.
#[derive(Debug, Default)]
pub struct LogBuilder {
    fields: Vec<Tag>,
}
impl LogBuilder {
    /// Appends an arbitrary field.
    pub fn field(&mut self, tag: Tag) -> &mut Self {
        self.fields.push(tag);
        self
    }

    /// Shorthand for a `message` string field.
    pub fn message<S: Into<String>>(&mut self, message: S) -> &mut Self {
        self.field(Tag::new("message", message.into()))
    }

    /// Shorthand for an `event=error` field, conventionally paired with `message`.
    pub fn error(&mut self) -> &mut Self {
        self.field(Tag::new("event", "error"))
    }
}

/// Receives finished spans handed off by `Span::finish`.
///
/// `Tracer` implements this; it is a separate trait (rather than a direct
/// `Span -> Tracer` back-reference) so `Span` does not need to know about
/// sampler/propagation wiring, only where to send itself when done.
pub trait SpanSink: fmt::Debug + Send + Sync {
    /// Hands a finished, sampled span off to the reporter.
    fn report(&self, span: FinishedSpan);
}

/// A mutable, in-flight span.
///
/// A `Span` is NOT thread-safe for its mutator operations; callers must
/// serialize access to a single span themselves. The exception is
/// baggage mutation, which publishes a whole new `SpanContext` rather than
/// mutating one in place, so concurrently-held `SpanContext` clones never
/// observe a half-written baggage map.
pub struct Span {
    sink: Arc<dyn SpanSink>,
    operation_name: Cow<'static, str>,
    context: SpanContext,
    references: Vec<SpanReference>,
    start_time_micros: i64,
    start_tick_nanos: Option<i64>,
    tags: Vec<Tag>,
    logs: Vec<LogEntry>,
    finished: bool,
}
impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Span")
            .field("operation_name", &self.operation_name)
            .field("context", &self.context)
            .finish()
    }
}
impl Span {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sink: Arc<dyn SpanSink>,
        operation_name: Cow<'static, str>,
        context: SpanContext,
        references: Vec<SpanReference>,
        start_time_micros: i64,
        start_tick_nanos: Option<i64>,
        initial_tags: Vec<Tag>,
    ) -> Self {
        Span {
            sink,
            operation_name,
            context,
            references,
            start_time_micros,
            start_tick_nanos,
            tags: initial_tags,
            logs: Vec::new(),
            finished: false,
        }
    }

    /// Returns the operation name.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Overwrites the operation name.
    pub fn set_operation_name<N: Into<Cow<'static, str>>>(&mut self, name: N) -> &mut Self {
        self.operation_name = name.into();
        self
    }

    /// Returns a clone of the current `SpanContext`, including the latest
    /// baggage snapshot.
    pub fn context(&self) -> SpanContext {
        self.context.clone()
    }

    /// Sets a tag.
    pub fn set_tag(&mut self, tag: Tag) -> &mut Self {
        self.tags.push(tag);
        self
    }

    /// Appends a log entry built via a closure over `LogBuilder`, timestamped `time_micros`.
    pub fn log<F>(&mut self, time_micros: i64, build: F) -> &mut Self
    where
        F: FnOnce(&mut LogBuilder),
    {
        let mut builder = LogBuilder::default();
        build(&mut builder);
        self.logs.push(LogEntry::new(time_micros, builder.fields));
        self
    }

    /// Sets a baggage item, producing a new `SpanContext` snapshot; existing
    /// clones of the old one are unaffected.
    pub fn set_baggage_item(&mut self, key: String, value: String) -> &mut Self {
        self.context = self.context.with_baggage_item(key, value);
        self
    }

    /// Returns the baggage item named `key`, if present.
    pub fn baggage_item(&self, key: &str) -> Option<&str> {
        self.context.baggage_item(key)
    }

    /// Returns the references recorded at span construction.
    pub fn references(&self) -> &[SpanReference] {
        &self.references
    }

    /// Returns `true` if this span's trace has been sampled.
    pub fn is_sampled(&self) -> bool {
        self.context.is_sampled()
    }

    /// Finishes the span.
    ///
    /// `finish_tick_nanos`, if the span was started with a monotonic tick
    /// (because the clock lacked microsecond accuracy), is used to compute
    /// duration via nanosecond delta rather than wall-clock subtraction.
    ///
    /// If sampled, hands the span to the reporter. Unsampled spans are
    /// dropped.
    pub fn finish(mut self, finish_time_micros: i64, finish_tick_nanos: Option<i64>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let duration_micros = match (self.start_tick_nanos, finish_tick_nanos) {
            (Some(start), Some(finish)) => (finish - start) / 1000,
            _ => finish_time_micros - self.start_time_micros,
        };

        if self.context.is_sampled() {
            let finished = FinishedSpan {
                operation_name: self.operation_name.clone(),
                context: self.context.clone(),
                references: std::mem::take(&mut self.references),
                start_time_micros: self.start_time_micros,
                duration_micros,
                tags: std::mem::take(&mut self.tags),
                logs: std::mem::take(&mut self.logs),
            };
            self.sink.report(finished);
        }
    }
}
impl Drop for Span {
    /// Spans that go out of scope without an explicit `finish()` call are
    /// finished implicitly, using the start time as the finish time.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.context.is_sampled() {
            let finished = FinishedSpan {
                operation_name: self.operation_name.clone(),
                context: self.context.clone(),
                references: std::mem::take(&mut self.references),
                start_time_micros: self.start_time_micros,
                duration_micros: 0,
                tags: std::mem::take(&mut self.tags),
                logs: std::mem::take(&mut self.logs),
            };
            self.sink.report(finished);
        }
    }
}

/// An immutable, completed span, owned by the reporter after `Span::finish`.
#[derive(Debug, Clone)]
pub struct FinishedSpan {
    operation_name: Cow<'static, str>,
    context: SpanContext,
    references: Vec<SpanReference>,
    start_time_micros: i64,
    duration_micros: i64,
    tags: Vec<Tag>,
    logs: Vec<LogEntry>,
}
impl FinishedSpan {
    /// Returns the operation name.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Returns the span's context.
    pub fn context(&self) -> &SpanContext {
        &self.context
    }

    /// Returns the references recorded at span construction.
    pub fn references(&self) -> &[SpanReference] {
        &self.references
    }

    /// Returns the start time, in microseconds since the Unix epoch.
    pub fn start_time_micros(&self) -> i64 {
        self.start_time_micros
    }

    /// Returns the duration, in microseconds.
    pub fn duration_micros(&self) -> i64 {
        self.duration_micros
    }

    /// Returns the tags attached to this span.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Returns the log entries appended to this span.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use trackable::result::TestResult;

    #[test]
    fn trace_id_conversion_works() {
        let id = TraceId { high: 0, low: 10 };
        assert_eq!(id.to_string(), "a");
        assert_eq!("a".parse::<TraceId>().unwrap(), id);

        let id = TraceId { high: 1, low: 2 };
        assert_eq!(id.to_string(), "10000000000000002");
        assert_eq!("10000000000000002".parse::<TraceId>().unwrap(), id);
    }

    #[test]
    fn context_as_string_round_trips() -> TestResult {
        // traceId=0xAB, spanId=0xCD, parentId=0x12, flags=1.
        let context = SpanContext::child(
            TraceId { high: 0, low: 0xAB },
            0xCD,
            0x12,
            1,
            Arc::new(HashMap::new()),
        );
        assert_eq!(context.to_string(), "ab:cd:12:1");

        let reparsed: SpanContext = track!(context.to_string().parse())?;
        assert_eq!(reparsed.trace_id(), context.trace_id());
        assert_eq!(reparsed.span_id(), context.span_id());
        assert_eq!(reparsed.parent_id(), context.parent_id());
        assert_eq!(reparsed.flags(), context.flags());
        Ok(())
    }

    #[test]
    fn empty_context_string_is_empty_state() {
        let err = "".parse::<SpanContext>().unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::EmptyState);
    }

    #[test]
    fn malformed_context_string_is_malformed_state() {
        let err = "abc:def".parse::<SpanContext>().unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::MalformedState);
    }

    #[test]
    fn baggage_mutation_produces_new_snapshot_old_holders_unaffected() {
        let base = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED);
        let mutated = base.with_baggage_item("k".to_owned(), "v".to_owned());
        assert_eq!(base.baggage_item("k"), None);
        assert_eq!(mutated.baggage_item("k"), Some("v"));
    }

    #[test]
    fn debug_id_container_has_zero_identity() {
        let ctx = SpanContext::debug_id_container("xyz".to_owned());
        assert!(ctx.is_debug_id_container_only());
        assert_eq!(ctx.debug_id(), Some("xyz"));
        assert_eq!(ctx.span_id(), 0);
        assert!(ctx.trace_id().is_zero());
    }
}
