//! `Tracer`: the span-construction algorithm, and the `TracerBuilder` that
//! wires a `Sampler`, `Reporter`, `Clock` and `MetricsFactory` together.
//!
//! # References
//!
//! - [tracer.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/tracer.go)
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::constants;
use crate::metrics::{Metrics, MetricsFactory, NopMetricsFactory};
use crate::propagation::{Extracted, Extractor, Format, Injector, PropagationRegistry};
use crate::reporter::Reporter;
use crate::sampler::BoxSampler;
use crate::span::{
    new_span_id, ReferenceType, Span, SpanContext, SpanReference, SpanSink, TraceId,
};
use crate::tag::{Tag, TagValue};
use crate::Result;

/// Builds a `Tracer`.
pub struct TracerBuilder {
    service_name: String,
    sampler: BoxSampler,
    reporter: Box<dyn Reporter>,
    clock: Box<dyn Clock>,
    metrics_factory: Box<dyn MetricsFactory>,
    tags: Vec<Tag>,
    zipkin_shared_rpc_span: bool,
    use_128bit_trace_id: bool,
}
impl TracerBuilder {
    /// Starts building a `Tracer` for `service_name`, with `sampler` and `reporter`.
    pub fn new(service_name: impl Into<String>, sampler: BoxSampler, reporter: Box<dyn Reporter>) -> Self {
        TracerBuilder {
            service_name: service_name.into(),
            sampler,
            reporter,
            clock: Box::new(SystemClock::new()),
            metrics_factory: Box::new(NopMetricsFactory),
            tags: Vec::new(),
            zipkin_shared_rpc_span: false,
            use_128bit_trace_id: false,
        }
    }

    /// Overrides the default `SystemClock`.
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Overrides the default no-op metrics factory.
    pub fn with_metrics_factory(mut self, factory: Box<dyn MetricsFactory>) -> Self {
        self.metrics_factory = factory;
        self
    }

    /// Adds a process-level tag, reported once on every trace's root span.
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Enables Zipkin-style shared RPC spans: a span tagged
    /// `span.kind=server` that is a direct child of an RPC client span
    /// reuses the parent's span id instead of minting a new one. This
    /// produces two spans sharing one `(trace_id, span_id)` pair at the
    /// collector; does not extend to other span kinds.
    pub fn with_zipkin_shared_rpc_span(mut self, enabled: bool) -> Self {
        self.zipkin_shared_rpc_span = enabled;
        self
    }

    /// Generates 128-bit trace ids for root spans instead of 64-bit ones.
    pub fn with_128bit_trace_id(mut self, enabled: bool) -> Self {
        self.use_128bit_trace_id = enabled;
        self
    }

    /// Builds the `Tracer`.
    pub fn build(self) -> Tracer {
        let metrics = Arc::new(Metrics::new(self.metrics_factory.as_ref()));
        Tracer(Arc::new(TracerState {
            service_name: self.service_name,
            sampler: self.sampler,
            reporter: self.reporter,
            clock: self.clock,
            propagation: PropagationRegistry::new(Arc::clone(&metrics)),
            metrics,
            tags: self.tags,
            zipkin_shared_rpc_span: self.zipkin_shared_rpc_span,
            use_128bit_trace_id: self.use_128bit_trace_id,
        }))
    }
}

struct TracerState {
    service_name: String,
    sampler: BoxSampler,
    reporter: Box<dyn Reporter>,
    clock: Box<dyn Clock>,
    metrics: Arc<Metrics>,
    tags: Vec<Tag>,
    zipkin_shared_rpc_span: bool,
    use_128bit_trace_id: bool,
    propagation: PropagationRegistry,
}

/// A `Tracer` creates spans and reports finished ones.
///
/// Cheaply `Clone`-able; all clones share the same sampler, reporter and
/// metrics. Dropping every clone does not flush the reporter — call
/// `close()` explicitly during shutdown.
#[derive(Clone)]
pub struct Tracer(Arc<TracerState>);
impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("service_name", &self.0.service_name)
            .finish()
    }
}
impl SpanSink for Tracer {
    fn report(&self, span: crate::span::FinishedSpan) {
        self.0.metrics.spans_finished.inc(1);
        self.0.reporter.report(span);
    }
}
impl Tracer {
    /// Returns the configured service name.
    pub fn service_name(&self) -> &str {
        &self.0.service_name
    }

    /// Starts building a span named `operation_name`.
    pub fn span<N: Into<Cow<'static, str>>>(&self, operation_name: N) -> SpanBuilder {
        SpanBuilder {
            tracer: self.clone(),
            operation_name: operation_name.into(),
            references: Vec::new(),
            tags: Vec::new(),
            start_time_micros_override: None,
        }
    }

    /// Injects `context` into `carrier` using the codec for `format`.
    pub fn inject(&self, format: Format, context: &SpanContext, carrier: &mut dyn Injector) {
        self.0.propagation.inject(format, context, carrier)
    }

    /// Extracts a `SpanContext` from `carrier` using the codec for `format`.
    pub fn extract(&self, format: Format, carrier: &dyn Extractor) -> Result<Option<SpanContext>> {
        self.0.propagation.extract(format, carrier)
    }

    /// Flushes the reporter and releases the sampler's resources. Should be
    /// called once, during shutdown.
    pub fn close(&self) {
        self.0.reporter.close();
        self.0.sampler.close();
    }
}

/// Accumulates span-construction options before `start()` runs the
/// construction algorithm.
pub struct SpanBuilder {
    tracer: Tracer,
    operation_name: Cow<'static, str>,
    references: Vec<SpanReference>,
    tags: Vec<Tag>,
    start_time_micros_override: Option<i64>,
}
impl SpanBuilder {
    /// Adds a `ChildOf` reference to `context`.
    pub fn child_of(mut self, context: &SpanContext) -> Self {
        self.references
            .push(SpanReference::new(ReferenceType::ChildOf, context.clone()));
        self
    }

    /// Adds a `FollowsFrom` reference to `context`.
    pub fn follows_from(mut self, context: &SpanContext) -> Self {
        self.references
            .push(SpanReference::new(ReferenceType::FollowsFrom, context.clone()));
        self
    }

    /// Adds a reference extracted from a carrier, if any: a full context
    /// becomes a `ChildOf` reference; a debug-id-only context still roots
    /// the new span with the debug id attached.
    pub fn child_of_extracted(self, extracted: Extracted) -> Self {
        match extracted {
            Extracted::Context(ctx) => self.child_of(&ctx),
            Extracted::DebugIdOnly(ctx) => self.child_of(&ctx),
            Extracted::None => self,
        }
    }

    /// Adds a tag, present from the moment the span is started.
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Overrides the start time (microseconds since the Unix epoch),
    /// e.g. for deterministic tests or spans reconstructed after the fact.
    pub fn start_time_micros(mut self, micros: i64) -> Self {
        self.start_time_micros_override = Some(micros);
        self
    }

    /// Runs the construction algorithm and returns a started `Span`.
    pub fn start(self) -> Span {
        let SpanBuilder {
            tracer,
            operation_name,
            references,
            mut tags,
            start_time_micros_override,
        } = self;
        let state = &tracer.0;

        let preferred_parent = references
            .iter()
            .find(|r| r.is_child_of())
            .or_else(|| references.first());

        let (context, is_root) = match preferred_parent {
            None => (root_context(state, &operation_name, &mut tags), true),
            Some(parent) if parent.context().is_debug_id_container_only() => {
                let debug_id = parent.context().debug_id().unwrap_or_default().to_owned();
                let ctx = root_context(state, &operation_name, &mut tags).with_debug_id(debug_id.clone());
                tags.push(Tag::new(constants::JAEGER_DEBUG_ID_TAG_KEY, debug_id));
                (ctx, true)
            }
            Some(parent) => {
                let baggage = SpanContext::merged_baggage(&references);
                let parent_ctx = parent.context();
                let span_id = if state.zipkin_shared_rpc_span && is_rpc_server(&tags) {
                    parent_ctx.span_id()
                } else {
                    new_span_id()
                };
                let ctx = SpanContext::child(
                    parent_ctx.trace_id(),
                    span_id,
                    parent_ctx.span_id(),
                    parent_ctx.flags(),
                    baggage,
                );
                (ctx, false)
            }
        };

        if is_root {
            if context.is_sampled() {
                state.metrics.traces_started_sampled.inc(1);
            } else {
                state.metrics.traces_started_not_sampled.inc(1);
            }
        } else if context.is_sampled() {
            state.metrics.traces_joined_sampled.inc(1);
        } else {
            state.metrics.traces_joined_not_sampled.inc(1);
        }
        state.metrics.spans_started.inc(1);

        let start_time_micros = start_time_micros_override.unwrap_or_else(|| state.clock.current_time_micros());
        let start_tick_nanos = if state.clock.is_micros_accurate() {
            None
        } else {
            Some(state.clock.current_nano_ticks())
        };

        let sink: Arc<dyn SpanSink> = Arc::new(tracer);
        Span::new(sink, operation_name, context, references, start_time_micros, start_tick_nanos, tags)
    }
}

fn is_rpc_server(tags: &[Tag]) -> bool {
    tags.iter().any(|t| {
        t.name() == constants::SPAN_KIND_TAG_KEY
            && matches!(t.value(), TagValue::String(v) if v == constants::SPAN_KIND_RPC_SERVER)
    })
}

fn root_context(state: &TracerState, operation_name: &str, tags: &mut Vec<Tag>) -> SpanContext {
    let trace_id = if state.use_128bit_trace_id {
        TraceId::new128()
    } else {
        TraceId::new64()
    };
    let span_id = new_span_id();
    let status = state.sampler.sample(operation_name, trace_id);
    let (sampled, sampler_tags) = status.into_parts();
    let flags = if sampled { crate::span::FLAG_SAMPLED } else { 0 };

    if sampled {
        state.metrics.spans_sampling_sampled.inc(1);
    } else {
        state.metrics.spans_sampling_not_sampled.inc(1);
    }

    tags.extend(sampler_tags);
    for tag in &state.tags {
        tags.push(tag.clone());
    }
    tags.push(Tag::new(
        constants::JAEGER_CLIENT_VERSION_TAG_KEY,
        constants::JAEGER_CLIENT_VERSION,
    ));

    SpanContext::root(trace_id, span_id, flags)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::reporter::InMemoryReporter;
    use crate::sampler::ConstSampler;

    fn test_tracer(reporter: InMemoryReporter, sampled: bool) -> Tracer {
        TracerBuilder::new(
            "test-service",
            Box::new(ConstSampler::new(sampled)),
            Box::new(reporter),
        )
        .build()
    }

    #[test]
    fn root_span_is_sampled_per_sampler_decision() {
        let reporter = InMemoryReporter::new();
        let tracer = test_tracer(reporter.clone(), true);
        {
            let _span = tracer.span("op").start();
        }
        assert_eq!(reporter.spans().len(), 1);
    }

    #[test]
    fn unsampled_root_span_is_not_reported() {
        let reporter = InMemoryReporter::new();
        let tracer = test_tracer(reporter.clone(), false);
        {
            let _span = tracer.span("op").start();
        }
        assert_eq!(reporter.spans().len(), 0);
    }

    #[test]
    fn child_span_inherits_trace_id_and_sampling() {
        let reporter = InMemoryReporter::new();
        let tracer = test_tracer(reporter.clone(), true);
        let root = tracer.span("root").start();
        let root_context = root.context();
        let child = tracer.span("child").child_of(&root_context).start();
        assert_eq!(child.context().trace_id(), root_context.trace_id());
        assert_eq!(child.context().parent_id(), root_context.span_id());
        assert_ne!(child.context().span_id(), root_context.span_id());
    }

    #[test]
    fn child_span_merges_parent_baggage() {
        let reporter = InMemoryReporter::new();
        let tracer = test_tracer(reporter, true);
        let root_context = tracer
            .span("root")
            .start()
            .context()
            .with_baggage_item("k".to_owned(), "v".to_owned());
        let child = tracer.span("child").child_of(&root_context).start();
        assert_eq!(child.baggage_item("k"), Some("v"));
    }

    #[test]
    fn debug_id_only_reference_roots_a_new_debug_span() {
        let reporter = InMemoryReporter::new();
        let tracer = test_tracer(reporter.clone(), false);
        let debug_ctx = SpanContext::debug_id_container("req-1".to_owned());
        let span = tracer.span("op").child_of(&debug_ctx).start();
        assert!(span.is_sampled());
        assert!(span.context().is_debug());
        drop(span);
        assert_eq!(reporter.spans().len(), 1);
    }

    #[test]
    fn zipkin_shared_rpc_span_reuses_parent_span_id() {
        let reporter = InMemoryReporter::new();
        let tracer = TracerBuilder::new(
            "test-service",
            Box::new(ConstSampler::new(true)),
            Box::new(reporter),
        )
        .with_zipkin_shared_rpc_span(true)
        .build();
        let client_context = tracer.span("call").start().context();
        let server = tracer
            .span("call")
            .child_of(&client_context)
            .tag(Tag::new(constants::SPAN_KIND_TAG_KEY, constants::SPAN_KIND_RPC_SERVER))
            .start();
        assert_eq!(server.context().span_id(), client_context.span_id());
    }

    #[test]
    fn root_span_carries_process_tags_and_client_version() {
        let reporter = InMemoryReporter::new();
        let tracer = TracerBuilder::new(
            "test-service",
            Box::new(ConstSampler::new(true)),
            Box::new(reporter.clone()),
        )
        .with_tag(Tag::new("env", "test"))
        .build();
        drop(tracer.span("op").start());
        let span = reporter.spans().into_iter().next().unwrap();
        assert!(span.tags().iter().any(|t| t.name() == "env"));
        assert!(span
            .tags()
            .iter()
            .any(|t| t.name() == constants::JAEGER_CLIENT_VERSION_TAG_KEY));
    }
}
