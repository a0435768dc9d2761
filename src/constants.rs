//! https://github.com/uber/jaeger-client-go/tree/v2.9.0/constants.go
#![allow(dead_code)]

/// The version of the client library reported as Span tag.
pub const JAEGER_CLIENT_VERSION: &str = concat!("jaeger_tracer_core-", env!("CARGO_PKG_VERSION"));

/// The name of the tag used to report client version.
pub const JAEGER_CLIENT_VERSION_TAG_KEY: &str = "jaeger.version";

/// The name of HTTP header or a `TextMap` carrier key which,
/// if found in the carrier, forces the trace to be sampled as "debug" trace.
///
/// The value of the header is recorded as the tag on the root span, so that the
/// trace can be found in the UI using this value as a correlation ID.
pub const JAEGER_DEBUG_HEADER: &str = "jaeger-debug-id";

/// This is used to report host name of the process.
pub const TRACER_HOSTNAME_TAG_KEY: &str = "jaeger.hostname";

/// This is used to report ip of the process.
pub const TRACER_IP_TAG_KEY: &str = "ip";

/// The http header name used to propagate tracing context.
///
/// This must be in lower-case to avoid mismatches when decoding incoming headers.
pub const TRACER_CONTEXT_HEADER_NAME: &str = "uber-trace-id";

/// The prefix for http headers used to propagate baggage.
///
/// This must be in lower-case to avoid mismatches when decoding incoming headers.
pub const TRACE_BAGGAGE_HEADER_PREFIX: &str = "uberctx-";

/// Tag key recording the `jaeger-debug-id` header value on the first span of a debug trace.
pub const JAEGER_DEBUG_ID_TAG_KEY: &str = "jaeger-debug-id";

/// `span.kind` tag key, as defined by the OpenTracing semantic conventions.
pub const SPAN_KIND_TAG_KEY: &str = "span.kind";

/// `span.kind` value identifying an RPC server span.
pub const SPAN_KIND_RPC_SERVER: &str = "server";

/// Default UDP port of the jaeger agent's compact-thrift endpoint.
pub const DEFAULT_UDP_COMPACT_PORT: u16 = 6831;

/// Default UDP port of the jaeger agent's binary-thrift endpoint.
pub const DEFAULT_UDP_BINARY_PORT: u16 = 6832;

/// Default port of the jaeger agent's HTTP sampling strategy endpoint.
pub const DEFAULT_SAMPLING_STRATEGY_PORT: u16 = 5778;

/// Name recognizable in thread dumps / process listings for the reporter's queue worker.
pub const REPORTER_QUEUE_PROCESSOR_NAME: &str = "jaeger.RemoteReporter-QueueProcessor";

/// Name recognizable in thread dumps / process listings for the reporter's flush timer.
pub const REPORTER_FLUSH_TIMER_NAME: &str = "jaeger.RemoteReporter-FlushTimer";

/// Name recognizable in thread dumps / process listings for the remote sampler's poller.
pub const SAMPLER_POLLER_NAME: &str = "jaeger.RemoteControlledSampler-Poller";

/// How long `RemoteReporter::close` waits to enqueue the close command before
/// giving up on a full queue.
pub const DEFAULT_CLOSE_ENQUEUE_TIMEOUT_MILLIS: u64 = 1000;
