//! Carrier codecs: inject/extract a `SpanContext` to/from a wire
//! carrier, plus the debug-id back-channel.
//!
//! # References
//!
//! - [propagation.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/propagation.go)
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::constants::{JAEGER_DEBUG_HEADER, TRACER_CONTEXT_HEADER_NAME, TRACE_BAGGAGE_HEADER_PREFIX};
use crate::error::{self, ErrorKind};
use crate::metrics::Metrics;
use crate::span::SpanContext;
use crate::{Error, Result};

const FRAGMENT: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b'%').add(b'<').add(b'>').add(b'`');

/// Normalizes a baggage key for the wire: `_` becomes `-`, and the result is
/// lowercased. Applied on write only; extraction stores whatever key it
/// finds (already normalized, since only this crate ever writes one).
fn normalize_baggage_key(key: &str) -> String {
    key.replace('_', "-").to_ascii_lowercase()
}

/// Writes a `SpanContext` into a carrier.
pub trait Injector {
    /// Stores `key`/`value` in the carrier.
    fn set(&mut self, key: &str, value: &str);
}

/// Reads a `SpanContext` out of a carrier.
pub trait Extractor {
    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Option<&str>;

    /// Iterates over all carrier keys/values.
    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_>;
}

impl Injector for HashMap<String, String> {
    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_owned(), value.to_owned());
    }
}
impl Extractor for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, key).map(String::as_str)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&str, &str)> + '_> {
        Box::new(HashMap::iter(self).map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Extraction outcome, distinguishing "no trace state" (but possibly a
/// debug-id request) from a fully formed context.
#[derive(Debug, Clone)]
pub enum Extracted {
    /// A fully formed span context was found.
    Context(SpanContext),
    /// No trace state was found, but a debug-id header was.
    DebugIdOnly(SpanContext),
    /// Nothing relevant was found in the carrier.
    None,
}
impl Extracted {
    /// Converts to `Option<SpanContext>`, collapsing `None` away.
    pub fn into_option(self) -> Option<SpanContext> {
        match self {
            Extracted::Context(c) | Extracted::DebugIdOnly(c) => Some(c),
            Extracted::None => None,
        }
    }
}

/// The `TextMap` codec: trace state under `uber-trace-id`, each baggage item
/// under its key prefixed with `uberctx-`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextMapCodec {
    url_encode: bool,
}
impl TextMapCodec {
    /// Makes a new `TextMapCodec`. `url_encode` controls whether baggage
    /// values are percent-encoded on inject / percent-decoded on extract,
    /// which `HttpHeaderCodec` needs and a plain in-process `TextMap` does not.
    pub fn new(url_encode: bool) -> Self {
        TextMapCodec { url_encode }
    }

    /// Writes `context` into `carrier`.
    pub fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        carrier.set(TRACER_CONTEXT_HEADER_NAME, &context.to_string());
        for (key, value) in context.baggage_items() {
            let value = if self.url_encode {
                utf8_percent_encode(value, FRAGMENT).to_string()
            } else {
                value.to_owned()
            };
            let key = format!("{}{}", TRACE_BAGGAGE_HEADER_PREFIX, normalize_baggage_key(key));
            carrier.set(&key, &value);
        }
    }

    /// Reads a `SpanContext` out of `carrier`.
    ///
    /// Returns `Ok(None)` if no trace-state key and no debug-id key are
    /// present (not an error: an un-instrumented caller is normal). Returns
    /// an error if a trace-state key is present but malformed.
    pub fn extract(&self, carrier: &dyn Extractor) -> Result<Option<SpanContext>> {
        Ok(self.extract_full(carrier)?.into_option())
    }

    /// Like `extract`, but distinguishes a debug-id-only carrier from one
    /// with no relevant keys at all, which span construction needs to tell apart.
    pub fn extract_full(&self, carrier: &dyn Extractor) -> Result<Extracted> {
        let mut baggage = HashMap::new();
        let mut debug_id = None;
        let mut state = None;

        for (key, value) in carrier.iter() {
            let lower = key.to_ascii_lowercase();
            if lower == TRACER_CONTEXT_HEADER_NAME {
                state = Some(value.to_owned());
            } else if lower == JAEGER_DEBUG_HEADER {
                debug_id = Some(value.to_owned());
            } else if let Some(rest) = lower.strip_prefix(TRACE_BAGGAGE_HEADER_PREFIX) {
                let decoded = if self.url_encode {
                    percent_decode_str(value)
                        .decode_utf8()
                        .map(|c| c.into_owned())
                        .unwrap_or_else(|_| value.to_owned())
                } else {
                    value.to_owned()
                };
                baggage.insert(rest.to_owned(), decoded);
            }
        }

        if let Some(state) = state {
            let context: SpanContext = match state.parse() {
                Ok(c) => c,
                Err(e) => {
                    let e: Error = e;
                    if *e.kind() == ErrorKind::EmptyState {
                        return empty_or_debug(debug_id);
                    }
                    return Err(e);
                }
            };
            let context = baggage.into_iter().fold(context, |c, (k, v)| c.with_baggage_item(k, v));
            let context = match debug_id {
                Some(id) => context.with_debug_id(id),
                None => context,
            };
            return Ok(Extracted::Context(context));
        }

        empty_or_debug(debug_id)
    }
}
fn empty_or_debug(debug_id: Option<String>) -> Result<Extracted> {
    Ok(match debug_id {
        Some(id) => Extracted::DebugIdOnly(crate::span::SpanContext::debug_id_container(id)),
        None => Extracted::None,
    })
}

/// The HTTP-headers codec: identical to `TextMapCodec` except baggage values
/// are percent-encoded, and baggage keys carry the `uberctx-` prefix on the
/// wire (e.g. a space in a baggage value becomes `%20`).
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpHeaderCodec;
impl HttpHeaderCodec {
    /// Writes `context` into `carrier`, namespacing baggage keys under `uberctx-`.
    pub fn inject(&self, context: &SpanContext, carrier: &mut dyn Injector) {
        carrier.set(TRACER_CONTEXT_HEADER_NAME, &context.to_string());
        for (key, value) in context.baggage_items() {
            let encoded = utf8_percent_encode(value, FRAGMENT).to_string();
            let key = format!("{}{}", TRACE_BAGGAGE_HEADER_PREFIX, normalize_baggage_key(key));
            carrier.set(&key, &encoded);
        }
    }

    /// Reads a `SpanContext` out of `carrier`, stripping the `uberctx-` baggage prefix.
    pub fn extract(&self, carrier: &dyn Extractor) -> Result<Option<SpanContext>> {
        Ok(self.extract_full(carrier)?.into_option())
    }

    /// Like `extract`, distinguishing a debug-id-only carrier.
    pub fn extract_full(&self, carrier: &dyn Extractor) -> Result<Extracted> {
        let mut baggage = HashMap::new();
        let mut debug_id = None;
        let mut state = None;

        for (key, value) in carrier.iter() {
            let lower = key.to_ascii_lowercase();
            if lower == TRACER_CONTEXT_HEADER_NAME {
                state = Some(value.to_owned());
            } else if lower == JAEGER_DEBUG_HEADER {
                debug_id = Some(value.to_owned());
            } else if let Some(rest) = lower.strip_prefix(TRACE_BAGGAGE_HEADER_PREFIX) {
                let decoded = percent_decode_str(value)
                    .decode_utf8()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_owned());
                baggage.insert(rest.to_owned(), decoded);
            }
        }

        if let Some(state) = state {
            let context: SpanContext = match state.parse() {
                Ok(c) => c,
                Err(e) => {
                    let e: Error = e;
                    if *e.kind() == ErrorKind::EmptyState {
                        return empty_or_debug(debug_id);
                    }
                    return Err(e);
                }
            };
            let context = baggage.into_iter().fold(context, |c, (k, v)| c.with_baggage_item(k, v));
            let context = match debug_id {
                Some(id) => context.with_debug_id(id),
                None => context,
            };
            return Ok(Extracted::Context(context));
        }

        empty_or_debug(debug_id)
    }
}

/// The carrier format a `PropagationRegistry::inject`/`extract` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// An in-process `HashMap<String, String>` carrier, no URL-encoding.
    TextMap,
    /// An HTTP-headers carrier: URL-encoded baggage under `uberctx-*`.
    HttpHeaders,
}
impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Format::TextMap => write!(f, "text_map"),
            Format::HttpHeaders => write!(f, "http_headers"),
        }
    }
}
impl Format {
    /// Looks up a `Format` by its `Display` name. Used by the
    /// string-keyed `PropagationRegistry::inject_named`/`extract_named`
    /// entry points, where the caller supplies a format identifier that
    /// isn't necessarily one this registry has a codec for.
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "text_map" => Some(Format::TextMap),
            "http_headers" => Some(Format::HttpHeaders),
            _ => None,
        }
    }
}

/// Dispatches `inject`/`extract` to the codec registered for a `Format`.
///
/// A `Tracer` owns one of these; callers ask the tracer to inject/extract
/// rather than reaching for a codec directly, so new formats can be added
/// without changing call sites.
#[derive(Debug, Clone)]
pub struct PropagationRegistry {
    text_map: TextMapCodec,
    http_headers: HttpHeaderCodec,
    metrics: Arc<Metrics>,
}
impl PropagationRegistry {
    /// Makes a new registry with the standard `TextMap`/`HttpHeaders` codecs,
    /// counting decoding failures against `metrics`.
    pub fn new(metrics: Arc<Metrics>) -> Self {
        PropagationRegistry {
            text_map: TextMapCodec::new(false),
            http_headers: HttpHeaderCodec,
            metrics,
        }
    }

    /// Injects `context` into `carrier` using the codec for `format`.
    pub fn inject(&self, format: Format, context: &SpanContext, carrier: &mut dyn Injector) {
        match format {
            Format::TextMap => self.text_map.inject(context, carrier),
            Format::HttpHeaders => self.http_headers.inject(context, carrier),
        }
    }

    /// Extracts a `SpanContext` from `carrier` using the codec for `format`.
    pub fn extract(&self, format: Format, carrier: &dyn Extractor) -> Result<Option<SpanContext>> {
        self.extract_full(format, carrier).map(Extracted::into_option)
    }

    /// Like `extract`, but distinguishes a debug-id-only carrier (used by span construction).
    pub fn extract_full(&self, format: Format, carrier: &dyn Extractor) -> Result<Extracted> {
        let result = match format {
            Format::TextMap => self.text_map.extract_full(carrier),
            Format::HttpHeaders => self.http_headers.extract_full(carrier),
        };
        if let Err(ref e) = result {
            if matches!(e.kind(), ErrorKind::MalformedState | ErrorKind::EmptyState) {
                self.metrics.decoding_errors.inc(1);
            }
        }
        result
    }

    /// Injects into `carrier` using the codec registered under `format_name`
    /// (the same strings `Format`'s `Display` impl produces: `"text_map"`,
    /// `"http_headers"`). Fails with `ErrorKind::UnsupportedFormat` if no
    /// codec is registered under that name.
    pub fn inject_named(&self, format_name: &str, context: &SpanContext, carrier: &mut dyn Injector) -> Result<()> {
        let format = Format::from_name(format_name).ok_or_else(|| unsupported_format(format_name))?;
        self.inject(format, context, carrier);
        Ok(())
    }

    /// Extracts from `carrier` using the codec registered under `format_name`.
    /// Fails with `ErrorKind::UnsupportedFormat` if no codec is registered
    /// under that name.
    pub fn extract_named(&self, format_name: &str, carrier: &dyn Extractor) -> Result<Option<SpanContext>> {
        let format = Format::from_name(format_name).ok_or_else(|| unsupported_format(format_name))?;
        self.extract(format, carrier)
    }
}

pub(crate) fn unsupported_format(name: &str) -> Error {
    error::from_unsupported_format(name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::span::{new_span_id, TraceId, FLAG_SAMPLED};
    use std::collections::HashMap;

    #[test]
    fn text_map_round_trips_context_and_baggage() {
        let codec = TextMapCodec::default();
        let context = SpanContext::root(TraceId { high: 0, low: 0xAB }, 0xCD, FLAG_SAMPLED)
            .with_baggage_item("k".to_owned(), "v".to_owned());

        let mut carrier: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(carrier.get(TRACER_CONTEXT_HEADER_NAME).map(String::as_str), Some("ab:cd:0:1"));

        let extracted = codec.extract(&carrier).unwrap().unwrap();
        assert_eq!(extracted.trace_id(), context.trace_id());
        assert_eq!(extracted.baggage_item("k"), Some("v"));
    }

    #[test]
    fn http_header_codec_url_encodes_baggage_with_spaces() {
        let codec = HttpHeaderCodec;
        let context = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED)
            .with_baggage_item("key".to_owned(), "a value".to_owned());

        let mut carrier: HashMap<String, String> = HashMap::new();
        codec.inject(&context, &mut carrier);
        assert_eq!(
            carrier.get("uberctx-key").map(String::as_str),
            Some("a%20value")
        );

        let extracted = codec.extract(&carrier).unwrap().unwrap();
        assert_eq!(extracted.baggage_item("key"), Some("a value"));
    }

    #[test]
    fn extract_with_no_relevant_keys_returns_none() {
        let codec = TextMapCodec::default();
        let carrier: HashMap<String, String> = HashMap::new();
        assert!(codec.extract(&carrier).unwrap().is_none());
    }

    #[test]
    fn extract_debug_id_only_carrier() {
        let codec = TextMapCodec::default();
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.insert(JAEGER_DEBUG_HEADER.to_owned(), "req-123".to_owned());

        match codec.extract_full(&carrier).unwrap() {
            Extracted::DebugIdOnly(ctx) => {
                assert!(ctx.is_debug_id_container_only());
                assert_eq!(ctx.debug_id(), Some("req-123"));
            }
            other => panic!("expected DebugIdOnly, got {:?}", other),
        }
    }

    #[test]
    fn extract_malformed_state_is_an_error() {
        let codec = TextMapCodec::default();
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.insert(TRACER_CONTEXT_HEADER_NAME.to_owned(), "not-valid".to_owned());
        let err = codec.extract(&carrier).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::MalformedState);
    }

    #[test]
    fn registry_dispatches_by_format() {
        let registry = PropagationRegistry::new(Arc::new(Metrics::new(&crate::metrics::NopMetricsFactory)));
        let context = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED);
        let mut carrier: HashMap<String, String> = HashMap::new();
        registry.inject(Format::HttpHeaders, &context, &mut carrier);
        let extracted = registry
            .extract(Format::HttpHeaders, &carrier)
            .unwrap()
            .unwrap();
        assert_eq!(extracted.trace_id(), context.trace_id());
    }

    #[test]
    fn registry_counts_decoding_errors() {
        use crate::metrics::InMemoryMetricsFactory;

        let factory = InMemoryMetricsFactory::default();
        let metrics = Arc::new(Metrics::new(&factory));
        let registry = PropagationRegistry::new(Arc::clone(&metrics));
        let mut carrier: HashMap<String, String> = HashMap::new();
        carrier.insert(TRACER_CONTEXT_HEADER_NAME.to_owned(), "not-valid".to_owned());
        let err = registry.extract(Format::TextMap, &carrier).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::MalformedState);
        assert_eq!(factory.counter("decoding-errors", &[]), 1);
    }

    #[test]
    fn registry_named_lookup_rejects_unknown_format() {
        let registry = PropagationRegistry::new(Arc::new(Metrics::new(&crate::metrics::NopMetricsFactory)));
        let carrier: HashMap<String, String> = HashMap::new();
        let err = registry.extract_named("carrier-pigeon", &carrier).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::UnsupportedFormat);

        let context = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED);
        let mut carrier: HashMap<String, String> = HashMap::new();
        registry.inject_named("http_headers", &context, &mut carrier).unwrap();
        let extracted = registry.extract_named("http_headers", &carrier).unwrap().unwrap();
        assert_eq!(extracted.trace_id(), context.trace_id());
    }
}
