//! The `MetricsFactory` capability and the descriptor-table-driven `Metrics`
//! struct that the tracer, sampler and reporter report through.
//!
//! Fields are declared via an explicit static descriptor table walked once
//! at construction time, rather than discovered by reflection.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// A monotonically increasing counter.
pub trait Counter: fmt::Debug + Send + Sync {
    /// Adds `delta` (non-negative) to the counter.
    fn inc(&self, delta: i64);
}

/// A point-in-time value.
pub trait Gauge: fmt::Debug + Send + Sync {
    /// Sets the gauge to `value`.
    fn update(&self, value: i64);
}

/// A distribution of durations.
pub trait Timer: fmt::Debug + Send + Sync {
    /// Records one observed duration, in microseconds.
    fn record(&self, duration_micros: i64);
}

/// Creates named, tagged counters/gauges/timers.
///
/// Counter and gauge names form a flat `jaeger_tracer_<name>` namespace with
/// stable tag keys (`state`, `sampled`, `group`, `result`, `phase`).
pub trait MetricsFactory: fmt::Debug + Send + Sync {
    /// Creates a counter named `jaeger_tracer_<name>` qualified by `tags`.
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter>;

    /// Creates a gauge named `jaeger_tracer_<name>` qualified by `tags`.
    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge>;

    /// Creates a timer named `jaeger_tracer_<name>` qualified by `tags`.
    fn create_timer(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Timer>;
}

#[derive(Debug, Clone, Copy)]
struct NopCounter;
impl Counter for NopCounter {
    fn inc(&self, _delta: i64) {}
}

#[derive(Debug, Clone, Copy)]
struct NopGauge;
impl Gauge for NopGauge {
    fn update(&self, _value: i64) {}
}

#[derive(Debug, Clone, Copy)]
struct NopTimer;
impl Timer for NopTimer {
    fn record(&self, _duration_micros: i64) {}
}

/// A `MetricsFactory` that discards everything. Used when the caller does
/// not configure a metrics sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopMetricsFactory;
impl MetricsFactory for NopMetricsFactory {
    fn create_counter(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(NopCounter)
    }

    fn create_gauge(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(NopGauge)
    }

    fn create_timer(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(NopTimer)
    }
}

fn metric_key(name: &str, tags: &[(&str, &str)]) -> String {
    let mut key = format!("jaeger_tracer_{}", name);
    let mut sorted = tags.to_vec();
    sorted.sort();
    for (k, v) in sorted {
        key.push('{');
        key.push_str(k);
        key.push('=');
        key.push_str(v);
        key.push('}');
    }
    key
}

/// An in-memory `MetricsFactory`, mirroring jaeger-client-go's `metricstest`
/// package: every `inc`/`update` call is recorded under its fully qualified
/// key so tests can assert on counter values.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricsFactory {
    counters: Arc<Mutex<HashMap<String, i64>>>,
    gauges: Arc<Mutex<HashMap<String, i64>>>,
}
impl InMemoryMetricsFactory {
    /// Makes a new, empty `InMemoryMetricsFactory`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value of the counter `name{tags...}`, or 0 if
    /// never incremented.
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        let key = metric_key(name, tags);
        *self.counters.lock().expect("poisoned").get(&key).unwrap_or(&0)
    }

    /// Returns the current value of the gauge `name{tags...}`, or 0 if never set.
    pub fn gauge(&self, name: &str, tags: &[(&str, &str)]) -> i64 {
        let key = metric_key(name, tags);
        *self.gauges.lock().expect("poisoned").get(&key).unwrap_or(&0)
    }
}

#[derive(Debug)]
struct RecordingCounter {
    key: String,
    store: Arc<Mutex<HashMap<String, i64>>>,
}
impl Counter for RecordingCounter {
    fn inc(&self, delta: i64) {
        *self.store.lock().expect("poisoned").entry(self.key.clone()).or_insert(0) += delta;
    }
}

#[derive(Debug)]
struct RecordingGauge {
    key: String,
    store: Arc<Mutex<HashMap<String, i64>>>,
}
impl Gauge for RecordingGauge {
    fn update(&self, value: i64) {
        self.store.lock().expect("poisoned").insert(self.key.clone(), value);
    }
}

impl MetricsFactory for InMemoryMetricsFactory {
    fn create_counter(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Counter> {
        Box::new(RecordingCounter {
            key: metric_key(name, tags),
            store: Arc::clone(&self.counters),
        })
    }

    fn create_gauge(&self, name: &str, tags: &[(&str, &str)]) -> Box<dyn Gauge> {
        Box::new(RecordingGauge {
            key: metric_key(name, tags),
            store: Arc::clone(&self.gauges),
        })
    }

    fn create_timer(&self, _name: &str, _tags: &[(&str, &str)]) -> Box<dyn Timer> {
        Box::new(NopTimer)
    }
}

struct CounterDescriptor {
    field: &'static str,
    name: &'static str,
    tags: &'static [(&'static str, &'static str)],
}

struct GaugeDescriptor {
    field: &'static str,
    name: &'static str,
    tags: &'static [(&'static str, &'static str)],
}

const TRACES_STARTED_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "traces_started_sampled",
    name: "traces",
    tags: &[("state", "started"), ("sampled", "y")],
};
const TRACES_STARTED_NOT_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "traces_started_not_sampled",
    name: "traces",
    tags: &[("state", "started"), ("sampled", "n")],
};
const TRACES_JOINED_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "traces_joined_sampled",
    name: "traces",
    tags: &[("state", "joined"), ("sampled", "y")],
};
const TRACES_JOINED_NOT_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "traces_joined_not_sampled",
    name: "traces",
    tags: &[("state", "joined"), ("sampled", "n")],
};
const SPANS_STARTED: CounterDescriptor = CounterDescriptor {
    field: "spans_started",
    name: "spans",
    tags: &[("state", "started"), ("group", "lifecycle")],
};
const SPANS_SAMPLING_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "spans_sampling_sampled",
    name: "spans",
    tags: &[("group", "sampling"), ("sampled", "y")],
};
const SPANS_SAMPLING_NOT_SAMPLED: CounterDescriptor = CounterDescriptor {
    field: "spans_sampling_not_sampled",
    name: "spans",
    tags: &[("group", "sampling"), ("sampled", "n")],
};
const SPANS_FINISHED: CounterDescriptor = CounterDescriptor {
    field: "spans_finished",
    name: "spans",
    tags: &[("state", "finished"), ("group", "lifecycle")],
};
const REPORTER_SUCCESS: CounterDescriptor = CounterDescriptor {
    field: "reporter_success",
    name: "reporter-spans",
    tags: &[("result", "ok")],
};
const REPORTER_FAILURE: CounterDescriptor = CounterDescriptor {
    field: "reporter_failure",
    name: "reporter-spans",
    tags: &[("result", "err")],
};
const REPORTER_DROPPED: CounterDescriptor = CounterDescriptor {
    field: "reporter_dropped",
    name: "reporter-spans",
    tags: &[("result", "dropped")],
};
const SAMPLER_RETRIEVED: CounterDescriptor = CounterDescriptor {
    field: "sampler_retrieved",
    name: "sampler",
    tags: &[("state", "retrieved")],
};
const SAMPLER_UPDATED: CounterDescriptor = CounterDescriptor {
    field: "sampler_updated",
    name: "sampler",
    tags: &[("state", "updated")],
};
const SAMPLER_QUERY_FAILURE: CounterDescriptor = CounterDescriptor {
    field: "sampler_query_failure",
    name: "sampler",
    tags: &[("state", "failure"), ("phase", "query")],
};
const SAMPLER_PARSING_FAILURE: CounterDescriptor = CounterDescriptor {
    field: "sampler_parsing_failure",
    name: "sampler",
    tags: &[("state", "failure"), ("phase", "parsing")],
};
const DECODING_ERRORS: CounterDescriptor = CounterDescriptor {
    field: "decoding_errors",
    name: "decoding-errors",
    tags: &[],
};

const REPORTER_QUEUE_LENGTH: GaugeDescriptor = GaugeDescriptor {
    field: "reporter_queue_length",
    name: "reporter-queue",
    tags: &[],
};

/// All metrics emitted by this crate, materialized from a `MetricsFactory`
/// by walking the descriptor table above.
#[derive(Debug)]
pub struct Metrics {
    pub traces_started_sampled: Box<dyn Counter>,
    pub traces_started_not_sampled: Box<dyn Counter>,
    pub traces_joined_sampled: Box<dyn Counter>,
    pub traces_joined_not_sampled: Box<dyn Counter>,
    pub spans_started: Box<dyn Counter>,
    pub spans_sampling_sampled: Box<dyn Counter>,
    pub spans_sampling_not_sampled: Box<dyn Counter>,
    pub spans_finished: Box<dyn Counter>,
    pub reporter_success: Box<dyn Counter>,
    pub reporter_failure: Box<dyn Counter>,
    pub reporter_dropped: Box<dyn Counter>,
    pub reporter_queue_length: Box<dyn Gauge>,
    pub sampler_retrieved: Box<dyn Counter>,
    pub sampler_updated: Box<dyn Counter>,
    pub sampler_query_failure: Box<dyn Counter>,
    pub sampler_parsing_failure: Box<dyn Counter>,
    pub decoding_errors: Box<dyn Counter>,
}
impl Metrics {
    /// Builds the full set of counters/gauges this crate reports, asking
    /// `factory` to materialize each one named in the descriptor table.
    pub fn new(factory: &dyn MetricsFactory) -> Self {
        macro_rules! counter {
            ($d:expr) => {
                factory.create_counter($d.name, $d.tags)
            };
        }
        macro_rules! gauge {
            ($d:expr) => {
                factory.create_gauge($d.name, $d.tags)
            };
        }
        let _ = TRACES_STARTED_SAMPLED.field; // descriptor fields are documentation, not read at runtime
        Metrics {
            traces_started_sampled: counter!(TRACES_STARTED_SAMPLED),
            traces_started_not_sampled: counter!(TRACES_STARTED_NOT_SAMPLED),
            traces_joined_sampled: counter!(TRACES_JOINED_SAMPLED),
            traces_joined_not_sampled: counter!(TRACES_JOINED_NOT_SAMPLED),
            spans_started: counter!(SPANS_STARTED),
            spans_sampling_sampled: counter!(SPANS_SAMPLING_SAMPLED),
            spans_sampling_not_sampled: counter!(SPANS_SAMPLING_NOT_SAMPLED),
            spans_finished: counter!(SPANS_FINISHED),
            reporter_success: counter!(REPORTER_SUCCESS),
            reporter_failure: counter!(REPORTER_FAILURE),
            reporter_dropped: counter!(REPORTER_DROPPED),
            reporter_queue_length: gauge!(REPORTER_QUEUE_LENGTH),
            sampler_retrieved: counter!(SAMPLER_RETRIEVED),
            sampler_updated: counter!(SAMPLER_UPDATED),
            sampler_query_failure: counter!(SAMPLER_QUERY_FAILURE),
            sampler_parsing_failure: counter!(SAMPLER_PARSING_FAILURE),
            decoding_errors: counter!(DECODING_ERRORS),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn in_memory_factory_records_counters() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Metrics::new(&factory);
        metrics.reporter_dropped.inc(3);
        metrics.reporter_dropped.inc(2);
        assert_eq!(factory.counter("reporter-spans", &[("result", "dropped")]), 5);
    }

    #[test]
    fn in_memory_factory_records_gauges() {
        let factory = InMemoryMetricsFactory::new();
        let metrics = Metrics::new(&factory);
        metrics.reporter_queue_length.update(42);
        assert_eq!(factory.gauge("reporter-queue", &[]), 42);
    }

    #[test]
    fn nop_factory_discards() {
        let metrics = Metrics::new(&NopMetricsFactory);
        metrics.spans_finished.inc(1);
    }
}
