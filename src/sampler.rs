//! Sampling strategies: the decision function consulted whenever a
//! new trace is rooted.
use log;
use serde::Deserialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::metrics::Metrics;
use crate::span::{SamplingStatus, TraceId};
use crate::tag::Tag;

/// A decision function over `(operation, trace_id)`, with a lifecycle.
///
/// Implementations must be safely callable from any thread, concurrently,
/// without external synchronization.
pub trait Sampler: fmt::Debug + Send + Sync {
    /// Decides whether a trace rooted by `operation_name`/`trace_id` should be sampled.
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus;

    /// Releases any resources (background tasks, connections) held by this sampler.
    fn close(&self) {}

    /// Returns `true` iff `other` is of the same concrete type with
    /// identical parameters. Drives the remote sampler's "did the strategy
    /// actually change?" check.
    fn equals(&self, other: &dyn Sampler) -> bool;

    /// Supports the `Any`-downcasting `equals` needs to compare concrete types.
    fn as_any(&self) -> &dyn Any;
}

/// `Box<dyn Sampler>`, the type samplers are normally stored/passed as.
pub type BoxSampler = Box<dyn Sampler>;

/// Always returns the same decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstSampler {
    decision: bool,
}
impl ConstSampler {
    /// Makes a new `ConstSampler` that always decides `decision`.
    pub fn new(decision: bool) -> Self {
        ConstSampler { decision }
    }
}
impl Sampler for ConstSampler {
    fn sample(&self, _operation_name: &str, _trace_id: TraceId) -> SamplingStatus {
        SamplingStatus::new(
            self.decision,
            vec![
                Tag::new("sampler.type", "const"),
                Tag::new("sampler.param", self.decision),
            ],
        )
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        other.as_any().downcast_ref::<ConstSampler>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Samples a trace iff its id falls below a threshold proportional to `rate`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilisticSampler {
    rate: f64,
    threshold: u64,
}
impl ProbabilisticSampler {
    /// Makes a new `ProbabilisticSampler` with sampling probability `rate` (clamped to `[0, 1]`).
    pub fn new(rate: f64) -> Self {
        let rate = rate.max(0.0).min(1.0);
        // threshold = rate * 2^63, matching jaeger-client-go's samplerBound scheme.
        let threshold = (rate * (1u64 << 63) as f64) as u64;
        ProbabilisticSampler { rate, threshold }
    }

    /// Returns the configured sampling rate.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}
impl Sampler for ProbabilisticSampler {
    fn sample(&self, _operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let sampled = trace_id.low < self.threshold;
        SamplingStatus::new(
            sampled,
            vec![
                Tag::new("sampler.type", "probabilistic"),
                Tag::new("sampler.param", self.rate),
            ],
        )
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        other.as_any().downcast_ref::<ProbabilisticSampler>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct TokenBucket {
    credits: f64,
    capacity: f64,
    rate_per_second: f64,
    last_tick: Instant,
}
impl TokenBucket {
    fn new(max_traces_per_second: f64) -> Self {
        let capacity = max_traces_per_second.max(1.0);
        TokenBucket {
            credits: capacity,
            capacity,
            rate_per_second: max_traces_per_second,
            last_tick: Instant::now(),
        }
    }

    fn take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;
        self.credits = (self.credits + elapsed * self.rate_per_second).min(self.capacity);
        if self.credits >= 1.0 {
            self.credits -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Token-bucket sampler: admits at most `max_traces_per_second` traces,
/// with fractional sub-second credit carry.
#[derive(Debug)]
pub struct RateLimitingSampler {
    max_traces_per_second: f64,
    bucket: Mutex<TokenBucket>,
}
impl RateLimitingSampler {
    /// Makes a new `RateLimitingSampler` admitting up to `max_traces_per_second` traces/sec.
    pub fn new(max_traces_per_second: f64) -> Self {
        RateLimitingSampler {
            max_traces_per_second,
            bucket: Mutex::new(TokenBucket::new(max_traces_per_second)),
        }
    }

    /// Returns the configured rate.
    pub fn max_traces_per_second(&self) -> f64 {
        self.max_traces_per_second
    }
}
impl PartialEq for RateLimitingSampler {
    fn eq(&self, other: &Self) -> bool {
        self.max_traces_per_second == other.max_traces_per_second
    }
}
impl Sampler for RateLimitingSampler {
    fn sample(&self, _operation_name: &str, _trace_id: TraceId) -> SamplingStatus {
        let sampled = self.bucket.lock().expect("poisoned").take();
        SamplingStatus::new(
            sampled,
            vec![
                Tag::new("sampler.type", "ratelimiting"),
                Tag::new("sampler.param", self.max_traces_per_second),
            ],
        )
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        other.as_any().downcast_ref::<RateLimitingSampler>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Composition of a `ProbabilisticSampler` and a `RateLimitingSampler`:
/// sampled iff either votes yes. The rate-limiter's contribution is tagged
/// `sampler.type=lowerbound` here (not `ratelimiting`), since its role in
/// this composition is guaranteeing a lower-bound throughput.
#[derive(Debug)]
pub struct GuaranteedThroughputProbabilisticSampler {
    probabilistic: ProbabilisticSampler,
    rate_limiter: RateLimitingSampler,
    lower_bound: f64,
}
impl GuaranteedThroughputProbabilisticSampler {
    /// Makes a new `GuaranteedThroughputProbabilisticSampler`.
    pub fn new(lower_bound: f64, rate: f64) -> Self {
        GuaranteedThroughputProbabilisticSampler {
            probabilistic: ProbabilisticSampler::new(rate),
            rate_limiter: RateLimitingSampler::new(lower_bound),
            lower_bound,
        }
    }

    /// Returns the configured probabilistic rate.
    pub fn rate(&self) -> f64 {
        self.probabilistic.rate()
    }

    /// Returns the configured lower-bound traces-per-second.
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound
    }
}
impl PartialEq for GuaranteedThroughputProbabilisticSampler {
    fn eq(&self, other: &Self) -> bool {
        self.probabilistic == other.probabilistic && self.lower_bound == other.lower_bound
    }
}
impl Sampler for GuaranteedThroughputProbabilisticSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let prob = self.probabilistic.sample(operation_name, trace_id);
        if prob.is_sampled() {
            prob
        } else {
            let rl = self.rate_limiter.sample(operation_name, trace_id);
            SamplingStatus::new(
                rl.is_sampled(),
                vec![
                    Tag::new("sampler.type", "lowerbound"),
                    Tag::new("sampler.param", self.lower_bound),
                ],
            )
        }
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        other
            .as_any()
            .downcast_ref::<GuaranteedThroughputProbabilisticSampler>()
            == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Per-operation adaptive sampler: a default probabilistic rate, a default
/// lower bound, a capped map of per-operation `GuaranteedThroughputProbabilisticSampler`s.
#[derive(Debug)]
pub struct PerOperationSampler {
    default_lower_bound: f64,
    default_sampler: Mutex<ProbabilisticSampler>,
    max_operations: usize,
    operation_samplers: Mutex<HashMap<String, GuaranteedThroughputProbabilisticSampler>>,
}
impl PerOperationSampler {
    /// Makes a new `PerOperationSampler`.
    pub fn new(default_lower_bound: f64, default_rate: f64, max_operations: usize) -> Self {
        PerOperationSampler {
            default_lower_bound,
            default_sampler: Mutex::new(ProbabilisticSampler::new(default_rate)),
            max_operations,
            operation_samplers: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the default probabilistic rate, e.g. after a remote strategy refresh.
    pub fn set_default_rate(&self, rate: f64) {
        *self.default_sampler.lock().expect("poisoned") = ProbabilisticSampler::new(rate);
    }

    /// Installs/overwrites the per-operation strategy for `operation`.
    pub fn set_operation_strategy(&self, operation: String, rate: f64) {
        let mut map = self.operation_samplers.lock().expect("poisoned");
        if map.len() < self.max_operations || map.contains_key(&operation) {
            map.insert(
                operation,
                GuaranteedThroughputProbabilisticSampler::new(self.default_lower_bound, rate),
            );
        }
    }
}
impl Sampler for PerOperationSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        let mut map = self.operation_samplers.lock().expect("poisoned");
        if let Some(sampler) = map.get(operation_name) {
            return sampler.sample(operation_name, trace_id);
        }
        if map.len() < self.max_operations {
            let default_rate = self.default_sampler.lock().expect("poisoned").rate();
            let sampler =
                GuaranteedThroughputProbabilisticSampler::new(self.default_lower_bound, default_rate);
            let status = sampler.sample(operation_name, trace_id);
            map.insert(operation_name.to_owned(), sampler);
            status
        } else {
            drop(map);
            self.default_sampler
                .lock()
                .expect("poisoned")
                .sample(operation_name, trace_id)
        }
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        let other = match other.as_any().downcast_ref::<PerOperationSampler>() {
            Some(o) => o,
            None => return false,
        };
        if self.default_lower_bound != other.default_lower_bound
            || self.max_operations != other.max_operations
        {
            return false;
        }
        let a = self.default_sampler.lock().expect("poisoned");
        let b = other.default_sampler.lock().expect("poisoned");
        *a == *b
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Response shape of the sampling strategy endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingStrategyResponse {
    pub strategy_type: String,
    pub probabilistic_sampling: Option<ProbabilisticSamplingStrategy>,
    pub rate_limiting_sampling: Option<RateLimitingSamplingStrategy>,
    pub operation_sampling: Option<PerOperationSamplingStrategies>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbabilisticSamplingStrategy {
    pub sampling_rate: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingSamplingStrategy {
    pub max_traces_per_second: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerOperationSamplingStrategies {
    pub default_sampling_probability: f64,
    pub default_lower_bound_traces_per_second: f64,
    pub per_operation_strategies: Vec<OperationSamplingStrategy>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSamplingStrategy {
    pub operation: String,
    pub probabilistic_sampling: ProbabilisticSamplingStrategy,
}

fn sampler_from_response(resp: &SamplingStrategyResponse) -> Option<BoxSampler> {
    match resp.strategy_type.as_str() {
        "PROBABILISTIC" => resp
            .probabilistic_sampling
            .as_ref()
            .map(|p| Box::new(ProbabilisticSampler::new(p.sampling_rate)) as BoxSampler),
        "RATE_LIMITING" => resp
            .rate_limiting_sampling
            .as_ref()
            .map(|r| Box::new(RateLimitingSampler::new(r.max_traces_per_second)) as BoxSampler),
        _ => resp.operation_sampling.as_ref().map(|op| {
            let sampler = PerOperationSampler::new(
                op.default_lower_bound_traces_per_second,
                op.default_sampling_probability,
                2000,
            );
            for strategy in &op.per_operation_strategies {
                sampler.set_operation_strategy(
                    strategy.operation.clone(),
                    strategy.probabilistic_sampling.sampling_rate,
                );
            }
            Box::new(sampler) as BoxSampler
        }),
    }
}

/// Wraps an inner sampler, refreshed from a remote strategy endpoint every
/// `polling_interval` by a background thread.
pub struct RemoteSampler {
    inner: Arc<RwLock<BoxSampler>>,
    service_name: String,
    manager_host_port: String,
    close: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    poller: Option<thread::JoinHandle<()>>,
}
impl fmt::Debug for RemoteSampler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteSampler")
            .field("service_name", &self.service_name)
            .field("manager_host_port", &self.manager_host_port)
            .finish()
    }
}
impl RemoteSampler {
    /// Starts a `RemoteSampler` polling `http://<manager_host_port>/?service=<service_name>`
    /// every `polling_interval`, initially using `initial_sampler` (typically a
    /// `ProbabilisticSampler` with a conservative default rate) until the first refresh succeeds.
    pub fn new(
        service_name: String,
        manager_host_port: String,
        polling_interval: Duration,
        initial_sampler: BoxSampler,
        metrics: Arc<Metrics>,
    ) -> Self {
        let inner = Arc::new(RwLock::new(initial_sampler));
        let close = Arc::new(AtomicBool::new(false));

        let poll_inner = Arc::clone(&inner);
        let poll_close = Arc::clone(&close);
        let poll_metrics = Arc::clone(&metrics);
        let poll_service_name = service_name.clone();
        let poll_host_port = manager_host_port.clone();
        let poller = thread::Builder::new()
            .name(crate::constants::SAMPLER_POLLER_NAME.to_owned())
            .spawn(move || {
                poll_loop(
                    poll_service_name,
                    poll_host_port,
                    polling_interval,
                    poll_inner,
                    poll_close,
                    poll_metrics,
                )
            })
            .expect("failed to spawn sampler poller thread");

        RemoteSampler {
            inner,
            service_name,
            manager_host_port,
            close,
            metrics,
            poller: Some(poller),
        }
    }
}
impl Sampler for RemoteSampler {
    fn sample(&self, operation_name: &str, trace_id: TraceId) -> SamplingStatus {
        self.inner
            .read()
            .expect("poisoned")
            .sample(operation_name, trace_id)
    }

    fn close(&self) {
        self.close.store(true, Ordering::SeqCst);
        self.inner.read().expect("poisoned").close();
    }

    fn equals(&self, other: &dyn Sampler) -> bool {
        match other.as_any().downcast_ref::<RemoteSampler>() {
            Some(o) => {
                self.service_name == o.service_name
                    && self.manager_host_port == o.manager_host_port
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
impl Drop for RemoteSampler {
    fn drop(&mut self) {
        self.close.store(true, Ordering::SeqCst);
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
    }
}

fn poll_loop(
    service_name: String,
    manager_host_port: String,
    polling_interval: Duration,
    inner: Arc<RwLock<BoxSampler>>,
    close: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
) {
    let client = reqwest::blocking::Client::new();
    while !close.load(Ordering::SeqCst) {
        poll_once(&client, &service_name, &manager_host_port, &inner, &metrics);
        thread::sleep(polling_interval);
    }
}

fn poll_once(
    client: &reqwest::blocking::Client,
    service_name: &str,
    manager_host_port: &str,
    inner: &Arc<RwLock<BoxSampler>>,
    metrics: &Arc<Metrics>,
) {
    let url = format!("http://{}/", manager_host_port);
    let response = client
        .get(&url)
        .query(&[("service", service_name)])
        .send()
        .and_then(reqwest::blocking::Response::error_for_status);

    let response = match response {
        Ok(r) => r,
        Err(e) => {
            log::warn!("sampling strategy query failed: {}", e);
            metrics.sampler_query_failure.inc(1);
            return;
        }
    };

    let parsed: Result<SamplingStrategyResponse, _> = response.json();
    let strategy = match parsed {
        Ok(s) => s,
        Err(e) => {
            log::warn!("sampling strategy response parsing failed: {}", e);
            metrics.sampler_parsing_failure.inc(1);
            return;
        }
    };

    metrics.sampler_retrieved.inc(1);

    let new_sampler = match sampler_from_response(&strategy) {
        Some(s) => s,
        None => {
            log::warn!("sampling strategy response had no usable strategy: {:?}", strategy);
            metrics.sampler_parsing_failure.inc(1);
            return;
        }
    };

    let changed = {
        let current = inner.read().expect("poisoned");
        !current.equals(new_sampler.as_ref())
    };
    if changed {
        *inner.write().expect("poisoned") = new_sampler;
        metrics.sampler_updated.inc(1);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::NopMetricsFactory;

    #[test]
    fn const_sampler_decides_constantly() {
        let s = ConstSampler::new(true);
        assert!(s.sample("op", TraceId::new64()).is_sampled());
        let s = ConstSampler::new(false);
        assert!(!s.sample("op", TraceId::new64()).is_sampled());
    }

    #[test]
    fn probabilistic_sampler_zero_never_samples() {
        let s = ProbabilisticSampler::new(0.0);
        for _ in 0..1000 {
            assert!(!s.sample("op", TraceId::new64()).is_sampled());
        }
    }

    #[test]
    fn probabilistic_sampler_one_always_samples() {
        let s = ProbabilisticSampler::new(1.0);
        for _ in 0..1000 {
            assert!(s.sample("op", TraceId::new64()).is_sampled());
        }
    }

    #[test]
    fn probabilistic_sampler_converges_to_rate() {
        let rate = 0.3;
        let s = ProbabilisticSampler::new(rate);
        let trials = 200_000;
        let sampled = (0..trials)
            .filter(|_| s.sample("op", TraceId::new64()).is_sampled())
            .count();
        let empirical = sampled as f64 / trials as f64;
        assert!((empirical - rate).abs() < 0.01, "empirical={}", empirical);
    }

    #[test]
    fn rate_limiting_sampler_admits_bounded_bursts() {
        let s = RateLimitingSampler::new(5.0);
        let admitted = (0..100)
            .filter(|_| s.sample("op", TraceId::new64()).is_sampled())
            .count();
        // capacity is max(1, rate) = 5; no time has elapsed between calls, so
        // at most ~capacity spans should be admitted in the initial burst.
        assert!(admitted <= 6, "admitted={}", admitted);
    }

    #[test]
    fn guaranteed_throughput_prefers_probabilistic_tags_when_it_wins() {
        let sampler = GuaranteedThroughputProbabilisticSampler::new(1.0, 1.0);
        let status = sampler.sample("op", TraceId::new64());
        assert!(status.is_sampled());
        assert_eq!(status.tags()[0].name(), "sampler.type");
    }

    #[test]
    fn guaranteed_throughput_falls_back_to_lowerbound_tags() {
        // rate 0.0 never wins probabilistically; rate limiter (lower bound 1/s) wins the first call.
        let sampler = GuaranteedThroughputProbabilisticSampler::new(1.0, 0.0);
        let status = sampler.sample("op", TraceId::new64());
        assert!(status.is_sampled());
        assert_eq!(status.tags()[0].name(), "sampler.type");
    }

    #[test]
    fn per_operation_sampler_creates_up_to_capacity() {
        let sampler = PerOperationSampler::new(1.0, 0.5, 1);
        sampler.sample("op1", TraceId::new64());
        sampler.sample("op2", TraceId::new64());
        assert_eq!(sampler.operation_samplers.lock().unwrap().len(), 1);
    }

    #[test]
    fn sampler_equality_is_by_variant_and_params() {
        let a: BoxSampler = Box::new(ProbabilisticSampler::new(0.5));
        let b: BoxSampler = Box::new(ProbabilisticSampler::new(0.5));
        let c: BoxSampler = Box::new(ProbabilisticSampler::new(0.6));
        let d: BoxSampler = Box::new(ConstSampler::new(true));
        assert!(a.equals(b.as_ref()));
        assert!(!a.equals(c.as_ref()));
        assert!(!a.equals(d.as_ref()));
    }

    #[test]
    fn nop_metrics_factory_wires_remote_sampler_metrics() {
        let metrics = Arc::new(Metrics::new(&NopMetricsFactory));
        let _ = metrics.sampler_retrieved.as_ref();
    }
}
