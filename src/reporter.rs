//! Span reporting: hands finished, sampled spans off to a `Sender`,
//! off the caller's thread.
//!
//! # References
//!
//! - [reporter.go](https://github.com/uber/jaeger-client-go/tree/v2.9.0/reporter.go)
use crossbeam_channel::{bounded, Sender as ChannelSender};
use log;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::constants;
use crate::metrics::Metrics;
use crate::span::{FinishedSpan, SpanSink};

/// Delivers a batch of finished spans somewhere (a UDP agent, an in-memory
/// buffer, stdout...). The wire encoding and transport are a collaborator's
/// concern, not the reporter's.
pub trait Sender: fmt::Debug + Send {
    /// Buffers or transmits `span`. Returns the number of spans flushed as a
    /// side effect of this call (0 if the sender buffers internally).
    fn append(&mut self, span: FinishedSpan) -> Result<usize, SenderError>;

    /// Transmits any buffered spans. Returns the number of spans flushed.
    fn flush(&mut self) -> Result<usize, SenderError>;

    /// Releases any held resources (sockets, connections). Returns the
    /// number of spans flushed as a side effect of closing, if any.
    fn close(&mut self) -> Result<usize, SenderError> {
        Ok(0)
    }
}

/// An error raised by a `Sender`.
#[derive(Debug)]
pub struct SenderError {
    message: String,
    dropped_span_count: usize,
}
impl SenderError {
    /// Makes a new `SenderError`. `dropped_span_count` is how many
    /// already-buffered spans were discarded as a result of this failure.
    pub fn new(message: impl Into<String>, dropped_span_count: usize) -> Self {
        SenderError {
            message: message.into(),
            dropped_span_count,
        }
    }

    /// Returns how many spans were dropped because of this failure.
    pub fn dropped_span_count(&self) -> usize {
        self.dropped_span_count
    }
}
impl fmt::Display for SenderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
impl std::error::Error for SenderError {}

/// Receives finished spans from `Tracer`/`Span` and disposes of them.
///
/// Implementations must be safe to call concurrently from many threads
/// without external synchronization: `Span::finish` may run on any thread.
pub trait Reporter: fmt::Debug + Send + Sync {
    /// Disposes of a finished, sampled span.
    fn report(&self, span: FinishedSpan);

    /// Flushes and releases any resources held by this reporter.
    fn close(&self);
}

/// Receives finished spans and does nothing with them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;
impl Reporter for NoopReporter {
    fn report(&self, _span: FinishedSpan) {}

    fn close(&self) {}
}

/// A `Reporter` that appends every finished span to an in-memory buffer.
/// Intended for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryReporter {
    spans: Arc<Mutex<Vec<FinishedSpan>>>,
}
impl InMemoryReporter {
    /// Makes a new, empty `InMemoryReporter`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all spans reported so far.
    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans.lock().expect("poisoned").clone()
    }
}
impl Reporter for InMemoryReporter {
    fn report(&self, span: FinishedSpan) {
        self.spans.lock().expect("poisoned").push(span);
    }

    fn close(&self) {}
}

/// Logs each finished span's operation name at `debug` level. Useful layered
/// in front of another `Reporter` during development.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingReporter;
impl Reporter for LoggingReporter {
    fn report(&self, span: FinishedSpan) {
        log::debug!(
            "reporting span: operation={} trace_id={} span_id={:x}",
            span.operation_name(),
            span.context().trace_id(),
            span.context().span_id()
        );
    }

    fn close(&self) {}
}

/// Forwards every finished span to each of its inner reporters, in order.
#[derive(Debug)]
pub struct CompositeReporter {
    reporters: Vec<Box<dyn Reporter>>,
}
impl CompositeReporter {
    /// Makes a new `CompositeReporter` wrapping `reporters`.
    pub fn new(reporters: Vec<Box<dyn Reporter>>) -> Self {
        CompositeReporter { reporters }
    }
}
impl Reporter for CompositeReporter {
    fn report(&self, span: FinishedSpan) {
        for reporter in &self.reporters {
            reporter.report(span.clone());
        }
    }

    fn close(&self) {
        for reporter in &self.reporters {
            reporter.close();
        }
    }
}

enum Command {
    Append(FinishedSpan),
    Flush,
    Close,
}

/// Reporter backed by a bounded queue and a dedicated worker thread: callers
/// never block on `Sender::append`.
///
/// If the queue is full, the span is dropped and `reporter_dropped` is
/// incremented rather than blocking the caller's thread.
pub struct RemoteReporter {
    commands: ChannelSender<Command>,
    metrics: Arc<Metrics>,
    worker: Option<thread::JoinHandle<()>>,
    flush_timer: Option<thread::JoinHandle<()>>,
    flush_stop: Arc<AtomicBool>,
}
impl fmt::Debug for RemoteReporter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RemoteReporter").finish()
    }
}
impl RemoteReporter {
    /// Starts a `RemoteReporter` with a queue of `queue_capacity` spans,
    /// draining to `sender` on a worker thread and auto-flushing every
    /// `flush_interval`.
    pub fn new(
        mut sender: Box<dyn Sender>,
        queue_capacity: usize,
        flush_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (tx, rx) = bounded::<Command>(queue_capacity);

        let worker_metrics = Arc::clone(&metrics);
        let worker = thread::Builder::new()
            .name(crate::constants::REPORTER_QUEUE_PROCESSOR_NAME.to_owned())
            .spawn(move || {
                let mut failing_streak = 0u32;
                loop {
                    match rx.recv() {
                        Ok(Command::Append(span)) => {
                            match sender.append(span) {
                                Ok(flushed) => {
                                    if failing_streak > 0 {
                                        log::info!(
                                            "jaeger sender recovered after {} failures",
                                            failing_streak
                                        );
                                    }
                                    failing_streak = 0;
                                    worker_metrics.reporter_success.inc(flushed as i64);
                                }
                                Err(e) => {
                                    worker_metrics.reporter_failure.inc(e.dropped_span_count() as i64);
                                    log_send_failure(&mut failing_streak, &e);
                                }
                            }
                            worker_metrics.reporter_queue_length.update(rx.len() as i64);
                        }
                        Ok(Command::Flush) => {
                            match sender.flush() {
                                Ok(flushed) => {
                                    failing_streak = 0;
                                    worker_metrics.reporter_success.inc(flushed as i64);
                                }
                                Err(e) => {
                                    worker_metrics.reporter_failure.inc(e.dropped_span_count() as i64);
                                    log_send_failure(&mut failing_streak, &e);
                                }
                            }
                            worker_metrics.reporter_queue_length.update(rx.len() as i64);
                        }
                        Ok(Command::Close) => {
                            match sender.flush() {
                                Ok(flushed) => worker_metrics.reporter_success.inc(flushed as i64),
                                Err(e) => {
                                    worker_metrics.reporter_failure.inc(e.dropped_span_count() as i64);
                                    log_send_failure(&mut failing_streak, &e);
                                }
                            }
                            match sender.close() {
                                Ok(flushed) => worker_metrics.reporter_success.inc(flushed as i64),
                                Err(e) => {
                                    worker_metrics.reporter_failure.inc(e.dropped_span_count() as i64);
                                    log_send_failure(&mut failing_streak, &e);
                                }
                            }
                            worker_metrics.reporter_queue_length.update(0);
                            break;
                        }
                        Err(_) => break,
                    }
                }
            })
            .expect("failed to spawn reporter worker thread");

        let flush_stop = Arc::new(AtomicBool::new(false));
        let flush_tx = tx.clone();
        let timer_stop = Arc::clone(&flush_stop);
        let flush_timer = thread::Builder::new()
            .name(crate::constants::REPORTER_FLUSH_TIMER_NAME.to_owned())
            .spawn(move || {
                while !timer_stop.load(Ordering::SeqCst) {
                    thread::sleep(flush_interval);
                    if timer_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let _ = flush_tx.send(Command::Flush);
                }
            })
            .expect("failed to spawn reporter flush timer thread");

        RemoteReporter {
            commands: tx,
            metrics,
            worker: Some(worker),
            flush_timer: Some(flush_timer),
            flush_stop,
        }
    }
}
impl Reporter for RemoteReporter {
    fn report(&self, span: FinishedSpan) {
        if self.commands.try_send(Command::Append(span)).is_err() {
            log::warn!("reporter queue full, dropping span");
            self.metrics.reporter_dropped.inc(1);
        }
    }

    fn close(&self) {
        self.flush_stop.store(true, Ordering::SeqCst);
        if self
            .commands
            .send_timeout(
                Command::Close,
                Duration::from_millis(constants::DEFAULT_CLOSE_ENQUEUE_TIMEOUT_MILLIS),
            )
            .is_err()
        {
            log::warn!("timed out enqueueing reporter close command, queue is full");
        }
    }
}
impl Drop for RemoteReporter {
    fn drop(&mut self) {
        self.flush_stop.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Close);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.flush_timer.take() {
            let _ = handle.join();
        }
    }
}

fn log_send_failure(failing_streak: &mut u32, error: &SenderError) {
    *failing_streak += 1;
    // Only the first failure of a new streak is logged at warn level, so a
    // flaky agent doesn't flood logs (mirrors jaeger-client-go's reporter).
    if *failing_streak == 1 {
        log::warn!(
            "failed to report {} span(s): {}",
            error.dropped_span_count(),
            error
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metrics::NopMetricsFactory;
    use crate::span::{new_span_id, Span, SpanContext, TraceId, FLAG_SAMPLED};
    use std::borrow::Cow;
    use std::sync::atomic::AtomicUsize;

    fn finish_one_span(sink: Arc<dyn SpanSink>) {
        let ctx = SpanContext::root(TraceId::new64(), new_span_id(), FLAG_SAMPLED);
        let span = Span::new(sink, Cow::Borrowed("op"), ctx, Vec::new(), 1_000, None, Vec::new());
        span.finish(2_000, None);
    }

    #[derive(Debug, Default)]
    struct CountingSender {
        appended: Arc<AtomicUsize>,
    }
    impl Sender for CountingSender {
        fn append(&mut self, _span: FinishedSpan) -> Result<usize, SenderError> {
            self.appended.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        fn flush(&mut self) -> Result<usize, SenderError> {
            Ok(0)
        }
    }

    #[test]
    fn noop_reporter_accepts_anything() {
        let reporter: Arc<dyn Reporter> = Arc::new(NoopReporter);
        finish_one_span(Arc::new(ReporterSink(Arc::clone(&reporter))));
        reporter.close();
    }

    #[test]
    fn in_memory_reporter_records_spans() {
        let reporter = Arc::new(InMemoryReporter::new());
        finish_one_span(Arc::new(ReporterSink(reporter.clone() as Arc<dyn Reporter>)));
        assert_eq!(reporter.spans().len(), 1);
    }

    #[test]
    fn composite_reporter_forwards_to_all() {
        let a = InMemoryReporter::new();
        let b = InMemoryReporter::new();
        let composite: Arc<dyn Reporter> =
            Arc::new(CompositeReporter::new(vec![Box::new(a.clone()), Box::new(b.clone())]));
        finish_one_span(Arc::new(ReporterSink(composite)));
        assert_eq!(a.spans().len(), 1);
        assert_eq!(b.spans().len(), 1);
    }

    #[test]
    fn remote_reporter_drains_queue_through_sender() {
        let appended = Arc::new(AtomicUsize::new(0));
        let sender = CountingSender {
            appended: Arc::clone(&appended),
        };
        let metrics = Arc::new(Metrics::new(&NopMetricsFactory));
        let reporter = Arc::new(RemoteReporter::new(
            Box::new(sender),
            16,
            Duration::from_secs(3600),
            metrics,
        ));
        finish_one_span(Arc::new(ReporterSink(reporter.clone() as Arc<dyn Reporter>)));
        finish_one_span(Arc::new(ReporterSink(reporter.clone() as Arc<dyn Reporter>)));
        reporter.close();
        drop(reporter);
        assert_eq!(appended.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn remote_reporter_drops_when_queue_full() {
        let appended = Arc::new(AtomicUsize::new(0));
        let sender = CountingSender {
            appended: Arc::clone(&appended),
        };
        let metrics = Arc::new(Metrics::new(&NopMetricsFactory));
        let reporter = Arc::new(RemoteReporter::new(Box::new(sender), 1, Duration::from_secs(3600), metrics));
        for _ in 0..5 {
            finish_one_span(Arc::new(ReporterSink(reporter.clone() as Arc<dyn Reporter>)));
        }
        drop(reporter);
    }

    #[derive(Debug)]
    struct ReporterSink(Arc<dyn Reporter>);
    impl SpanSink for ReporterSink {
        fn report(&self, span: FinishedSpan) {
            self.0.report(span);
        }
    }
}
