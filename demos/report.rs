#[macro_use]
extern crate trackable;

use jaeger_tracer_core::jaeger_sender::{Encoding, JaegerThriftSender};
use jaeger_tracer_core::reporter::RemoteReporter;
use jaeger_tracer_core::sampler::ConstSampler;
use jaeger_tracer_core::tag::Tag;
use jaeger_tracer_core::tracer::TracerBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

fn now_micros() -> i64 {
    UNIX_EPOCH.elapsed().unwrap_or_default().as_micros() as i64
}

fn main() -> trackable::result::MainResult {
    let agent_addr: SocketAddr = "127.0.0.1:6831".parse().unwrap();
    let mut sender = track!(JaegerThriftSender::new("example", agent_addr, Encoding::Compact))?;
    sender.add_process_tag(Tag::new("hello", "world"));

    let metrics = Arc::new(jaeger_tracer_core::metrics::Metrics::new(
        &jaeger_tracer_core::metrics::NopMetricsFactory,
    ));
    let reporter = RemoteReporter::new(Box::new(sender), 10, Duration::from_secs(1), metrics);

    let tracer = TracerBuilder::new("example", Box::new(ConstSampler::new(true)), Box::new(reporter)).build();
    {
        let span0 = tracer.span("main").start();
        thread::sleep(Duration::from_millis(10));
        {
            let mut span1 = tracer
                .span("sub")
                .child_of(&span0.context())
                .tag(Tag::new("foo", "bar"))
                .start();
            span1.log(now_micros(), |log| {
                log.error().message("something wrong");
            });
            thread::sleep(Duration::from_millis(10));
        }
    }

    tracer.close();
    Ok(())
}
