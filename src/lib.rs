//! Core sampling, propagation and reporting machinery for a Jaeger-compatible
//! distributed tracing client.
//!
//! # Examples
//!
//! ```
//! use jaeger_tracer_core::reporter::InMemoryReporter;
//! use jaeger_tracer_core::sampler::ConstSampler;
//! use jaeger_tracer_core::tracer::TracerBuilder;
//!
//! let reporter = InMemoryReporter::new();
//! let tracer = TracerBuilder::new(
//!     "sample_service",
//!     Box::new(ConstSampler::new(true)),
//!     Box::new(reporter.clone()),
//! )
//! .build();
//!
//! {
//!     let span = tracer.span("sample_op").start();
//!     // Do something
//! } // The dropped span is handed to the reporter.
//!
//! let spans = reporter.spans();
//! assert_eq!(spans[0].operation_name(), "sample_op");
//! ```

#![warn(missing_docs)]
#[macro_use]
extern crate trackable;

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::span::Span;
pub use crate::tracer::Tracer;

pub mod clock;
pub mod jaeger_sender;
pub mod metrics;
pub mod propagation;
pub mod reporter;
pub mod sampler;
pub mod span;
pub mod tag;
pub mod tracer;

mod constants;
mod error;
mod thrift;

#[cfg(test)]
mod tests {
    use crate::reporter::InMemoryReporter;
    use crate::sampler::ConstSampler;
    use crate::tag::Tag;
    use crate::tracer::TracerBuilder;

    #[test]
    fn it_works() {
        let reporter = InMemoryReporter::new();
        let tracer = TracerBuilder::new(
            "sample_service",
            Box::new(ConstSampler::new(true)),
            Box::new(reporter.clone()),
        )
        .with_tag(Tag::new("foo", "bar"))
        .build();
        {
            let _span = tracer.span("it_works").start();
            // do something
        }
        let spans = reporter.spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].operation_name(), "it_works");
    }
}
