//! Thrift struct definitions needed to encode spans as `jaeger.thrift` over
//! `agent.thrift`'s `emitBatch` message.
pub mod agent;
pub mod jaeger;
