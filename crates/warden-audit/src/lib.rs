//! # Warden Audit
//!
//! The audit pipeline: every lifecycle change, permission check, policy
//! decision, resource event and error is recorded into one or more
//! sinks with buffered, ordered, at-least-once delivery.

pub mod event;
pub mod pipeline;
pub mod redact;
pub mod sink;

pub use event::{AuditEvent, AuditRecord, Category, Outcome, Severity};
pub use pipeline::{
    AuditPipeline, AuditPipelineBuilder, DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_INTERVAL,
};
pub use sink::{AuditSink, ConsoleSink, FileSink, MemorySink, SinkError, SqliteSink};
