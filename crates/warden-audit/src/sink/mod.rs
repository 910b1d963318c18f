//! Audit sinks: destinations for buffered event delivery.

mod console;
mod file;
mod memory;
mod sqlite;

pub use console::ConsoleSink;
pub use file::FileSink;
pub use memory::MemorySink;
pub use sqlite::SqliteSink;

use crate::event::AuditEvent;

/// Errors a sink can raise. Never propagated to `log()` callers; the
/// pipeline reports them to the remaining sinks instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("I/O failure in sink '{sink}': {details}")]
    Io { sink: String, details: String },

    #[error("serialization failure in sink '{sink}': {details}")]
    Serialization { sink: String, details: String },

    #[error("backend failure in sink '{sink}': {details}")]
    Backend { sink: String, details: String },

    #[error("sink '{sink}' is closed")]
    Closed { sink: String },
}

/// A destination for audit events.
///
/// `write` is called from the pipeline's flush path, one event at a
/// time, in buffer order. Durable sinks must make a failed `write`
/// repeatable: the pipeline re-queues the event and everything after
/// it at the head of the buffer (at-least-once delivery).
pub trait AuditSink: Send + Sync {
    fn name(&self) -> &str;

    fn write(&self, event: &AuditEvent) -> Result<(), SinkError>;

    /// Push any internal buffering down to the medium.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release resources; subsequent writes may fail with `Closed`.
    fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Durable sinks get at-least-once redelivery; ephemeral sinks may
    /// drop events once their buffer exceeds the pipeline's cap.
    fn durable(&self) -> bool {
        false
    }
}
