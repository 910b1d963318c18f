//! Console sink: emits events through `tracing`.

use super::{AuditSink, SinkError};
use crate::event::{AuditEvent, Severity};

/// Ephemeral sink writing structured `tracing` records under the
/// `warden_audit` target.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let agent_id = event
            .agent_id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or("-");
        match event.severity {
            Severity::Critical | Severity::Error => tracing::error!(
                target: "warden_audit",
                event_id = %event.id,
                category = %event.category,
                agent_id = %agent_id,
                outcome = %event.outcome,
                "{}",
                event.message
            ),
            Severity::Warn => tracing::warn!(
                target: "warden_audit",
                event_id = %event.id,
                category = %event.category,
                agent_id = %agent_id,
                outcome = %event.outcome,
                "{}",
                event.message
            ),
            Severity::Info => tracing::info!(
                target: "warden_audit",
                event_id = %event.id,
                category = %event.category,
                agent_id = %agent_id,
                outcome = %event.outcome,
                "{}",
                event.message
            ),
            Severity::Debug => tracing::debug!(
                target: "warden_audit",
                event_id = %event.id,
                category = %event.category,
                agent_id = %agent_id,
                outcome = %event.outcome,
                "{}",
                event.message
            ),
        }
        Ok(())
    }
}
