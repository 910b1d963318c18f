//! In-memory sink, for tests and live inspection.

use super::{AuditSink, SinkError};
use crate::event::AuditEvent;
use std::sync::Mutex;

const DEFAULT_RETAIN: usize = 10_000;

/// Ephemeral sink retaining the most recent events in memory.
///
/// Once `retain` is exceeded the oldest events are dropped; this is the
/// documented drop cap allowed for ephemeral sinks.
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
    retain: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_retain(DEFAULT_RETAIN)
    }

    pub fn with_retain(retain: usize) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            retain: retain.max(1),
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let mut events = self.events.lock().unwrap();
        events.push(event.clone());
        if events.len() > self.retain {
            let overflow = events.len() - self.retain;
            events.drain(..overflow);
        }
        Ok(())
    }
}
