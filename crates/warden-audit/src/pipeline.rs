//! The buffered audit pipeline.
//!
//! `log()` only redacts, stamps and enqueues; sink I/O happens on the
//! flush path. Each sink owns a bounded buffer and is flushed by a
//! timer, with a synchronous flush in the caller's path as the
//! back-pressure of last resort when a buffer fills up.

use crate::event::{AuditEvent, Category, Severity};
use crate::redact::redact_event;
use crate::sink::{AuditSink, SinkError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warden_core::identifiers::AgentId;

/// Default per-sink buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
/// Default flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

struct SinkSlot {
    sink: Box<dyn AuditSink>,
    buffer: Mutex<VecDeque<AuditEvent>>,
    dropped: AtomicU64,
}

impl SinkSlot {
    /// Drain and write the buffer.
    ///
    /// On a write failure, durable sinks get the unwritten tail
    /// re-queued at the head of the buffer so delivery is at-least-once
    /// and order is preserved; ephemeral sinks drop the tail.
    fn flush(&self) -> Result<(), SinkError> {
        let drained: Vec<AuditEvent> = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.drain(..).collect()
        };
        if drained.is_empty() {
            return self.sink.flush();
        }

        for (index, event) in drained.iter().enumerate() {
            if let Err(error) = self.sink.write(event) {
                if self.sink.durable() {
                    let mut buffer = self.buffer.lock().unwrap();
                    for unwritten in drained[index..].iter().rev() {
                        buffer.push_front(unwritten.clone());
                    }
                } else {
                    let lost = (drained.len() - index) as u64;
                    self.dropped.fetch_add(lost, Ordering::Relaxed);
                }
                return Err(error);
            }
        }
        self.sink.flush()
    }
}

/// Multi-sink audit pipeline with per-sink buffering.
pub struct AuditPipeline {
    slots: Vec<Arc<SinkSlot>>,
    buffer_capacity: usize,
    flush_interval: Duration,
    redact: bool,
    last_stamp: DashMap<AgentId, DateTime<Utc>>,
    closed: AtomicBool,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Builder for [`AuditPipeline`].
pub struct AuditPipelineBuilder {
    sinks: Vec<Box<dyn AuditSink>>,
    buffer_capacity: usize,
    flush_interval: Duration,
    redact: bool,
}

impl AuditPipelineBuilder {
    pub fn new() -> Self {
        Self {
            sinks: Vec::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            redact: true,
        }
    }

    pub fn sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn boxed_sink(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn redact_secrets(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn build(self) -> Arc<AuditPipeline> {
        Arc::new(AuditPipeline {
            slots: self
                .sinks
                .into_iter()
                .map(|sink| {
                    Arc::new(SinkSlot {
                        sink,
                        buffer: Mutex::new(VecDeque::new()),
                        dropped: AtomicU64::new(0),
                    })
                })
                .collect(),
            buffer_capacity: self.buffer_capacity,
            flush_interval: self.flush_interval,
            redact: self.redact,
            last_stamp: DashMap::new(),
            closed: AtomicBool::new(false),
            flush_task: Mutex::new(None),
        })
    }
}

impl Default for AuditPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditPipeline {
    pub fn builder() -> AuditPipelineBuilder {
        AuditPipelineBuilder::new()
    }

    /// Spawn the periodic flush task on the current tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(pipeline.flush_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if pipeline.closed.load(Ordering::SeqCst) {
                    break;
                }
                pipeline.flush();
            }
        });
        *self.flush_task.lock().unwrap() = Some(handle);
    }

    /// Enqueue an event. Never blocks on sink I/O; the only synchronous
    /// work is a last-resort flush when a buffer is already full.
    pub fn log(&self, mut event: AuditEvent) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(event_id = %event.id, "Audit event after close; dropping");
            return;
        }
        if self.redact {
            redact_event(&mut event);
        }
        self.stamp_monotonic(&mut event);

        for slot in &self.slots {
            let needs_flush = {
                let mut buffer = slot.buffer.lock().unwrap();
                buffer.push_back(event.clone());
                buffer.len() >= self.buffer_capacity
            };
            if needs_flush {
                if let Err(error) = slot.flush() {
                    self.report_sink_error(slot.sink.name(), &error);
                }
            }
        }
    }

    /// Timestamps are monotonic per agent within one runtime instance;
    /// colliding stamps are nudged forward by a microsecond.
    fn stamp_monotonic(&self, event: &mut AuditEvent) {
        let Some(agent_id) = event.agent_id.clone() else {
            return;
        };
        let mut last = self
            .last_stamp
            .entry(agent_id)
            .or_insert(DateTime::<Utc>::MIN_UTC);
        if event.timestamp <= *last {
            event.timestamp = *last + ChronoDuration::microseconds(1);
        }
        *last = event.timestamp;
    }

    /// Flush every sink's buffer now. Sink errors are reported to the
    /// remaining sinks, never to the caller.
    pub fn flush(&self) {
        for slot in &self.slots {
            if let Err(error) = slot.flush() {
                self.report_sink_error(slot.sink.name(), &error);
            }
        }
    }

    fn report_sink_error(&self, failed_sink: &str, error: &SinkError) {
        tracing::error!(sink = failed_sink, error = %error, "Audit sink failure");
        let event = AuditEvent::new(
            Category::Error,
            Severity::Error,
            format!("audit sink '{failed_sink}' failed: {error}"),
        )
        .with_tag("sink");
        for slot in &self.slots {
            if slot.sink.name() == failed_sink {
                continue;
            }
            // Enqueue only; the failing path must not cascade into
            // synchronous flushes of healthy sinks.
            slot.buffer.lock().unwrap().push_back(event.clone());
        }
    }

    /// Flush what can be flushed, then close every sink. Events still
    /// buffered after the final flush attempt are dropped, with a
    /// critical notice delivered to the sinks that remain writable.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.flush_task.lock().unwrap().take() {
            handle.abort();
        }

        self.flush();

        let mut lost_total = 0u64;
        for slot in &self.slots {
            let remaining = slot.buffer.lock().unwrap().len() as u64;
            let dropped = slot.dropped.swap(0, Ordering::Relaxed);
            lost_total += remaining + dropped;
        }
        if lost_total > 0 {
            let notice = AuditEvent::new(
                Category::Error,
                Severity::Critical,
                format!("{lost_total} audit events dropped at shutdown"),
            )
            .with_tag("shutdown");
            for slot in &self.slots {
                if slot.buffer.lock().unwrap().is_empty() {
                    let _ = slot.sink.write(&notice);
                }
            }
        }

        for slot in &self.slots {
            if let Err(error) = slot.sink.close() {
                tracing::error!(sink = slot.sink.name(), error = %error, "Audit sink close failed");
            }
        }
        tracing::debug!("Audit pipeline closed");
    }

    /// Events dropped so far by ephemeral sinks, for diagnostics.
    pub fn dropped_events(&self) -> u64 {
        self.slots
            .iter()
            .map(|slot| slot.dropped.load(Ordering::Relaxed))
            .sum()
    }
}

impl Drop for AuditPipeline {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.flush();
        }
    }
}
