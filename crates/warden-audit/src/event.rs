//! Audit events and their database record projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use warden_core::identifiers::{AgentId, TraceId};

/// Severity of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What part of the runtime produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Lifecycle,
    State,
    Permission,
    Resource,
    Security,
    Communication,
    Tool,
    Error,
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Lifecycle => "lifecycle",
            Category::State => "state",
            Category::Permission => "permission",
            Category::Resource => "resource",
            Category::Security => "security",
            Category::Communication => "communication",
            Category::Tool => "tool",
            Category::Error => "error",
            Category::System => "system",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the recorded action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
    Blocked,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Denied => "denied",
            Outcome::Blocked => "blocked",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audited decision or occurrence.
///
/// Ids are unique; timestamps are monotonic per agent within a single
/// runtime instance (the pipeline bumps colliding stamps on enqueue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    #[serde(default)]
    pub trace_id: Option<TraceId>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Outcome::default_success")]
    pub outcome: Outcome,
}

impl Outcome {
    fn default_success() -> Self {
        Outcome::Success
    }
}

impl AuditEvent {
    pub fn new(category: Category, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            category,
            message: message.into(),
            agent_id: None,
            trace_id: None,
            actor: None,
            data: serde_json::Value::Null,
            tags: Vec::new(),
            outcome: Outcome::Success,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_trace(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Project to the flat shape durable database sinks store.
    pub fn to_record(&self) -> AuditRecord {
        let action = match self.tags.first() {
            Some(sub) => format!("{}.{}", self.category, sub),
            None => self.category.to_string(),
        };
        let (resource_type, resource_id) = match &self.agent_id {
            Some(agent_id) => ("agent".to_string(), agent_id.to_string()),
            None => ("runtime".to_string(), "-".to_string()),
        };
        AuditRecord {
            id: self.id,
            action,
            resource_type,
            resource_id,
            actor_id: self.actor.clone().unwrap_or_else(|| "system".to_string()),
            details: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
            outcome: self.outcome,
            created_at: self.timestamp,
        }
    }
}

/// The `audit_log` row shape: `(action, resource_type, resource_id,
/// actor_id, details, outcome)` plus id and timestamp. `details`
/// preserves the full original event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub actor_id: String,
    pub details: serde_json::Value,
    pub outcome: Outcome,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_projection_builds_dotted_action() {
        let event = AuditEvent::new(Category::Permission, Severity::Warn, "file read blocked")
            .with_agent(AgentId::new_unchecked("a"))
            .with_tag("file.read")
            .with_outcome(Outcome::Blocked);
        let record = event.to_record();
        assert_eq!(record.action, "permission.file.read");
        assert_eq!(record.resource_type, "agent");
        assert_eq!(record.resource_id, "a");
        assert_eq!(record.actor_id, "system");
        assert_eq!(record.outcome, Outcome::Blocked);
        // The full event survives in details.
        let embedded: AuditEvent = serde_json::from_value(record.details).unwrap();
        assert_eq!(embedded.id, event.id);
    }

    #[test]
    fn runtime_events_have_placeholder_resource() {
        let record = AuditEvent::new(Category::System, Severity::Info, "startup").to_record();
        assert_eq!(record.resource_type, "runtime");
        assert_eq!(record.resource_id, "-");
        assert_eq!(record.action, "system");
    }

    #[test]
    fn event_ids_are_unique() {
        let a = AuditEvent::new(Category::System, Severity::Info, "x");
        let b = AuditEvent::new(Category::System, Severity::Info, "x");
        assert_ne!(a.id, b.id);
    }
}
