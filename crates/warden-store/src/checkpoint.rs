//! Versioned agent checkpoints and their migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use warden_core::context::{AgentContext, ResourceUsage};
use warden_core::error::StoreError;
use warden_core::identifiers::AgentId;
use warden_core::lifecycle::{AgentState, StateTransition};
use warden_core::manifest::AgentManifest;
use warden_core::sandbox::CapabilityGrant;

/// The checkpoint format version written by this build.
pub const CHECKPOINT_VERSION: u32 = 3;

/// A snapshot sufficient to recover an agent's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub version: u32,
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub state: AgentState,
    pub state_history: Vec<StateTransition>,
    pub usage: ResourceUsage,
    pub manifest: AgentManifest,
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub parent_id: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityGrant>,
    #[serde(default)]
    pub custom_data: Option<serde_json::Value>,
}

impl AgentCheckpoint {
    /// Snapshot a context together with its history and grants.
    pub fn capture(
        context: &AgentContext,
        state_history: Vec<StateTransition>,
        capabilities: Vec<CapabilityGrant>,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            agent_id: context.agent_id.clone(),
            timestamp: Utc::now(),
            state: context.state,
            state_history,
            usage: context.usage.clone(),
            manifest: context.manifest.clone(),
            env: context.env.clone(),
            parent_id: context.parent_id.clone(),
            created_at: context.created_at,
            capabilities,
            custom_data: None,
        }
    }

    /// Rebuild a context from this checkpoint.
    pub fn restore_context(&self) -> AgentContext {
        AgentContext {
            agent_id: self.agent_id.clone(),
            parent_id: self.parent_id.clone(),
            manifest: self.manifest.clone(),
            state: self.state,
            usage: self.usage.clone(),
            env: self.env.clone(),
            created_at: self.created_at,
        }
    }
}

/// Upgrade a raw checkpoint document to the current version.
///
/// Migrations are monotonic and idempotent: each step raises `version`
/// by one and re-running the chain on an already-current document is a
/// no-op. Documents from a newer build fail with `VersionTooNew`.
pub fn migrate(mut document: serde_json::Value) -> Result<AgentCheckpoint, StoreError> {
    let version = document
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| StoreError::Corrupt {
            id: checkpoint_id(&document),
            details: "missing checkpoint version".to_string(),
        })? as u32;

    if version > CHECKPOINT_VERSION {
        return Err(StoreError::VersionTooNew {
            found: version,
            supported: CHECKPOINT_VERSION,
        });
    }

    let mut current = version;
    while current < CHECKPOINT_VERSION {
        document = match current {
            1 => migrate_v1_to_v2(document),
            2 => migrate_v2_to_v3(document),
            _ => {
                return Err(StoreError::Corrupt {
                    id: checkpoint_id(&document),
                    details: format!("no migration from version {current}"),
                });
            }
        };
        current += 1;
        if let Some(slot) = document.get_mut("version") {
            *slot = serde_json::json!(current);
        }
    }

    serde_json::from_value(document).map_err(|e| StoreError::Serialization {
        details: format!("checkpoint decode failed: {e}"),
    })
}

fn checkpoint_id(document: &serde_json::Value) -> String {
    document
        .get("agent_id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<unknown>")
        .to_string()
}

/// v1 predates capability snapshots: grants were rebuilt from the
/// manifest on recovery. An empty list preserves that behavior.
fn migrate_v1_to_v2(mut document: serde_json::Value) -> serde_json::Value {
    if let Some(object) = document.as_object_mut() {
        object
            .entry("capabilities")
            .or_insert_with(|| serde_json::json!([]));
    }
    document
}

/// v2 predates per-minute usage accounting.
fn migrate_v2_to_v3(mut document: serde_json::Value) -> serde_json::Value {
    if let Some(usage) = document.get_mut("usage").and_then(serde_json::Value::as_object_mut) {
        usage
            .entry("minute_window_start")
            .or_insert_with(|| serde_json::json!(Utc::now()));
        usage
            .entry("requests_this_minute")
            .or_insert_with(|| serde_json::json!(0));
        usage
            .entry("tool_calls_this_minute")
            .or_insert_with(|| serde_json::json!(0));
        usage
            .entry("tokens_this_minute")
            .or_insert_with(|| serde_json::json!(0));
    }
    document
}
