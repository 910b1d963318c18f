//! Agent manifests: the immutable installation-time description of an
//! agent.

use crate::capability::CapabilitySet;
use crate::identifiers::AgentId;
use serde::{Deserialize, Serialize};

/// How much autonomy an agent is trusted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    /// Runs without human oversight; policy `approve` decisions still
    /// apply.
    Autonomous,
    /// Runs with periodic review.
    SemiAutonomous,
    /// Every approve-class action requires a human.
    Supervised,
}

/// Per-agent admission limits, consumed by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLimits {
    /// Hard cap on tokens for a single LLM request.
    pub max_tokens_per_request: u32,
    pub requests_per_minute: u32,
    pub tool_calls_per_minute: u32,
    pub tokens_per_minute: u32,
    /// Spend ceiling per minute, in micro-dollars.
    pub cost_per_minute_micros: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_tokens_per_request: 8_192,
            requests_per_minute: 60,
            tool_calls_per_minute: 120,
            tokens_per_minute: 100_000,
            cost_per_minute_micros: 1_000_000,
        }
    }
}

/// Immutable, versioned agent definition. One manifest per install;
/// re-installing a new version replaces the whole value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentManifest {
    pub id: AgentId,
    pub name: String,
    pub version: String,
    /// Framework-specific entry point (module path, graph file, ...).
    pub entry_point: String,
    /// Capabilities the agent needs granted before it can start.
    pub required_permissions: CapabilitySet,
    pub trust_level: TrustLevel,
    #[serde(default)]
    pub limits: AgentLimits,
}

impl AgentManifest {
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            version: "0.1.0".to_string(),
            entry_point: String::new(),
            required_permissions: CapabilitySet::new(),
            trust_level: TrustLevel::Supervised,
            limits: AgentLimits::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    pub fn with_permissions(mut self, permissions: CapabilitySet) -> Self {
        self.required_permissions = permissions;
        self
    }

    pub fn with_trust_level(mut self, trust_level: TrustLevel) -> Self {
        self.trust_level = trust_level;
        self
    }

    pub fn with_limits(mut self, limits: AgentLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;

    #[test]
    fn manifest_builder_defaults() {
        let manifest = AgentManifest::new(AgentId::new_unchecked("a"), "researcher");
        assert_eq!(manifest.trust_level, TrustLevel::Supervised);
        assert!(manifest.required_permissions.is_empty());
        assert_eq!(manifest.limits.requests_per_minute, 60);
    }

    #[test]
    fn manifest_serde_roundtrip() {
        let manifest = AgentManifest::new(AgentId::new_unchecked("a"), "researcher")
            .with_version("1.2.0")
            .with_permissions([Capability::LlmChat, Capability::FileRead].into())
            .with_trust_level(TrustLevel::Autonomous);
        let json = serde_json::to_string(&manifest).unwrap();
        let back: AgentManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, back);
    }
}
