//! The closed capability vocabulary.
//!
//! Capabilities are coarse-grained authorization labels. The set is
//! fixed at compile time; wire names outside it are rejected at parse
//! time rather than silently carried along.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A capability an agent may hold a grant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Capability {
    LlmChat,
    LlmStream,
    FileRead,
    FileWrite,
    FileDelete,
    NetworkHttp,
    NetworkWebsocket,
    ShellExecute,
    MemoryRead,
    MemoryWrite,
    AgentCommunicate,
    ToolMcp,
}

/// Error for capability wire names outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability '{name}'")]
pub struct CapabilityParseError {
    pub name: String,
}

impl Capability {
    /// Every member of the closed set, in wire-name order.
    pub const ALL: [Capability; 12] = [
        Capability::LlmChat,
        Capability::LlmStream,
        Capability::FileRead,
        Capability::FileWrite,
        Capability::FileDelete,
        Capability::NetworkHttp,
        Capability::NetworkWebsocket,
        Capability::ShellExecute,
        Capability::MemoryRead,
        Capability::MemoryWrite,
        Capability::AgentCommunicate,
        Capability::ToolMcp,
    ];

    /// The namespaced wire name, e.g. `file:read`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Capability::LlmChat => "llm:chat",
            Capability::LlmStream => "llm:stream",
            Capability::FileRead => "file:read",
            Capability::FileWrite => "file:write",
            Capability::FileDelete => "file:delete",
            Capability::NetworkHttp => "network:http",
            Capability::NetworkWebsocket => "network:websocket",
            Capability::ShellExecute => "shell:execute",
            Capability::MemoryRead => "memory:read",
            Capability::MemoryWrite => "memory:write",
            Capability::AgentCommunicate => "agent:communicate",
            Capability::ToolMcp => "tool:mcp",
        }
    }

    /// Parse a wire name, rejecting anything outside the closed set.
    pub fn parse(name: &str) -> Result<Self, CapabilityParseError> {
        Capability::ALL
            .iter()
            .find(|c| c.wire_name() == name)
            .copied()
            .ok_or_else(|| CapabilityParseError {
                name: name.to_string(),
            })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

impl FromStr for Capability {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Capability> for String {
    fn from(capability: Capability) -> Self {
        capability.wire_name().to_string()
    }
}

impl TryFrom<String> for Capability {
    type Error = CapabilityParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

/// An ordered set of capabilities.
pub type CapabilitySet = BTreeSet<Capability>;
