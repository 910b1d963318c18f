//! # Warden Adapter
//!
//! Hosts foreign agent-framework configurations (LangGraph graphs,
//! CrewAI crews, AutoGen conversations, OpenClaw skill sets) inside the
//! runtime: a configuration is normalized to a common shape, its tools
//! are mapped to the runtime's capability vocabulary, and every
//! side-effectful message branch consults the sandbox and the policy
//! engine before acting.

pub mod config;
pub mod derive;
pub mod frameworks;
pub mod gate;

pub use config::{AdapterConfig, load_adapter_config, parse_adapter_config};
pub use derive::{DeriveError, derive_capabilities, derive_tool_capabilities};
pub use frameworks::{
    AutoGenAdapter, CrewAiAdapter, LangGraphAdapter, OpenClawAdapter, adapter_for,
};
pub use gate::ActionGate;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use warden_core::capability::CapabilitySet;
use warden_core::cancel::CancelToken;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::Sandbox;

/// Adapter lifecycle. `Stopped` is terminal; `Error` is reachable from
/// any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    Idle,
    Loaded,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Idle => "idle",
            AdapterState::Loaded => "loaded",
            AdapterState::Running => "running",
            AdapterState::Stopped => "stopped",
            AdapterState::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Messages dispatched to a running adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterMessage {
    /// Run the configured entry point with an input payload.
    Invoke { input: serde_json::Value },
    /// Invoke one named tool.
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    /// A conversational turn addressed to the hosted agent.
    UserMessage { content: String },
    /// Framework-specific control verbs (reset, checkpoint, ...).
    Control { command: String },
}

/// The canonical response framing: every reply is wrapped in a `res`
/// envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub res: serde_json::Value,
}

impl ResponseFrame {
    pub fn new(body: serde_json::Value) -> Self {
        Self { res: body }
    }
}

/// Pluggable execution backend for authorized tool calls.
///
/// The runtime wires concrete executors (LLM providers, MCP clients)
/// from outside the core; the default records the dispatch.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> WardenResult<serde_json::Value>;
}

/// Executor that acknowledges dispatches without running anything.
pub struct NullExecutor;

#[async_trait]
impl ToolExecutor for NullExecutor {
    async fn execute(
        &self,
        tool: &str,
        arguments: &serde_json::Value,
    ) -> WardenResult<serde_json::Value> {
        Ok(serde_json::json!({
            "dispatched": tool,
            "arguments": arguments,
        }))
    }
}

/// The uniform bridge every framework adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Framework name, e.g. `langgraph`.
    fn framework(&self) -> &'static str;

    fn state(&self) -> AdapterState;

    /// Parse and normalize a configuration, computing the required
    /// capability set. Idle → Loaded.
    fn load(&mut self, config: &AdapterConfig) -> WardenResult<()>;

    /// Verify the sandbox covers every required capability.
    /// Loaded → Running; a missing grant moves to Error instead.
    fn start(&mut self, sandbox: &Sandbox) -> WardenResult<()>;

    /// Dispatch one message. Rejected outside `Running`.
    async fn handle_message(
        &mut self,
        message: AdapterMessage,
        gate: &ActionGate<'_>,
        cancel: &CancelToken,
    ) -> WardenResult<ResponseFrame>;

    /// Release resources. Idempotent; allowed from any non-terminal
    /// state.
    fn stop(&mut self);

    /// The computed capability set, for UI and pre-flight checks.
    fn required_capabilities(&self) -> &CapabilitySet;
}

/// The normalized shape every framework configuration reduces to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedConfig {
    pub name: String,
    pub framework: String,
    pub entry_point: String,
    pub tools: Vec<ToolBinding>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One tool referenced by a foreign configuration, with any
/// user-declared capabilities carried along.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    #[serde(default)]
    pub declared: Option<CapabilitySet>,
}

impl ToolBinding {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: None,
        }
    }
}

pub(crate) fn invalid_state(state: AdapterState, operation: &str) -> WardenError {
    WardenError::InvalidState {
        current: state.to_string(),
        operation: operation.to_string(),
    }
}
