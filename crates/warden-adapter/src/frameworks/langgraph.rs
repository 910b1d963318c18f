//! LangGraph adapter: hosts a compiled graph definition.
//!
//! The configuration names graph nodes; tool nodes contribute to the
//! required capability set alongside any top-level `tools` list.

use super::AdapterCore;
use crate::config::AdapterConfig;
use crate::gate::ActionGate;
use crate::{
    Adapter, AdapterMessage, AdapterState, NormalizedConfig, ResponseFrame, ToolBinding,
};
use async_trait::async_trait;
use serde::Deserialize;
use warden_core::capability::CapabilitySet;
use warden_core::cancel::CancelToken;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::Sandbox;

#[derive(Debug, Deserialize)]
struct LangGraphConfig {
    name: String,
    #[serde(default)]
    entry_point: Option<String>,
    graph: GraphSection,
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Debug, Deserialize)]
struct GraphSection {
    nodes: Vec<NodeEntry>,
    #[serde(default)]
    edges: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    id: String,
    #[serde(default)]
    tool: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    capabilities: Option<CapabilitySet>,
}

pub struct LangGraphAdapter {
    core: AdapterCore,
}

impl LangGraphAdapter {
    pub fn new() -> Self {
        Self {
            core: AdapterCore::new("langgraph"),
        }
    }

    fn normalize(config: &AdapterConfig) -> WardenResult<NormalizedConfig> {
        let parsed: LangGraphConfig = serde_json::from_value(config.document.clone())
            .map_err(|e| WardenError::InvalidConfiguration {
                reason: format!("invalid langgraph configuration: {e}"),
            })?;
        if parsed.graph.nodes.is_empty() {
            return Err(WardenError::InvalidConfiguration {
                reason: "langgraph configuration has no nodes".to_string(),
            });
        }

        let entry_point = parsed
            .entry_point
            .unwrap_or_else(|| parsed.graph.nodes[0].id.clone());

        let mut tools: Vec<ToolBinding> = parsed
            .tools
            .into_iter()
            .map(|tool| ToolBinding {
                name: tool.name,
                declared: tool.capabilities,
            })
            .collect();
        for node in &parsed.graph.nodes {
            if let Some(tool) = &node.tool {
                if !tools.iter().any(|t| t.name == *tool) {
                    tools.push(ToolBinding::named(tool.clone()));
                }
            }
        }
        // Edges only shape control flow; they carry no capabilities.
        let _ = parsed.graph.edges;

        Ok(NormalizedConfig {
            name: parsed.name,
            framework: "langgraph".to_string(),
            entry_point,
            tools,
            env: Default::default(),
        })
    }
}

impl Default for LangGraphAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for LangGraphAdapter {
    fn framework(&self) -> &'static str {
        "langgraph"
    }

    fn state(&self) -> AdapterState {
        self.core.state()
    }

    fn load(&mut self, config: &AdapterConfig) -> WardenResult<()> {
        let normalized = Self::normalize(config)?;
        self.core.load(normalized)
    }

    fn start(&mut self, sandbox: &Sandbox) -> WardenResult<()> {
        self.core.start(sandbox)
    }

    async fn handle_message(
        &mut self,
        message: AdapterMessage,
        gate: &ActionGate<'_>,
        cancel: &CancelToken,
    ) -> WardenResult<ResponseFrame> {
        let body = self.core.dispatch(message, gate, cancel).await?;
        Ok(ResponseFrame::new(body))
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    fn required_capabilities(&self) -> &CapabilitySet {
        self.core.required()
    }
}
