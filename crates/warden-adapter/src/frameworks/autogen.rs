//! AutoGen adapter: hosts a multi-agent conversation.
//!
//! Capabilities come from the function definitions the conversation's
//! participants register; a conversation with more than one assistant
//! also needs `agent:communicate`.

use super::AdapterCore;
use crate::config::AdapterConfig;
use crate::gate::ActionGate;
use crate::{
    Adapter, AdapterMessage, AdapterState, NormalizedConfig, ResponseFrame, ToolBinding,
};
use async_trait::async_trait;
use serde::Deserialize;
use warden_core::capability::{Capability, CapabilitySet};
use warden_core::cancel::CancelToken;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::Sandbox;

#[derive(Debug, Deserialize)]
struct AutoGenConfig {
    name: String,
    agents: Vec<AutoGenAgent>,
    #[serde(default)]
    functions: Vec<FunctionEntry>,
}

#[derive(Debug, Deserialize)]
struct AutoGenAgent {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FunctionEntry {
    name: String,
    #[serde(default)]
    capabilities: Option<CapabilitySet>,
}

pub struct AutoGenAdapter {
    core: AdapterCore,
}

impl AutoGenAdapter {
    pub fn new() -> Self {
        Self {
            core: AdapterCore::new("autogen"),
        }
    }

    fn normalize(config: &AdapterConfig) -> WardenResult<NormalizedConfig> {
        let parsed: AutoGenConfig =
            serde_json::from_value(config.document.clone()).map_err(|e| {
                WardenError::InvalidConfiguration {
                    reason: format!("invalid autogen configuration: {e}"),
                }
            })?;
        if parsed.agents.is_empty() {
            return Err(WardenError::InvalidConfiguration {
                reason: "autogen configuration has no agents".to_string(),
            });
        }

        let mut tools: Vec<ToolBinding> = parsed
            .functions
            .into_iter()
            .map(|function| ToolBinding {
                name: function.name,
                declared: function.capabilities,
            })
            .collect();
        if parsed.agents.len() > 1 {
            tools.push(ToolBinding {
                name: "send_message".to_string(),
                declared: Some([Capability::AgentCommunicate].into()),
            });
        }
        Ok(NormalizedConfig {
            name: parsed.name,
            framework: "autogen".to_string(),
            entry_point: parsed.agents[0].name.clone(),
            tools,
            env: Default::default(),
        })
    }
}

impl Default for AutoGenAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for AutoGenAdapter {
    fn framework(&self) -> &'static str {
        "autogen"
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
