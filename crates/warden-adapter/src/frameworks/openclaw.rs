//! OpenClaw adapter: hosts a skill set.
//!
//! Skills may declare their capabilities explicitly; undeclared skill
//! names go through the same derivation as any other tool. Responses
//! use the `res`-frame envelope, with the handling skill named in the
//! body.

use super::AdapterCore;
use crate::config::AdapterConfig;
use crate::gate::ActionGate;
use crate::{
    Adapter, AdapterMessage, AdapterState, NormalizedConfig, ResponseFrame, ToolBinding,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use warden_core::capability::CapabilitySet;
use warden_core::cancel::CancelToken;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::Sandbox;

#[derive(Debug, Deserialize)]
struct OpenClawConfig {
    name: String,
    skills: Vec<SkillEntry>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SkillEntry {
    name: String,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

pub struct OpenClawAdapter {
    core: AdapterCore,
}

impl OpenClawAdapter {
    pub fn new() -> Self {
        Self {
            core: AdapterCore::new("openclaw"),
        }
    }

    fn normalize(config: &AdapterConfig) -> WardenResult<NormalizedConfig> {
        let parsed: OpenClawConfig =
            serde_json::from_value(config.document.clone()).map_err(|e| {
                WardenError::InvalidConfiguration {
                    reason: format!("invalid openclaw configuration: {e}"),
                }
            })?;
        if parsed.skills.is_empty() {
            return Err(WardenError::InvalidConfiguration {
                reason: "openclaw configuration has no skills".to_string(),
            });
        }

        let mut tools = Vec::new();
        for skill in parsed.skills {
            let declared = match skill.capabilities {
                Some(names) => {
                    let mut set = CapabilitySet::new();
                    for name in names {
                        let capability = warden_core::capability::Capability::parse(&name)
                            .map_err(|e| WardenError::InvalidConfiguration {
                                reason: format!("skill '{}': {e}", skill.name),
                            })?;
                        set.insert(capability);
                    }
                    Some(set)
                }
                None => None,
            };
            tools.push(ToolBinding {
                name: skill.name,
                declared,
            });
        }

        let entry_point = tools[0].name.clone();
        Ok(NormalizedConfig {
            name: parsed.name,
            framework: "openclaw".to_string(),
            entry_point,
            tools,
            env: parsed.env,
        })
    }
}

impl Default for OpenClawAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for OpenClawAdapter {
    fn framework(&self) -> &'static str {
        "openclaw"
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
        let skill = match &message {
            AdapterMessage::ToolCall { tool, .. } => Some(tool.clone()),
            _ => self.core.config().map(|c| c.entry_point.clone()),
        };
        let mut body = self.core.dispatch(message, gate, cancel).await?;
        if let (Some(skill), Some(object)) = (skill, body.as_object_mut()) {
            object.insert("skill".to_string(), serde_json::Value::String(skill));
        }
        Ok(ResponseFrame::new(body))
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    fn required_capabilities(&self) -> &CapabilitySet {
        self.core.required()
    }
}
