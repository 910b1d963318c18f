//! CrewAI adapter: hosts a crew of role-based agents.
//!
//! Every crew member's tool list contributes to the required
//! capability set; the crew runs as one hosted agent from the
//! runtime's point of view.

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
struct CrewConfig {
    name: String,
    crew: CrewSection,
}

#[derive(Debug, Deserialize)]
struct CrewSection {
    agents: Vec<CrewMember>,
    #[serde(default)]
    tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
struct CrewMember {
    role: String,
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    #[serde(default)]
    description: String,
    #[serde(default)]
    agent: Option<String>,
}

pub struct CrewAiAdapter {
    core: AdapterCore,
}

impl CrewAiAdapter {
    pub fn new() -> Self {
        Self {
            core: AdapterCore::new("crewai"),
        }
    }

    fn normalize(config: &AdapterConfig) -> WardenResult<NormalizedConfig> {
        let parsed: CrewConfig = serde_json::from_value(config.document.clone()).map_err(|e| {
            WardenError::InvalidConfiguration {
                reason: format!("invalid crewai configuration: {e}"),
            }
        })?;
        if parsed.crew.agents.is_empty() {
            return Err(WardenError::InvalidConfiguration {
                reason: "crewai configuration has no agents".to_string(),
            });
        }
        for task in &parsed.crew.tasks {
            if let Some(agent) = &task.agent {
                if !parsed.crew.agents.iter().any(|member| member.role == *agent) {
                    return Err(WardenError::InvalidConfiguration {
                        reason: format!(
                            "task '{}' names unknown agent '{agent}'",
                            task.description
                        ),
                    });
                }
            }
        }

        let entry_point = parsed.crew.agents[0].role.clone();
        let mut tools: Vec<ToolBinding> = Vec::new();
        for member in &parsed.crew.agents {
            for tool in &member.tools {
                if !tools.iter().any(|t| t.name == *tool) {
                    tools.push(ToolBinding::named(tool.clone()));
                }
            }
        }

        Ok(NormalizedConfig {
            name: parsed.name,
            framework: "crewai".to_string(),
            entry_point,
            tools,
            env: Default::default(),
        })
    }
}

impl Default for CrewAiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for CrewAiAdapter {
    fn framework(&self) -> &'static str {
        "crewai"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_adapter_config;
    use warden_core::capability::Capability;

    fn crew() -> AdapterConfig {
        parse_adapter_config(
            r#"
framework: crewai
name: newsroom
crew:
  agents:
    - role: researcher
      tools: [web_search, read_file]
    - role: writer
      tools: [write_file]
  tasks:
    - description: gather sources
      agent: researcher
    - description: draft article
      agent: writer
"#,
        )
        .unwrap()
    }

    #[test]
    fn crew_tools_union_into_capabilities() {
        let mut adapter = CrewAiAdapter::new();
        adapter.load(&crew()).unwrap();
        let caps = adapter.required_capabilities();
        assert!(caps.contains(&Capability::NetworkHttp));
        assert!(caps.contains(&Capability::FileRead));
        assert!(caps.contains(&Capability::FileWrite));
    }

    #[test]
    fn tasks_must_reference_known_agents() {
        let config = parse_adapter_config(
            r#"
framework: crewai
name: broken
crew:
  agents:
    - role: researcher
  tasks:
    - description: orphaned work
      agent: ghost
"#,
        )
        .unwrap();
        let mut adapter = CrewAiAdapter::new();
        assert!(matches!(
            adapter.load(&config),
            Err(WardenError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn double_load_is_an_invalid_state() {
        let mut adapter = CrewAiAdapter::new();
        adapter.load(&crew()).unwrap();
        assert!(matches!(
            adapter.load(&crew()),
            Err(WardenError::InvalidState { .. })
        ));
    }
}
