//! Framework adapters and their shared machinery.

mod autogen;
mod crewai;
mod langgraph;
mod openclaw;

pub use autogen::AutoGenAdapter;
pub use crewai::CrewAiAdapter;
pub use langgraph::LangGraphAdapter;
pub use openclaw::OpenClawAdapter;

use crate::config::AdapterConfig;
use crate::derive::{derive_capabilities, derive_tool_capabilities};
use crate::gate::ActionGate;
use crate::{Adapter, AdapterMessage, AdapterState, NormalizedConfig, ToolBinding, invalid_state};
use std::sync::Arc;
use warden_core::capability::{Capability, CapabilitySet};
use warden_core::cancel::CancelToken;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::{CheckOptions, Sandbox};
use warden_policy::FileOperation;

/// Construct the adapter registered for a configuration's framework.
pub fn adapter_for(config: &AdapterConfig) -> WardenResult<Box<dyn Adapter>> {
    match config.framework.as_str() {
        "langgraph" => Ok(Box::new(LangGraphAdapter::new())),
        "crewai" => Ok(Box::new(CrewAiAdapter::new())),
        "autogen" => Ok(Box::new(AutoGenAdapter::new())),
        "openclaw" => Ok(Box::new(OpenClawAdapter::new())),
        other => Err(WardenError::InvalidConfiguration {
            reason: format!("unsupported adapter framework '{other}'"),
        }),
    }
}

/// State, normalized configuration and dispatch shared by every
/// framework adapter.
pub(crate) struct AdapterCore {
    framework: &'static str,
    state: AdapterState,
    config: Option<NormalizedConfig>,
    required: CapabilitySet,
    executor: Arc<dyn crate::ToolExecutor>,
}

impl AdapterCore {
    pub(crate) fn new(framework: &'static str) -> Self {
        Self {
            framework,
            state: AdapterState::Idle,
            config: None,
            required: CapabilitySet::new(),
            executor: Arc::new(crate::NullExecutor),
        }
    }

    pub(crate) fn state(&self) -> AdapterState {
        self.state
    }

    pub(crate) fn required(&self) -> &CapabilitySet {
        &self.required
    }

    pub(crate) fn set_executor(&mut self, executor: Arc<dyn crate::ToolExecutor>) {
        self.executor = executor;
    }

    pub(crate) fn config(&self) -> Option<&NormalizedConfig> {
        self.config.as_ref()
    }

    /// Idle → Loaded with a normalized configuration; derivation
    /// failures are configuration errors and leave the adapter Idle.
    pub(crate) fn load(&mut self, normalized: NormalizedConfig) -> WardenResult<()> {
        if self.state != AdapterState::Idle {
            return Err(invalid_state(self.state, "load"));
        }
        let required =
            derive_capabilities(&normalized.tools).map_err(|e| WardenError::InvalidConfiguration {
                reason: e.to_string(),
            })?;
        tracing::info!(
            framework = self.framework,
            agent = %normalized.name,
            tools = normalized.tools.len(),
            capabilities = required.len(),
            "Adapter configuration loaded"
        );
        self.required = required;
        self.config = Some(normalized);
        self.state = AdapterState::Loaded;
        Ok(())
    }

    /// Loaded → Running after a pre-flight over the required set; a
    /// missing grant moves to Error.
    pub(crate) fn start(&mut self, sandbox: &Sandbox) -> WardenResult<()> {
        if self.state != AdapterState::Loaded {
            return Err(invalid_state(self.state, "start"));
        }
        for capability in &self.required {
            let decision = sandbox.check(*capability, &CheckOptions::none());
            if !decision.allowed {
                self.state = AdapterState::Error;
                return Err(WardenError::PermissionDenied {
                    capability: capability.wire_name().to_string(),
                    reason: decision
                        .reason
                        .unwrap_or_else(|| "required capability not granted".to_string()),
                });
            }
        }
        self.state = AdapterState::Running;
        Ok(())
    }

    /// Idempotent; legal from any non-terminal state.
    pub(crate) fn stop(&mut self) {
        if self.state != AdapterState::Stopped {
            tracing::debug!(framework = self.framework, from = %self.state, "Adapter stopped");
            self.state = AdapterState::Stopped;
        }
    }

    pub(crate) fn fail(&mut self) {
        self.state = AdapterState::Error;
    }

    /// Shared message dispatch. Side-effectful branches clear the
    /// sandbox and the policy engine before anything else runs.
    pub(crate) async fn dispatch(
        &mut self,
        message: AdapterMessage,
        gate: &ActionGate<'_>,
        cancel: &CancelToken,
    ) -> WardenResult<serde_json::Value> {
        if self.state != AdapterState::Running {
            return Err(invalid_state(self.state, "handle message"));
        }
        cancel.check()?;

        match message {
            AdapterMessage::Invoke { input } => {
                gate.authorize_capability(Capability::LlmChat)?;
                let entry_point = self
                    .config
                    .as_ref()
                    .map(|c| c.entry_point.clone())
                    .unwrap_or_default();
                Ok(serde_json::json!({
                    "invoked": entry_point,
                    "input": input,
                }))
            }
            AdapterMessage::ToolCall { tool, arguments } => {
                self.authorize_tool(&tool, &arguments, gate).await?;
                cancel.check()?;
                let output = match self.executor.execute(&tool, &arguments).await {
                    Ok(output) => output,
                    Err(error) => {
                        // Denials and cancellations are terminal for
                        // the message, not for the adapter.
                        if !error.is_denial() && !error.is_transient() {
                            self.fail();
                        }
                        return Err(error);
                    }
                };
                Ok(serde_json::json!({
                    "tool": tool,
                    "output": output,
                }))
            }
            AdapterMessage::UserMessage { content } => {
                gate.authorize_capability(Capability::LlmChat)?;
                Ok(serde_json::json!({
                    "accepted": true,
                    "length": content.len(),
                }))
            }
            AdapterMessage::Control { command } => match command.as_str() {
                "status" => Ok(serde_json::json!({
                    "state": self.state,
                    "framework": self.framework,
                })),
                "capabilities" => Ok(serde_json::json!({
                    "required": self.required,
                })),
                other => Err(WardenError::NotFound {
                    what: format!("control command '{other}'"),
                }),
            },
        }
    }

    /// Map a tool call to its capability set and run the matching
    /// gates.
    async fn authorize_tool(
        &self,
        tool: &str,
        arguments: &serde_json::Value,
        gate: &ActionGate<'_>,
    ) -> WardenResult<()> {
        let binding = self
            .config
            .as_ref()
            .and_then(|c| c.tools.iter().find(|t| t.name == tool).cloned())
            .unwrap_or_else(|| ToolBinding::named(tool));
        let capabilities =
            derive_tool_capabilities(&binding).map_err(|e| WardenError::PermissionDenied {
                capability: "unknown".to_string(),
                reason: e.to_string(),
            })?;

        for capability in capabilities {
            match capability {
                Capability::FileRead => {
                    let path = string_argument(arguments, "path").unwrap_or("/");
                    gate.authorize_file(path, FileOperation::Read).await?;
                }
                Capability::FileWrite => {
                    let path = string_argument(arguments, "path").unwrap_or("/");
                    gate.authorize_file(path, FileOperation::Write).await?;
                }
                Capability::FileDelete => {
                    let path = string_argument(arguments, "path").unwrap_or("/");
                    gate.authorize_file(path, FileOperation::Delete).await?;
                }
                Capability::NetworkHttp => {
                    let (host, port, scheme) = host_of(arguments);
                    gate.authorize_network(&host, port, scheme.as_deref()).await?;
                }
                Capability::NetworkWebsocket => {
                    let (host, port, _) = host_of(arguments);
                    gate.authorize_network(&host, port, Some("wss")).await?;
                }
                Capability::ShellExecute => {
                    let command = string_argument(arguments, "command").unwrap_or(tool);
                    gate.authorize_shell(command).await?;
                }
                other => gate.authorize_capability(other)?,
            }
        }
        Ok(())
    }
}

fn string_argument<'a>(arguments: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(serde_json::Value::as_str)
}

/// Pull `(host, port, scheme)` out of a tool call's `url` or `host`
/// argument. Falls back to an empty host, which the sandbox rejects.
fn host_of(arguments: &serde_json::Value) -> (String, Option<u16>, Option<String>) {
    if let Some(host) = string_argument(arguments, "host") {
        let port = arguments
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .and_then(|p| u16::try_from(p).ok());
        return (host.to_string(), port, None);
    }
    let Some(url) = string_argument(arguments, "url") else {
        return (String::new(), None, None);
    };
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme.to_string()), rest),
        None => (None, url),
    };
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    match authority.rsplit_once(':') {
        Some((host, port)) => (
            host.to_string(),
            port.parse().ok(),
            scheme,
        ),
        None => (authority.to_string(), None, scheme),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_parses_urls() {
        let (host, port, scheme) = host_of(&serde_json::json!({
            "url": "https://api.example.com:8443/v1/items?page=2"
        }));
        assert_eq!(host, "api.example.com");
        assert_eq!(port, Some(8443));
        assert_eq!(scheme.as_deref(), Some("https"));
    }

    #[test]
    fn host_of_prefers_explicit_host() {
        let (host, port, _) = host_of(&serde_json::json!({"host": "db.internal", "port": 5432}));
        assert_eq!(host, "db.internal");
        assert_eq!(port, Some(5432));
    }

    #[test]
    fn adapter_factory_rejects_unknown_frameworks() {
        let config = AdapterConfig {
            framework: "fictional".to_string(),
            document: serde_json::Value::Null,
        };
        assert!(adapter_for(&config).is_err());
    }
}
