//! The action gate: both authorization layers in one call.
//!
//! A request passes only if the sandbox holds a covering grant AND the
//! policy engine allows the specific instance. Denials come back as
//! structured errors carrying the reason and, where a rule matched,
//! its id.

use warden_core::capability::Capability;
use warden_core::error::{WardenError, WardenResult};
use warden_core::sandbox::{CheckOptions, Sandbox};
use warden_policy::{FileOperation, PolicyDecision, PolicyEngine, PolicyRequest};

/// Borrowed view over an agent's sandbox and the shared policy engine.
pub struct ActionGate<'a> {
    pub sandbox: &'a Sandbox,
    pub policy: &'a PolicyEngine,
}

impl<'a> ActionGate<'a> {
    pub fn new(sandbox: &'a Sandbox, policy: &'a PolicyEngine) -> Self {
        Self { sandbox, policy }
    }

    fn sandbox_gate(
        &self,
        capability: Capability,
        options: &CheckOptions,
    ) -> WardenResult<()> {
        let decision = self.sandbox.check(capability, options);
        if !decision.allowed {
            return Err(WardenError::PermissionDenied {
                capability: capability.wire_name().to_string(),
                reason: decision
                    .reason
                    .unwrap_or_else(|| "sandbox denied the request".to_string()),
            });
        }
        Ok(())
    }

    async fn policy_gate(&self, request: PolicyRequest) -> WardenResult<()> {
        let outcome = self.policy.decide(&request).await;
        match outcome.decision {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Block => Err(WardenError::PolicyBlocked {
                reason: outcome.reason,
                rule_id: outcome.matched_rule.map(|id| id.to_string()),
            }),
            // `decide` resolves approvals; a surviving Approve means
            // the request is still waiting on a human.
            PolicyDecision::Approve => Err(WardenError::ApprovalRequired {
                capability: request.domain().to_string(),
                operation: request.domain().to_string(),
                subject: request.subject(),
            }),
        }
    }

    pub async fn authorize_file(
        &self,
        path: &str,
        operation: FileOperation,
    ) -> WardenResult<()> {
        let capability = match operation {
            FileOperation::Read | FileOperation::List => Capability::FileRead,
            FileOperation::Write => Capability::FileWrite,
            FileOperation::Delete => Capability::FileDelete,
        };
        self.sandbox_gate(
            capability,
            &CheckOptions::path(path).with_operation(operation.to_string()),
        )?;
        self.policy_gate(PolicyRequest::File {
            path: path.to_string(),
            operation,
            agent_id: self.sandbox.agent_id().clone(),
        })
        .await
    }

    pub async fn authorize_network(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Option<&str>,
    ) -> WardenResult<()> {
        if host.trim().is_empty() {
            return Err(WardenError::PermissionDenied {
                capability: Capability::NetworkHttp.wire_name().to_string(),
                reason: "request carries no target host".to_string(),
            });
        }
        let capability = match scheme {
            Some("ws") | Some("wss") => Capability::NetworkWebsocket,
            _ => Capability::NetworkHttp,
        };
        self.sandbox_gate(capability, &CheckOptions::host(host))?;
        self.policy_gate(PolicyRequest::Network {
            host: host.to_string(),
            port,
            scheme: scheme.map(str::to_string),
            agent_id: self.sandbox.agent_id().clone(),
        })
        .await
    }

    pub async fn authorize_shell(&self, command: &str) -> WardenResult<()> {
        self.sandbox_gate(Capability::ShellExecute, &CheckOptions::none())?;
        self.policy_gate(PolicyRequest::Shell {
            command: command.to_string(),
            agent_id: self.sandbox.agent_id().clone(),
        })
        .await
    }

    pub async fn authorize_secret(&self, name: &str) -> WardenResult<()> {
        self.sandbox_gate(Capability::MemoryRead, &CheckOptions::none())?;
        self.policy_gate(PolicyRequest::Secret {
            name: name.to_string(),
            agent_id: self.sandbox.agent_id().clone(),
        })
        .await
    }

    /// Capability-only gate for actions with no policy domain (LLM
    /// calls, agent messaging, MCP tools).
    pub fn authorize_capability(&self, capability: Capability) -> WardenResult<()> {
        self.sandbox_gate(capability, &CheckOptions::none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_core::identifiers::AgentId;
    use warden_core::sandbox::{GrantConstraints, GrantRegistry};
    use warden_policy::{PolicySet, PolicyTemplate};

    fn fixture() -> (Sandbox, PolicyEngine) {
        let registry = Arc::new(GrantRegistry::new());
        let sandbox = Sandbox::new(AgentId::new_unchecked("a"), registry);
        let engine = PolicyEngine::new(PolicySet::from_template(PolicyTemplate::Permissive));
        (sandbox, engine)
    }

    #[tokio::test]
    async fn both_gates_must_pass() {
        let (sandbox, engine) = fixture();
        let gate = ActionGate::new(&sandbox, &engine);

        // No grant: sandbox denies even though policy is permissive.
        let err = gate
            .authorize_file("/tmp/x", FileOperation::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::PermissionDenied { .. }));

        sandbox.grant(
            Capability::FileRead,
            GrantConstraints::unrestricted(),
            false,
            None,
        );
        gate.authorize_file("/tmp/x", FileOperation::Read)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn policy_block_carries_rule_id() {
        let (sandbox, engine) = fixture();
        sandbox.grant(
            Capability::ShellExecute,
            GrantConstraints::unrestricted(),
            false,
            None,
        );
        engine.replace(
            warden_policy::PolicySetBuilder::new(PolicyTemplate::Permissive)
                .rule(warden_policy::PolicyRule::Shell(warden_policy::ShellRule {
                    id: warden_policy::RuleId::new("no-curl"),
                    command: "curl".to_string(),
                    decision: PolicyDecision::Block,
                    priority: 5,
                    enabled: true,
                    reason: None,
                }))
                .build(),
        );
        let gate = ActionGate::new(&sandbox, &engine);
        let err = gate.authorize_shell("curl http://x").await.unwrap_err();
        match err {
            WardenError::PolicyBlocked { rule_id, .. } => {
                assert_eq!(rule_id.as_deref(), Some("no-curl"));
            }
            other => panic!("expected PolicyBlocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn websocket_scheme_selects_websocket_capability() {
        let (sandbox, engine) = fixture();
        sandbox.grant(
            Capability::NetworkHttp,
            GrantConstraints::unrestricted(),
            false,
            None,
        );
        let gate = ActionGate::new(&sandbox, &engine);
        // http passes with the http grant...
        gate.authorize_network("api.example.com", Some(443), Some("https"))
            .await
            .unwrap();
        // ...but wss needs the websocket capability.
        let err = gate
            .authorize_network("api.example.com", Some(443), Some("wss"))
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::PermissionDenied { .. }));
    }
}
