//! Deterministic policy evaluation with approval escalation.
//!
//! `evaluate` is a pure function of `(PolicySet, PolicyRequest)`: the
//! built-in blocklists are consulted first, then the pre-sorted rule
//! list for the request's domain, then the domain default. Evaluation
//! never panics; anything unexpected becomes a block.
//!
//! `Approve` decisions escalate to an [`ApprovalHandler`] with a
//! timeout; no handler or no answer within the timeout means block.

use crate::rule::{PolicyDecision, PolicyRequest, RuleId};
use crate::set::PolicySet;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use warden_core::hosts::normalize_host;
use warden_core::identifiers::AgentId;

/// Default time an approval callback gets before the request is
/// treated as blocked.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

const DECISION_CACHE_CAPACITY: usize = 256;

/// The result of evaluating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: PolicyDecision,
    pub matched_rule: Option<RuleId>,
    pub reason: String,
}

impl PolicyOutcome {
    fn blocked(reason: impl Into<String>, rule: Option<RuleId>) -> Self {
        Self {
            decision: PolicyDecision::Block,
            matched_rule: rule,
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == PolicyDecision::Allow
    }
}

/// Everything an approver needs to decide.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub agent_id: AgentId,
    pub domain: &'static str,
    pub operation: String,
    pub subject: String,
    pub rule_id: Option<RuleId>,
    pub reason: String,
}

/// Out-of-band approval callback for `approve` decisions.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn approve(&self, prompt: ApprovalPrompt) -> bool;
}

/// Pure evaluation of a request against a policy set snapshot.
pub fn evaluate(set: &PolicySet, request: &PolicyRequest) -> PolicyOutcome {
    match request {
        PolicyRequest::File { path, operation, .. } => {
            match set.match_file(path, *operation) {
                Some(rule) => PolicyOutcome {
                    decision: rule.decision,
                    matched_rule: Some(rule.id.clone()),
                    reason: rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("matched file rule {}", rule.id)),
                },
                None => default_outcome(set.defaults().file, "file"),
            }
        }
        PolicyRequest::Network {
            host,
            port,
            scheme,
            ..
        } => {
            let normalized = normalize_host(host);
            if set.host_vetoed(&normalized) {
                return PolicyOutcome::blocked(
                    format!("host '{normalized}' is on the built-in blocklist"),
                    None,
                );
            }
            match set.match_network(&normalized, *port, scheme.as_deref()) {
                Some(rule) => PolicyOutcome {
                    decision: rule.decision,
                    matched_rule: Some(rule.id.clone()),
                    reason: rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("matched network rule {}", rule.id)),
                },
                None => default_outcome(set.defaults().network, "network"),
            }
        }
        PolicyRequest::Shell { command, .. } => match set.match_shell(command) {
            Some(rule) => PolicyOutcome {
                decision: rule.decision,
                matched_rule: Some(rule.id.clone()),
                reason: rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("matched shell rule {}", rule.id)),
            },
            None => default_outcome(set.defaults().shell, "shell"),
        },
        PolicyRequest::Secret { name, .. } => {
            if set.secret_vetoed(name) {
                return PolicyOutcome::blocked(
                    format!("secret '{name}' matches the built-in deny patterns"),
                    None,
                );
            }
            match set.match_secret(name) {
                Some(rule) => PolicyOutcome {
                    decision: rule.decision,
                    matched_rule: Some(rule.id.clone()),
                    reason: rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("matched secret rule {}", rule.id)),
                },
                None => default_outcome(set.defaults().secret, "secret"),
            }
        }
    }
}

fn default_outcome(decision: PolicyDecision, domain: &str) -> PolicyOutcome {
    PolicyOutcome {
        decision,
        matched_rule: None,
        reason: format!("no {domain} rule matched; domain default is {decision}"),
    }
}

/// Fixed-capacity LRU of `(request fingerprint → outcome)`.
///
/// Correctness-neutral: entries are invalidated wholesale whenever the
/// policy set snapshot is replaced.
struct DecisionCache {
    entries: HashMap<PolicyRequest, PolicyOutcome>,
    order: VecDeque<PolicyRequest>,
    capacity: usize,
}

impl DecisionCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&mut self, request: &PolicyRequest) -> Option<PolicyOutcome> {
        let outcome = self.entries.get(request).cloned()?;
        if let Some(position) = self.order.iter().position(|r| r == request) {
            self.order.remove(position);
            self.order.push_back(request.clone());
        }
        Some(outcome)
    }

    fn insert(&mut self, request: PolicyRequest, outcome: PolicyOutcome) {
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        if self.entries.insert(request.clone(), outcome).is_none() {
            self.order.push_back(request);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

/// The engine: a copy-on-write policy snapshot, a decision cache and an
/// optional approval handler.
pub struct PolicyEngine {
    set: RwLock<Arc<PolicySet>>,
    cache: Mutex<DecisionCache>,
    approval: RwLock<Option<Arc<dyn ApprovalHandler>>>,
    approval_timeout: Duration,
}

impl PolicyEngine {
    pub fn new(set: PolicySet) -> Self {
        Self {
            set: RwLock::new(Arc::new(set)),
            cache: Mutex::new(DecisionCache::new(DECISION_CACHE_CAPACITY)),
            approval: RwLock::new(None),
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn set_approval_handler(&self, handler: Arc<dyn ApprovalHandler>) {
        *self.approval.write().unwrap() = Some(handler);
    }

    /// The current immutable snapshot.
    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.set.read().unwrap().clone()
    }

    /// Replace the policy set. Outstanding evaluations finish against
    /// the snapshot they already took.
    pub fn replace(&self, set: PolicySet) {
        *self.set.write().unwrap() = Arc::new(set);
        self.cache.lock().unwrap().clear();
        tracing::info!("Policy set replaced");
    }

    /// Evaluate without resolving approvals: `Approve` comes back
    /// as-is. Cached per request fingerprint.
    pub fn evaluate(&self, request: &PolicyRequest) -> PolicyOutcome {
        if let Some(hit) = self.cache.lock().unwrap().get(request) {
            return hit;
        }
        let snapshot = self.snapshot();
        let outcome = evaluate(&snapshot, request);
        self.cache
            .lock()
            .unwrap()
            .insert(request.clone(), outcome.clone());
        outcome
    }

    /// Evaluate and resolve `Approve` via the registered handler.
    ///
    /// Without a handler, or when the handler does not answer within
    /// the approval timeout, the request is blocked.
    pub async fn decide(&self, request: &PolicyRequest) -> PolicyOutcome {
        let outcome = self.evaluate(request);
        if outcome.decision != PolicyDecision::Approve {
            return outcome;
        }

        let handler = self.approval.read().unwrap().clone();
        let Some(handler) = handler else {
            return PolicyOutcome::blocked(
                format!("approval required but no approval handler is registered ({})", outcome.reason),
                outcome.matched_rule,
            );
        };

        let prompt = ApprovalPrompt {
            agent_id: request.agent_id().clone(),
            domain: request.domain(),
            operation: request.domain().to_string(),
            subject: request.subject(),
            rule_id: outcome.matched_rule.clone(),
            reason: outcome.reason.clone(),
        };

        match tokio::time::timeout(self.approval_timeout, handler.approve(prompt)).await {
            Ok(true) => PolicyOutcome {
                decision: PolicyDecision::Allow,
                matched_rule: outcome.matched_rule,
                reason: format!("approved: {}", outcome.reason),
            },
            Ok(false) => PolicyOutcome::blocked(
                format!("approval denied: {}", outcome.reason),
                outcome.matched_rule,
            ),
            Err(_) => {
                tracing::warn!(
                    agent_id = %request.agent_id(),
                    domain = request.domain(),
                    "Approval timed out; treating as block"
                );
                PolicyOutcome::blocked(
                    format!("approval timed out: {}", outcome.reason),
                    outcome.matched_rule,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{FileOperation, FileRule, PolicyRule, SecretRule, ShellRule};
    use crate::set::{PolicySetBuilder, PolicyTemplate};

    fn agent() -> AgentId {
        AgentId::new_unchecked("a")
    }

    fn blocking_file_set() -> PolicySet {
        PolicySetBuilder::new(PolicyTemplate::Permissive)
            .rule(PolicyRule::File(FileRule {
                id: RuleId::new("ssh-block"),
                pattern: "**/.ssh/**".to_string(),
                operations: None,
                decision: PolicyDecision::Block,
                priority: 100,
                enabled: true,
                reason: Some("ssh keys are off limits".to_string()),
            }))
            .build()
    }

    #[test]
    fn matching_block_rule_reports_rule_id() {
        let set = blocking_file_set();
        let outcome = evaluate(
            &set,
            &PolicyRequest::File {
                path: "/home/u/.ssh/id_rsa".to_string(),
                operation: FileOperation::Read,
                agent_id: agent(),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Block);
        assert_eq!(outcome.matched_rule.unwrap().as_str(), "ssh-block");
        assert!(outcome.reason.contains("off limits"));
    }

    #[test]
    fn priority_beats_registration_order() {
        let set = PolicySetBuilder::new(PolicyTemplate::Permissive)
            .rule(PolicyRule::File(FileRule {
                id: RuleId::new("R1"),
                pattern: "/tmp/**".to_string(),
                operations: None,
                decision: PolicyDecision::Allow,
                priority: 10,
                enabled: true,
                reason: None,
            }))
            .rule(PolicyRule::File(FileRule {
                id: RuleId::new("R2"),
                pattern: "/tmp/secret".to_string(),
                operations: None,
                decision: PolicyDecision::Block,
                priority: 100,
                enabled: true,
                reason: None,
            }))
            .build();
        let outcome = evaluate(
            &set,
            &PolicyRequest::File {
                path: "/tmp/secret/x".to_string(),
                operation: FileOperation::Read,
                agent_id: agent(),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Block);
        assert_eq!(outcome.matched_rule.unwrap().as_str(), "R2");
    }

    #[test]
    fn builtin_host_blocklist_precedes_user_rules() {
        let set = PolicySetBuilder::new(PolicyTemplate::Permissive)
            .rule(PolicyRule::Network(crate::rule::NetworkRule {
                id: RuleId::new("allow-all"),
                host: "*".to_string(),
                port: None,
                scheme: None,
                decision: PolicyDecision::Allow,
                priority: 1_000,
                enabled: true,
                reason: None,
            }))
            .build();
        let outcome = evaluate(
            &set,
            &PolicyRequest::Network {
                host: "169.254.169.254".to_string(),
                port: Some(80),
                scheme: Some("http".to_string()),
                agent_id: agent(),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Block);
        assert!(outcome.matched_rule.is_none());
    }

    #[test]
    fn builtin_secret_patterns_precede_user_rules() {
        let set = PolicySetBuilder::new(PolicyTemplate::Permissive)
            .rule(PolicyRule::Secret(SecretRule {
                id: RuleId::new("allow-keys"),
                name: "*".to_string(),
                decision: PolicyDecision::Allow,
                priority: 1_000,
                enabled: true,
                reason: None,
            }))
            .build();
        let outcome = evaluate(
            &set,
            &PolicyRequest::Secret {
                name: "AWS_SECRET".to_string(),
                agent_id: agent(),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Block);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let set = blocking_file_set();
        let request = PolicyRequest::Shell {
            command: "cargo build".to_string(),
            agent_id: agent(),
        };
        let first = evaluate(&set, &request);
        for _ in 0..10 {
            assert_eq!(evaluate(&set, &request), first);
        }
    }

    #[test]
    fn engine_cache_returns_same_outcome() {
        let engine = PolicyEngine::new(blocking_file_set());
        let request = PolicyRequest::File {
            path: "/home/u/.ssh/id_rsa".to_string(),
            operation: FileOperation::Read,
            agent_id: agent(),
        };
        let first = engine.evaluate(&request);
        let second = engine.evaluate(&request);
        assert_eq!(first, second);
    }

    #[test]
    fn replace_invalidates_cache() {
        let engine = PolicyEngine::new(PolicySet::from_template(PolicyTemplate::Permissive));
        let request = PolicyRequest::Shell {
            command: "rm -rf /".to_string(),
            agent_id: agent(),
        };
        assert_eq!(engine.evaluate(&request).decision, PolicyDecision::Allow);

        engine.replace(
            PolicySetBuilder::new(PolicyTemplate::Permissive)
                .rule(PolicyRule::Shell(ShellRule {
                    id: RuleId::new("no-rm"),
                    command: "rm -rf".to_string(),
                    decision: PolicyDecision::Block,
                    priority: 10,
                    enabled: true,
                    reason: None,
                }))
                .build(),
        );
        assert_eq!(engine.evaluate(&request).decision, PolicyDecision::Block);
    }

    struct FixedApprover(bool);

    #[async_trait]
    impl ApprovalHandler for FixedApprover {
        async fn approve(&self, _prompt: ApprovalPrompt) -> bool {
            self.0
        }
    }

    fn approve_set() -> PolicySet {
        PolicySetBuilder::new(PolicyTemplate::Permissive)
            .rule(PolicyRule::Shell(ShellRule {
                id: RuleId::new("approve-sudo"),
                command: "sudo".to_string(),
                decision: PolicyDecision::Approve,
                priority: 10,
                enabled: true,
                reason: Some("privileged command".to_string()),
            }))
            .build()
    }

    fn sudo_request() -> PolicyRequest {
        PolicyRequest::Shell {
            command: "sudo systemctl restart nginx".to_string(),
            agent_id: agent(),
        }
    }

    #[tokio::test]
    async fn approve_without_handler_is_blocked() {
        let engine = PolicyEngine::new(approve_set());
        let outcome = engine.decide(&sudo_request()).await;
        assert_eq!(outcome.decision, PolicyDecision::Block);
        assert!(outcome.reason.contains("no approval handler"));
    }

    #[tokio::test]
    async fn granted_approval_allows() {
        let engine = PolicyEngine::new(approve_set());
        engine.set_approval_handler(Arc::new(FixedApprover(true)));
        let outcome = engine.decide(&sudo_request()).await;
        assert_eq!(outcome.decision, PolicyDecision::Allow);
        assert_eq!(outcome.matched_rule.unwrap().as_str(), "approve-sudo");
    }

    #[tokio::test]
    async fn denied_approval_blocks() {
        let engine = PolicyEngine::new(approve_set());
        engine.set_approval_handler(Arc::new(FixedApprover(false)));
        let outcome = engine.decide(&sudo_request()).await;
        assert_eq!(outcome.decision, PolicyDecision::Block);
    }

    struct SlowApprover;

    #[async_trait]
    impl ApprovalHandler for SlowApprover {
        async fn approve(&self, _prompt: ApprovalPrompt) -> bool {
            tokio::time::sleep(Duration::from_secs(60)).await;
            true
        }
    }

    #[tokio::test]
    async fn approval_timeout_blocks() {
        let engine =
            PolicyEngine::new(approve_set()).with_approval_timeout(Duration::from_millis(20));
        engine.set_approval_handler(Arc::new(SlowApprover));
        let outcome = engine.decide(&sudo_request()).await;
        assert_eq!(outcome.decision, PolicyDecision::Block);
        assert!(outcome.reason.contains("timed out"));
    }
}
