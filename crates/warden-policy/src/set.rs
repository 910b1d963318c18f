//! Immutable policy sets.
//!
//! Rules are collected in registration order and sorted once at build
//! time by `(priority desc, specificity desc, registration index)`;
//! evaluation is a linear scan of the pre-sorted vector. Reloading a
//! policy swaps the whole set, so outstanding requests see either the
//! old snapshot or the new one, never a mixture.

use crate::rule::{
    FileOperation, FileRule, NetworkRule, PolicyDecision, PolicyRule, RuleId, SecretRule,
    ShellRule,
};
use serde::{Deserialize, Serialize};
use warden_core::hosts::{is_blocked_host, is_blocked_secret_name, normalize_host};

/// Built-in starting points for a policy set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyTemplate {
    /// Everything blocked unless explicitly allowed.
    Strict,
    /// Files and network open, shell and secrets closed.
    Balanced,
    /// Everything open except the built-in blocklists.
    Permissive,
}

/// Per-domain defaults applied when no rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDefaults {
    pub file: PolicyDecision,
    pub network: PolicyDecision,
    pub shell: PolicyDecision,
    pub secret: PolicyDecision,
}

impl DomainDefaults {
    fn uniform(decision: PolicyDecision) -> Self {
        Self {
            file: decision,
            network: decision,
            shell: decision,
            secret: decision,
        }
    }
}

/// The four ordered rule lists plus default decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    file_rules: Vec<FileRule>,
    network_rules: Vec<NetworkRule>,
    shell_rules: Vec<ShellRule>,
    secret_rules: Vec<SecretRule>,
    defaults: DomainDefaults,
}

impl PolicySet {
    pub fn builder() -> PolicySetBuilder {
        PolicySetBuilder::new(PolicyTemplate::Strict)
    }

    pub fn from_template(template: PolicyTemplate) -> Self {
        PolicySetBuilder::new(template).build()
    }

    pub fn defaults(&self) -> DomainDefaults {
        self.defaults
    }

    pub fn file_rules(&self) -> &[FileRule] {
        &self.file_rules
    }

    pub fn network_rules(&self) -> &[NetworkRule] {
        &self.network_rules
    }

    pub fn shell_rules(&self) -> &[ShellRule] {
        &self.shell_rules
    }

    pub fn secret_rules(&self) -> &[SecretRule] {
        &self.secret_rules
    }

    /// First enabled file rule matching the request, in evaluation
    /// order.
    pub fn match_file(&self, path: &str, operation: FileOperation) -> Option<&FileRule> {
        self.file_rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(path, operation))
    }

    pub fn match_network(
        &self,
        host: &str,
        port: Option<u16>,
        scheme: Option<&str>,
    ) -> Option<&NetworkRule> {
        let host = normalize_host(host);
        self.network_rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(&host, port, scheme))
    }

    pub fn match_shell(&self, command: &str) -> Option<&ShellRule> {
        self.shell_rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(command))
    }

    pub fn match_secret(&self, name: &str) -> Option<&SecretRule> {
        self.secret_rules
            .iter()
            .filter(|rule| rule.enabled)
            .find(|rule| rule.matches(name))
    }

    /// Whether the built-in constants veto this host before any user
    /// rule is consulted.
    pub fn host_vetoed(&self, host: &str) -> bool {
        is_blocked_host(host)
    }

    /// Whether the built-in constants veto this secret name.
    pub fn secret_vetoed(&self, name: &str) -> bool {
        is_blocked_secret_name(name)
    }
}

/// Collects rules in registration order, then sorts once on `build`.
pub struct PolicySetBuilder {
    rules: Vec<PolicyRule>,
    defaults: DomainDefaults,
}

impl PolicySetBuilder {
    pub fn new(template: PolicyTemplate) -> Self {
        let defaults = match template {
            PolicyTemplate::Strict => DomainDefaults::uniform(PolicyDecision::Block),
            PolicyTemplate::Balanced => DomainDefaults {
                file: PolicyDecision::Allow,
                network: PolicyDecision::Allow,
                shell: PolicyDecision::Block,
                secret: PolicyDecision::Block,
            },
            PolicyTemplate::Permissive => DomainDefaults::uniform(PolicyDecision::Allow),
        };
        let mut builder = Self {
            rules: Vec::new(),
            defaults,
        };
        if matches!(template, PolicyTemplate::Strict | PolicyTemplate::Balanced) {
            builder = builder.rule(PolicyRule::File(FileRule {
                id: RuleId::new("builtin-ssh-keys"),
                pattern: "**/.ssh/**".to_string(),
                operations: None,
                decision: PolicyDecision::Block,
                priority: 1_000,
                enabled: true,
                reason: Some("SSH key material is never readable".to_string()),
            }));
        }
        builder
    }

    pub fn rule(mut self, rule: PolicyRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = PolicyRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn default_for_file(mut self, decision: PolicyDecision) -> Self {
        self.defaults.file = decision;
        self
    }

    pub fn default_for_network(mut self, decision: PolicyDecision) -> Self {
        self.defaults.network = decision;
        self
    }

    pub fn default_for_shell(mut self, decision: PolicyDecision) -> Self {
        self.defaults.shell = decision;
        self
    }

    pub fn default_for_secret(mut self, decision: PolicyDecision) -> Self {
        self.defaults.secret = decision;
        self
    }

    pub fn build(self) -> PolicySet {
        // Sort key: higher priority first, then higher specificity,
        // then registration order. Stable sort keeps registration order
        // for full ties.
        let mut indexed: Vec<(usize, PolicyRule)> = self.rules.into_iter().enumerate().collect();
        indexed.sort_by(|(left_idx, left), (right_idx, right)| {
            right
                .priority()
                .cmp(&left.priority())
                .then_with(|| right.specificity().cmp(&left.specificity()))
                .then_with(|| left_idx.cmp(right_idx))
        });

        let mut set = PolicySet {
            file_rules: Vec::new(),
            network_rules: Vec::new(),
            shell_rules: Vec::new(),
            secret_rules: Vec::new(),
            defaults: self.defaults,
        };
        for (_, rule) in indexed {
            match rule {
                PolicyRule::File(rule) => set.file_rules.push(rule),
                PolicyRule::Network(rule) => set.network_rules.push(rule),
                PolicyRule::Shell(rule) => set.shell_rules.push(rule),
                PolicyRule::Secret(rule) => set.secret_rules.push(rule),
            }
        }
        set
    }
}
