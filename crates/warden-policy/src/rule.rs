//! Policy rules and requests as tagged sums.
//!
//! Each domain (file, network, shell, secret) has its own rule variant
//! with its own pattern fields; a rule matches a request only when
//! every specified field matches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use warden_core::identifiers::AgentId;
use warden_core::pattern::{name_pattern_matches, path_pattern_matches, specificity};

/// What a matched rule decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyDecision {
    Allow,
    Block,
    /// Requires an out-of-band approval callback to confirm within a
    /// timeout; otherwise treated as block.
    Approve,
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyDecision::Allow => "allow",
            PolicyDecision::Block => "block",
            PolicyDecision::Approve => "approve",
        };
        write!(f, "{s}")
    }
}

/// Stable identifier for a rule, reported on matches and denials.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File operations a rule may scope itself to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Read,
    Write,
    Delete,
    List,
}

impl fmt::Display for FileOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOperation::Read => "read",
            FileOperation::Write => "write",
            FileOperation::Delete => "delete",
            FileOperation::List => "list",
        };
        write!(f, "{s}")
    }
}

/// Rule over filesystem paths; `**` in patterns crosses separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRule {
    pub id: RuleId,
    pub pattern: String,
    /// Restrict to specific operations; `None` covers all of them.
    #[serde(default)]
    pub operations: Option<BTreeSet<FileOperation>>,
    pub decision: PolicyDecision,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Rule over hostnames, with optional port and scheme pins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRule {
    pub id: RuleId,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub scheme: Option<String>,
    pub decision: PolicyDecision,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Rule over shell command lines; the pattern is a substring match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellRule {
    pub id: RuleId,
    pub command: String,
    pub decision: PolicyDecision,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Rule over secret names; `*` in the pattern crosses any characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRule {
    pub id: RuleId,
    pub name: String,
    pub decision: PolicyDecision,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

fn enabled_default() -> bool {
    true
}

/// One rule of any domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PolicyRule {
    File(FileRule),
    Network(NetworkRule),
    Shell(ShellRule),
    Secret(SecretRule),
}

impl PolicyRule {
    pub fn id(&self) -> &RuleId {
        match self {
            PolicyRule::File(rule) => &rule.id,
            PolicyRule::Network(rule) => &rule.id,
            PolicyRule::Shell(rule) => &rule.id,
            PolicyRule::Secret(rule) => &rule.id,
        }
    }

    pub fn decision(&self) -> PolicyDecision {
        match self {
            PolicyRule::File(rule) => rule.decision,
            PolicyRule::Network(rule) => rule.decision,
            PolicyRule::Shell(rule) => rule.decision,
            PolicyRule::Secret(rule) => rule.decision,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            PolicyRule::File(rule) => rule.priority,
            PolicyRule::Network(rule) => rule.priority,
            PolicyRule::Shell(rule) => rule.priority,
            PolicyRule::Secret(rule) => rule.priority,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            PolicyRule::File(rule) => rule.enabled,
            PolicyRule::Network(rule) => rule.enabled,
            PolicyRule::Shell(rule) => rule.enabled,
            PolicyRule::Secret(rule) => rule.enabled,
        }
    }

    /// Ordering key: explicit patterns outrank wildcards, longer
    /// literals outrank shorter, extra pinned fields add a little.
    pub fn specificity(&self) -> usize {
        match self {
            PolicyRule::File(rule) => {
                specificity(&rule.pattern)
                    + rule.operations.as_ref().map_or(0, |ops| ops.len())
            }
            PolicyRule::Network(rule) => {
                specificity(&rule.host)
                    + rule.port.map_or(0, |_| 1)
                    + rule.scheme.as_ref().map_or(0, |s| s.len())
            }
            PolicyRule::Shell(rule) => specificity(&rule.command),
            PolicyRule::Secret(rule) => specificity(&rule.name),
        }
    }
}

/// A concrete request to be authorized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PolicyRequest {
    File {
        path: String,
        operation: FileOperation,
        agent_id: AgentId,
    },
    Network {
        host: String,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        scheme: Option<String>,
        agent_id: AgentId,
    },
    Shell {
        command: String,
        agent_id: AgentId,
    },
    Secret {
        name: String,
        agent_id: AgentId,
    },
}

impl PolicyRequest {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            PolicyRequest::File { agent_id, .. }
            | PolicyRequest::Network { agent_id, .. }
            | PolicyRequest::Shell { agent_id, .. }
            | PolicyRequest::Secret { agent_id, .. } => agent_id,
        }
    }

    pub fn domain(&self) -> &'static str {
        match self {
            PolicyRequest::File { .. } => "file",
            PolicyRequest::Network { .. } => "network",
            PolicyRequest::Shell { .. } => "shell",
            PolicyRequest::Secret { .. } => "secret",
        }
    }

    /// Short human-readable subject for denials and approval prompts.
    pub fn subject(&self) -> String {
        match self {
            PolicyRequest::File { path, operation, .. } => format!("{operation} {path}"),
            PolicyRequest::Network { host, port, .. } => match port {
                Some(port) => format!("{host}:{port}"),
                None => host.clone(),
            },
            PolicyRequest::Shell { command, .. } => command.clone(),
            PolicyRequest::Secret { name, .. } => name.clone(),
        }
    }
}

impl FileRule {
    pub fn matches(&self, path: &str, operation: FileOperation) -> bool {
        if let Some(operations) = &self.operations {
            if !operations.contains(&operation) {
                return false;
            }
        }
        path_pattern_matches(&self.pattern, path)
    }
}

impl NetworkRule {
    pub fn matches(&self, host: &str, port: Option<u16>, scheme: Option<&str>) -> bool {
        if !name_pattern_matches(&self.host, host) {
            return false;
        }
        if let Some(rule_port) = self.port {
            if port != Some(rule_port) {
                return false;
            }
        }
        if let Some(rule_scheme) = &self.scheme {
            if scheme != Some(rule_scheme.as_str()) {
                return false;
            }
        }
        true
    }
}

impl ShellRule {
    pub fn matches(&self, command: &str) -> bool {
        command.contains(&self.command)
    }
}

impl SecretRule {
    pub fn matches(&self, name: &str) -> bool {
        name_pattern_matches(&self.name, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_rule(pattern: &str) -> FileRule {
        FileRule {
            id: RuleId::new("r"),
            pattern: pattern.to_string(),
            operations: None,
            decision: PolicyDecision::Block,
            priority: 0,
            enabled: true,
            reason: None,
        }
    }

    #[test]
    fn file_rule_matches_descendants() {
        let rule = file_rule("/tmp/secret");
        assert!(rule.matches("/tmp/secret/x", FileOperation::Read));
        assert!(!rule.matches("/tmp/other", FileOperation::Read));
    }

    #[test]
    fn file_rule_operation_scope() {
        let mut rule = file_rule("/data/**");
        rule.operations = Some([FileOperation::Write, FileOperation::Delete].into());
        assert!(rule.matches("/data/db", FileOperation::Write));
        assert!(!rule.matches("/data/db", FileOperation::Read));
    }

    #[test]
    fn network_rule_pins_port_and_scheme() {
        let rule = NetworkRule {
            id: RuleId::new("n"),
            host: "*.example.com".to_string(),
            port: Some(443),
            scheme: Some("https".to_string()),
            decision: PolicyDecision::Allow,
            priority: 0,
            enabled: true,
            reason: None,
        };
        assert!(rule.matches("api.example.com", Some(443), Some("https")));
        assert!(!rule.matches("api.example.com", Some(80), Some("https")));
        assert!(!rule.matches("api.example.com", Some(443), Some("http")));
    }

    #[test]
    fn shell_rule_is_substring() {
        let rule = ShellRule {
            id: RuleId::new("s"),
            command: "rm -rf".to_string(),
            decision: PolicyDecision::Block,
            priority: 0,
            enabled: true,
            reason: None,
        };
        assert!(rule.matches("sudo rm -rf /"));
        assert!(!rule.matches("rm file.txt"));
    }

    #[test]
    fn specificity_prefers_literal_rules() {
        let explicit = PolicyRule::File(file_rule("/tmp/secret"));
        let wildcard = PolicyRule::File(file_rule("/tmp/**"));
        assert!(explicit.specificity() > wildcard.specificity());
    }

    #[test]
    fn rule_serde_is_tagged() {
        let rule = PolicyRule::Secret(SecretRule {
            id: RuleId::new("sec-1"),
            name: "*_TOKEN".to_string(),
            decision: PolicyDecision::Block,
            priority: 10,
            enabled: true,
            reason: Some("no token reads".to_string()),
        });
        let json = serde_json::to_string(&rule).unwrap();
        assert!(json.contains("\"type\":\"secret\""));
        let back: PolicyRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule, back);
    }
}
