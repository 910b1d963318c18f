//! Policy configuration files.
//!
//! Policy sets are accepted as JSON or YAML in one canonical shape:
//!
//! ```yaml
//! template: balanced
//! file:
//!   default: allow
//!   rules:
//!     - pattern: "**/.ssh/**"
//!       decision: block
//!       reason: key material
//! network:
//!   default: block
//!   rules:
//!     - host: "*.example.com"
//!       decision: allow
//! shell:
//!   default: block
//!   rules:
//!     - command: "rm -rf"
//!       decision: block
//! secret:
//!   default: block
//!   rules:
//!     - name: "PUBLIC_*"
//!       decision: allow
//! ```
//!
//! `${VAR}` expands from the process environment inside string values.
//! Unknown top-level keys are ignored with a warning; a malformed set
//! is a fatal configuration error.

use crate::rule::{
    FileOperation, FileRule, NetworkRule, PolicyDecision, PolicyRule, RuleId, SecretRule,
    ShellRule,
};
use crate::set::{PolicySet, PolicySetBuilder, PolicyTemplate};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Errors loading a policy configuration. All of them are fatal at
/// load time.
#[derive(Debug, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("failed to read policy file '{path}': {details}")]
    Read { path: String, details: String },

    #[error("malformed policy configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("malformed policy configuration: {reason}")]
    Invalid { reason: String },
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["template", "file", "network", "shell", "secret"];

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    template: Option<PolicyTemplate>,
    #[serde(default)]
    file: Option<DomainSection<FileRuleEntry>>,
    #[serde(default)]
    network: Option<DomainSection<NetworkRuleEntry>>,
    #[serde(default)]
    shell: Option<DomainSection<ShellRuleEntry>>,
    #[serde(default)]
    secret: Option<DomainSection<SecretRuleEntry>>,
}

#[derive(Debug, Deserialize)]
struct DomainSection<R> {
    #[serde(default)]
    default: Option<PolicyDecision>,
    #[serde(default = "Vec::new")]
    rules: Vec<R>,
}

#[derive(Debug, Deserialize)]
struct FileRuleEntry {
    pattern: String,
    decision: PolicyDecision,
    #[serde(default)]
    operations: Option<BTreeSet<FileOperation>>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkRuleEntry {
    host: String,
    decision: PolicyDecision,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    scheme: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShellRuleEntry {
    command: String,
    decision: PolicyDecision,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SecretRuleEntry {
    name: String,
    decision: PolicyDecision,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

/// Load a policy set from a JSON or YAML file.
pub fn load_policy_file(path: impl AsRef<Path>) -> Result<PolicySet, PolicyConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| PolicyConfigError::Read {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    parse_policy_str(&raw)
}

/// Parse a policy set from JSON or YAML text.
///
/// YAML is a superset of JSON here, so a single parser covers both
/// accepted formats.
pub fn parse_policy_str(raw: &str) -> Result<PolicySet, PolicyConfigError> {
    let mut value: serde_yaml::Value = serde_yaml::from_str(raw)?;

    if let serde_yaml::Value::Mapping(mapping) = &value {
        for key in mapping.keys() {
            if let serde_yaml::Value::String(key) = key {
                if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Ignoring unknown top-level policy key");
                }
            }
        }
    }

    expand_env(&mut value);

    let file: PolicyFile = serde_yaml::from_value(strip_unknown_top_level(value))?;
    build_set(file)
}

fn strip_unknown_top_level(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::Mapping(mapping) => serde_yaml::Value::Mapping(
            mapping
                .into_iter()
                .filter(|(key, _)| {
                    matches!(key, serde_yaml::Value::String(k) if KNOWN_TOP_LEVEL_KEYS.contains(&k.as_str()))
                })
                .collect(),
        ),
        other => other,
    }
}

/// Expand `${VAR}` references from the process environment inside
/// every string value. Unresolvable references are left in place with
/// a warning so the mistake is visible downstream.
fn expand_env(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => {
            if s.contains("${") {
                *s = expand_env_str(s);
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                expand_env(item);
            }
        }
        serde_yaml::Value::Mapping(mapping) => {
            for (_, item) in mapping.iter_mut() {
                expand_env(item);
            }
        }
        _ => {}
    }
}

fn expand_env_str(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(resolved) => output.push_str(&resolved),
                    Err(_) => {
                        tracing::warn!(var = %name, "Unresolved environment reference in policy");
                        output.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                output.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    output.push_str(rest);
    output
}

fn build_set(file: PolicyFile) -> Result<PolicySet, PolicyConfigError> {
    let template = file.template.unwrap_or(PolicyTemplate::Strict);
    let mut builder = PolicySetBuilder::new(template);

    if let Some(section) = file.file {
        if let Some(decision) = section.default {
            builder = builder.default_for_file(decision);
        }
        for (index, entry) in section.rules.into_iter().enumerate() {
            builder = builder.rule(PolicyRule::File(FileRule {
                id: rule_id(entry.id, "file", index),
                pattern: non_empty(entry.pattern, "file rule pattern")?,
                operations: entry.operations,
                decision: entry.decision,
                priority: entry.priority.unwrap_or(0),
                enabled: entry.enabled.unwrap_or(true),
                reason: entry.reason,
            }));
        }
    }

    if let Some(section) = file.network {
        if let Some(decision) = section.default {
            builder = builder.default_for_network(decision);
        }
        for (index, entry) in section.rules.into_iter().enumerate() {
            builder = builder.rule(PolicyRule::Network(NetworkRule {
                id: rule_id(entry.id, "network", index),
                host: non_empty(entry.host, "network rule host")?,
                port: entry.port,
                scheme: entry.scheme,
                decision: entry.decision,
                priority: entry.priority.unwrap_or(0),
                enabled: entry.enabled.unwrap_or(true),
                reason: entry.reason,
            }));
        }
    }

    if let Some(section) = file.shell {
        if let Some(decision) = section.default {
            builder = builder.default_for_shell(decision);
        }
        for (index, entry) in section.rules.into_iter().enumerate() {
            builder = builder.rule(PolicyRule::Shell(ShellRule {
                id: rule_id(entry.id, "shell", index),
                command: non_empty(entry.command, "shell rule command")?,
                decision: entry.decision,
                priority: entry.priority.unwrap_or(0),
                enabled: entry.enabled.unwrap_or(true),
                reason: entry.reason,
            }));
        }
    }

    if let Some(section) = file.secret {
        if let Some(decision) = section.default {
            builder = builder.default_for_secret(decision);
        }
        for (index, entry) in section.rules.into_iter().enumerate() {
            builder = builder.rule(PolicyRule::Secret(SecretRule {
                id: rule_id(entry.id, "secret", index),
                name: non_empty(entry.name, "secret rule name")?,
                decision: entry.decision,
                priority: entry.priority.unwrap_or(0),
                enabled: entry.enabled.unwrap_or(true),
                reason: entry.reason,
            }));
        }
    }

    Ok(builder.build())
}

fn rule_id(explicit: Option<String>, domain: &str, index: usize) -> RuleId {
    match explicit {
        Some(id) => RuleId::new(id),
        None => RuleId::new(format!("{domain}-{index}")),
    }
}

fn non_empty(value: String, what: &str) -> Result<String, PolicyConfigError> {
    if value.trim().is_empty() {
        return Err(PolicyConfigError::Invalid {
            reason: format!("{what} must not be empty"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::evaluate;
    use crate::rule::PolicyRequest;
    use warden_core::identifiers::AgentId;

    #[test]
    fn parses_canonical_yaml() {
        let set = parse_policy_str(
            r#"
template: balanced
file:
  default: allow
  rules:
    - pattern: "**/.env"
      decision: block
      reason: env files hold secrets
network:
  default: block
  rules:
    - host: "*.example.com"
      decision: allow
shell:
  default: block
  rules:
    - command: "git "
      decision: allow
secret:
  default: block
"#,
        )
        .unwrap();

        let outcome = evaluate(
            &set,
            &PolicyRequest::File {
                path: "/app/.env".to_string(),
                operation: FileOperation::Read,
                agent_id: AgentId::new_unchecked("a"),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Block);

        let outcome = evaluate(
            &set,
            &PolicyRequest::Network {
                host: "api.example.com".to_string(),
                port: None,
                scheme: None,
                agent_id: AgentId::new_unchecked("a"),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Allow);
    }

    #[test]
    fn parses_json_too() {
        let set = parse_policy_str(
            r#"{"template":"permissive","shell":{"default":"block","rules":[{"command":"ls","decision":"allow"}]}}"#,
        )
        .unwrap();
        let outcome = evaluate(
            &set,
            &PolicyRequest::Shell {
                command: "ls -la".to_string(),
                agent_id: AgentId::new_unchecked("a"),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Allow);
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let set = parse_policy_str("template: permissive\ndashboard: {port: 8080}\n");
        assert!(set.is_ok());
    }

    #[test]
    fn malformed_configuration_is_fatal() {
        assert!(parse_policy_str("file: {default: [not, a, decision]}").is_err());
        assert!(parse_policy_str("file: {rules: [{decision: allow}]}").is_err());
        assert!(
            parse_policy_str("shell: {rules: [{command: \"\", decision: allow}]}").is_err()
        );
    }

    #[test]
    fn env_references_expand() {
        // Set-then-read keeps the test hermetic.
        unsafe { std::env::set_var("WARDEN_TEST_PROJECT_DIR", "/srv/proj") };
        let set = parse_policy_str(
            r#"
template: strict
file:
  rules:
    - pattern: "${WARDEN_TEST_PROJECT_DIR}/**"
      decision: allow
"#,
        )
        .unwrap();
        let outcome = evaluate(
            &set,
            &PolicyRequest::File {
                path: "/srv/proj/readme.md".to_string(),
                operation: FileOperation::Read,
                agent_id: AgentId::new_unchecked("a"),
            },
        );
        assert_eq!(outcome.decision, PolicyDecision::Allow);
    }

    #[test]
    fn missing_rule_ids_are_generated() {
        let set = parse_policy_str(
            "template: strict\nshell:\n  rules:\n    - command: curl\n      decision: block\n",
        )
        .unwrap();
        assert_eq!(set.shell_rules()[0].id.as_str(), "shell-0");
    }
}
