//! # Warden Policy
//!
//! The rule-based policy engine: the second, orthogonal gate behind the
//! capability sandbox. Grants authorize categories of action; policies
//! authorize specific instances. A request passes only when both allow
//! it.

pub mod config;
pub mod engine;
pub mod rule;
pub mod set;

pub use config::{PolicyConfigError, load_policy_file, parse_policy_str};
pub use engine::{
    ApprovalHandler, ApprovalPrompt, PolicyEngine, PolicyOutcome, DEFAULT_APPROVAL_TIMEOUT,
};
pub use rule::{
    FileOperation, FileRule, NetworkRule, PolicyDecision, PolicyRequest, PolicyRule, RuleId,
    SecretRule, ShellRule,
};
pub use set::{PolicySet, PolicySetBuilder, PolicyTemplate};
