//! Validated identifier types used throughout the runtime.
//!
//! All identifiers follow the same rules: non-empty, at most 128
//! characters, no surrounding whitespace, only alphanumerics plus `-`,
//! `_` and `.`, and no path-traversal sequences. Constructors parse
//! instead of panicking; `new_unchecked` exists for test fixtures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MAX_ID_LEN: usize = 128;

/// Errors produced when parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdValidationError {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier exceeds {MAX_ID_LEN} characters (got {length})")]
    TooLong { length: usize },
    #[error("identifier must not have leading or trailing whitespace")]
    SurroundingWhitespace,
    #[error("identifier contains invalid character '{character}'")]
    InvalidCharacter { character: char },
    #[error("identifier contains a path traversal sequence")]
    PathTraversal,
}

fn validate(id: &str) -> Result<(), IdValidationError> {
    if id.is_empty() {
        return Err(IdValidationError::Empty);
    }
    if id.len() > MAX_ID_LEN {
        return Err(IdValidationError::TooLong { length: id.len() });
    }
    if id.trim() != id {
        return Err(IdValidationError::SurroundingWhitespace);
    }
    if id.contains("../") || id.contains("./") || id == ".." {
        return Err(IdValidationError::PathTraversal);
    }
    for character in id.chars() {
        if !character.is_ascii_alphanumeric() && !matches!(character, '-' | '_' | '.') {
            return Err(IdValidationError::InvalidCharacter { character });
        }
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Parse and validate from a string.
            pub fn parse(id: impl AsRef<str>) -> Result<Self, IdValidationError> {
                let id = id.as_ref();
                validate(id)?;
                Ok(Self(id.to_string()))
            }

            /// View as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Construct without validation (test fixtures only).
            #[doc(hidden)]
            pub fn new_unchecked(id: impl Into<String>) -> Self {
                Self(id.into())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(s)
            }
        }
    };
}

string_id! {
    /// Stable, opaque identifier for a registered agent.
    ///
    /// Assigned at registration and immutable for the lifetime of the
    /// agent, including across checkpoint/restore cycles.
    AgentId
}

string_id! {
    /// Correlation identifier threading one logical request through
    /// audit events.
    TraceId
}

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Unique identifier for a capability grant.
///
/// Grant ids are UUIDs; they name nodes in the grant forest and appear
/// in audit events and delegation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantId(uuid::Uuid);

impl GrantId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl fmt::Display for GrantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GrantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_id_accepts_safe_names() {
        assert!(AgentId::parse("agent-1").is_ok());
        assert!(AgentId::parse("my_agent.v2").is_ok());
        assert!(AgentId::parse("a").is_ok());
    }

    #[test]
    fn agent_id_rejects_unsafe_names() {
        assert!(AgentId::parse("").is_err());
        assert!(AgentId::parse(" agent").is_err());
        assert!(AgentId::parse("agent ").is_err());
        assert!(AgentId::parse("agent/path").is_err());
        assert!(AgentId::parse("../etc").is_err());
        assert!(AgentId::parse("a".repeat(129)).is_err());
    }

    #[test]
    fn trace_id_generate_is_unique() {
        assert_ne!(TraceId::generate(), TraceId::generate());
    }

    #[test]
    fn grant_id_roundtrips_through_str() {
        let id = GrantId::generate();
        let parsed: GrantId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_roundtrip_enforces_validation() {
        let id = AgentId::parse("serde-test").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let back: AgentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let bad: Result<AgentId, _> = serde_json::from_str("\"no/slashes\"");
        assert!(bad.is_err());
    }
}
