//! Adapter configuration files: JSON or YAML, framework detected from
//! an explicit `framework` key.

use serde::Deserialize;
use std::path::Path;
use warden_core::error::{WardenError, WardenResult};

/// A parsed-but-unnormalized adapter configuration. Each framework
/// adapter interprets `document` its own way under `load`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterConfig {
    pub framework: String,
    pub document: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FrameworkProbe {
    framework: String,
}

/// Parse an adapter configuration from JSON or YAML text.
pub fn parse_adapter_config(raw: &str) -> WardenResult<AdapterConfig> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|e| WardenError::InvalidConfiguration {
            reason: format!("unparseable adapter configuration: {e}"),
        })?;
    let document: serde_json::Value =
        serde_json::to_value(&value).map_err(|e| WardenError::InvalidConfiguration {
            reason: format!("adapter configuration is not JSON-representable: {e}"),
        })?;
    let probe: FrameworkProbe =
        serde_json::from_value(document.clone()).map_err(|_| {
            WardenError::InvalidConfiguration {
                reason: "adapter configuration is missing the 'framework' key".to_string(),
            }
        })?;
    Ok(AdapterConfig {
        framework: probe.framework,
        document,
    })
}

/// Load an adapter configuration file.
pub fn load_adapter_config(path: impl AsRef<Path>) -> WardenResult<AdapterConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| WardenError::InvalidConfiguration {
        reason: format!("cannot read '{}': {e}", path.display()),
    })?;
    parse_adapter_config(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_and_json_both_parse() {
        let yaml = parse_adapter_config("framework: langgraph\nname: g\n").unwrap();
        assert_eq!(yaml.framework, "langgraph");

        let json = parse_adapter_config(r#"{"framework": "crewai", "name": "c"}"#).unwrap();
        assert_eq!(json.framework, "crewai");
    }

    #[test]
    fn missing_framework_key_is_fatal() {
        let err = parse_adapter_config("name: g\n").unwrap_err();
        assert!(matches!(err, WardenError::InvalidConfiguration { .. }));
    }
}
