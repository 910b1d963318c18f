//! Data-driven capability derivation.
//!
//! Tool names are mapped to capability sets in three passes: the known
//! tool table, a user-declared capability list in the configuration,
//! and finally substring inference over a fixed dictionary. A tool that
//! survives none of them is refused rather than silently granted
//! nothing.

use crate::ToolBinding;
use warden_core::capability::{Capability, CapabilitySet};

/// Exact-name table for tools the frameworks commonly ship.
const KNOWN_TOOLS: &[(&str, &[Capability])] = &[
    ("read_file", &[Capability::FileRead]),
    ("write_file", &[Capability::FileWrite]),
    ("delete_file", &[Capability::FileDelete]),
    ("list_directory", &[Capability::FileRead]),
    ("file_search", &[Capability::FileRead]),
    ("http_fetch", &[Capability::NetworkHttp]),
    ("http_get", &[Capability::NetworkHttp]),
    ("http_post", &[Capability::NetworkHttp]),
    ("TavilySearch", &[Capability::NetworkHttp]),
    ("DuckDuckGoSearch", &[Capability::NetworkHttp]),
    ("web_search", &[Capability::NetworkHttp]),
    ("websocket_connect", &[Capability::NetworkWebsocket]),
    ("execute_code", &[Capability::ShellExecute]),
    ("run_shell", &[Capability::ShellExecute]),
    ("bash", &[Capability::ShellExecute]),
    ("python_repl", &[Capability::ShellExecute]),
    ("memory_get", &[Capability::MemoryRead]),
    ("memory_set", &[Capability::MemoryWrite]),
    ("conversation_memory", &[Capability::MemoryRead, Capability::MemoryWrite]),
    ("send_message", &[Capability::AgentCommunicate]),
    ("ask_agent", &[Capability::AgentCommunicate]),
    ("handoff", &[Capability::AgentCommunicate]),
    ("chat_completion", &[Capability::LlmChat]),
    ("llm_stream", &[Capability::LlmStream]),
];

/// Substring dictionary for the inference fallback, checked in order.
const INFERENCE: &[(&str, &[Capability])] = &[
    ("mcp", &[Capability::ToolMcp]),
    ("websocket", &[Capability::NetworkWebsocket]),
    ("http", &[Capability::NetworkHttp]),
    ("fetch", &[Capability::NetworkHttp]),
    ("search", &[Capability::NetworkHttp]),
    ("scrape", &[Capability::NetworkHttp]),
    ("shell", &[Capability::ShellExecute]),
    ("exec", &[Capability::ShellExecute]),
    ("terminal", &[Capability::ShellExecute]),
    ("delete", &[Capability::FileDelete]),
    ("write", &[Capability::FileWrite]),
    ("read", &[Capability::FileRead]),
    ("file", &[Capability::FileRead]),
    ("memory", &[Capability::MemoryRead, Capability::MemoryWrite]),
    ("recall", &[Capability::MemoryRead]),
    ("message", &[Capability::AgentCommunicate]),
    ("delegate", &[Capability::AgentCommunicate]),
    ("stream", &[Capability::LlmStream]),
    ("chat", &[Capability::LlmChat]),
    ("llm", &[Capability::LlmChat]),
];

/// A tool that could not be mapped to any capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool '{tool}' cannot be classified; declare its capabilities explicitly")]
pub struct DeriveError {
    pub tool: String,
}

/// Capabilities one tool needs.
pub fn derive_tool_capabilities(tool: &ToolBinding) -> Result<CapabilitySet, DeriveError> {
    if let Some((_, capabilities)) = KNOWN_TOOLS.iter().find(|(name, _)| *name == tool.name) {
        return Ok(capabilities.iter().copied().collect());
    }
    if let Some(declared) = &tool.declared {
        if !declared.is_empty() {
            return Ok(declared.clone());
        }
    }
    let lowered = tool.name.to_ascii_lowercase();
    for (needle, capabilities) in INFERENCE {
        if lowered.contains(needle) {
            tracing::debug!(
                tool = %tool.name,
                matched = needle,
                "Inferred tool capabilities by name"
            );
            return Ok(capabilities.iter().copied().collect());
        }
    }
    Err(DeriveError {
        tool: tool.name.clone(),
    })
}

/// The union of capabilities a tool list needs. Every hosted agent
/// also needs `llm:chat` to think.
pub fn derive_capabilities(tools: &[ToolBinding]) -> Result<CapabilitySet, DeriveError> {
    let mut set = CapabilitySet::new();
    set.insert(Capability::LlmChat);
    for tool in tools {
        set.extend(derive_tool_capabilities(tool)?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tools_map_exactly() {
        let caps = derive_tool_capabilities(&ToolBinding::named("read_file")).unwrap();
        assert_eq!(caps, [Capability::FileRead].into());
        let caps = derive_tool_capabilities(&ToolBinding::named("TavilySearch")).unwrap();
        assert_eq!(caps, [Capability::NetworkHttp].into());
    }

    #[test]
    fn declared_capabilities_win_over_inference() {
        let tool = ToolBinding {
            name: "company_reporter".to_string(),
            declared: Some([Capability::NetworkHttp, Capability::FileWrite].into()),
        };
        let caps = derive_tool_capabilities(&tool).unwrap();
        assert!(caps.contains(&Capability::FileWrite));
    }

    #[test]
    fn inference_falls_back_on_substrings() {
        let caps = derive_tool_capabilities(&ToolBinding::named("my_custom_http_client")).unwrap();
        assert_eq!(caps, [Capability::NetworkHttp].into());
        let caps = derive_tool_capabilities(&ToolBinding::named("scratchpad_memory")).unwrap();
        assert!(caps.contains(&Capability::MemoryRead));
    }

    #[test]
    fn unclassifiable_tools_are_refused() {
        let err = derive_tool_capabilities(&ToolBinding::named("frobnicator")).unwrap_err();
        assert_eq!(err.tool, "frobnicator");
    }

    #[test]
    fn tool_list_union_includes_llm_chat() {
        let caps = derive_capabilities(&[
            ToolBinding::named("read_file"),
            ToolBinding::named("web_search"),
        ])
        .unwrap();
        assert!(caps.contains(&Capability::LlmChat));
        assert!(caps.contains(&Capability::FileRead));
        assert!(caps.contains(&Capability::NetworkHttp));
    }
}
