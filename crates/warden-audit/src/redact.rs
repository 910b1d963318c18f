//! Secret redaction for audit events.
//!
//! Values that look like credential assignments are masked before an
//! event is buffered, so secrets never reach a sink.

use crate::event::AuditEvent;
use once_cell::sync::Lazy;
use regex::Regex;

const MASK: &str = "[REDACTED]";

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    // KEY=value and KEY: value forms for names matching the built-in
    // secret patterns.
    Regex::new(r#"(?i)\b([A-Z0-9_]*(?:API_KEY|SECRET|TOKEN|PASSWORD))\s*[=:]\s*([^\s"',;]+)"#)
        .expect("secret assignment regex is valid")
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/-]+=*").expect("bearer regex is valid")
});

/// Mask credential-looking values inside a string.
pub fn redact_str(input: &str) -> String {
    let masked = SECRET_ASSIGNMENT.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("{}={MASK}", &caps[1])
    });
    BEARER.replace_all(&masked, format!("Bearer {MASK}")).into_owned()
}

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            let replaced = redact_str(s);
            if replaced != *s {
                *s = replaced;
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                redact_value(item);
            }
        }
        serde_json::Value::Object(map) => {
            for (key, item) in map.iter_mut() {
                if warden_core::hosts::is_blocked_secret_name(&key.to_ascii_uppercase()) {
                    *item = serde_json::Value::String(MASK.to_string());
                } else {
                    redact_value(item);
                }
            }
        }
        _ => {}
    }
}

/// Redact an event's message and structured data in place.
pub fn redact_event(event: &mut AuditEvent) {
    let replaced = redact_str(&event.message);
    if replaced != event.message {
        event.message = replaced;
    }
    redact_value(&mut event.data);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, Severity};

    #[test]
    fn assignment_values_are_masked() {
        let masked = redact_str("calling with OPENAI_API_KEY=sk-abc123 retry=2");
        assert!(masked.contains("OPENAI_API_KEY=[REDACTED]"));
        assert!(!masked.contains("sk-abc123"));
        assert!(masked.contains("retry=2"));
    }

    #[test]
    fn bearer_headers_are_masked() {
        let masked = redact_str("Authorization: Bearer eyJhbGciOi.abc.def");
        assert!(!masked.contains("eyJhbGciOi"));
        assert!(masked.contains("Bearer [REDACTED]"));
    }

    #[test]
    fn secret_named_json_keys_are_masked() {
        let mut event = AuditEvent::new(Category::Tool, Severity::Info, "tool call")
            .with_data(serde_json::json!({
                "github_token": "ghp_verysecret",
                "url": "https://example.com",
            }));
        redact_event(&mut event);
        assert_eq!(event.data["github_token"], "[REDACTED]");
        assert_eq!(event.data["url"], "https://example.com");
    }

    #[test]
    fn clean_strings_pass_through() {
        assert_eq!(redact_str("plain message"), "plain message");
    }
}
