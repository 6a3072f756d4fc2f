//! Claude adapter.
//!
//! Any organization conversation call is captured, but only the
//! `/completion` call is rewritten. Its text lives in `prompt`, either a
//! string or an array of `{text}` blocks, with a handful of alternative
//! field names as a fallback.

use crate::adapter::{
    append_if_target, append_to_first_key, endpoint_pattern, first_string, url_matches,
    EndpointKind, Payload, PlatformAdapter,
};
use crate::error::AdapterError;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::platform::Platform;
use regex_lite::Regex;
use serde_json::Value;

const FALLBACK_FIELDS: &[&str] = &["text", "message", "content", "message_text", "message_content"];

pub struct ClaudeAdapter {
    completion: Option<Regex>,
    conversation: Option<Regex>,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self {
            completion: endpoint_pattern(r"(?i)/api/organizations.*/completion"),
            conversation: endpoint_pattern(r"(?i)/api/organizations.*/chat_conversations|/messages"),
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for ClaudeAdapter {
    fn platform(&self) -> Platform {
        Platform::Claude
    }

    fn match_endpoint(&self, url: &str) -> Option<EndpointKind> {
        if url_matches(&self.completion, url) {
            Some(EndpointKind::Completion)
        } else if url_matches(&self.conversation, url) {
            Some(EndpointKind::Observe)
        } else {
            None
        }
    }

    fn extract_text(&self, payload: &Payload) -> Option<String> {
        let body = payload.as_json()?;
        match body.get("prompt") {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.clone()),
            Some(Value::Array(blocks)) => {
                let joined = blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");
                if !joined.trim().is_empty() {
                    return Some(joined);
                }
            }
            _ => {}
        }
        first_string(body, FALLBACK_FIELDS)
    }

    fn inject_text(
        &self,
        payload: &mut Payload,
        descriptor: &InjectionDescriptor,
    ) -> Result<bool, AdapterError> {
        let body = payload
            .as_json_mut()
            .ok_or_else(|| AdapterError::Shape("expected a JSON body".into()))?;
        let injected = match body.get_mut("prompt") {
            Some(Value::Array(blocks)) => blocks.iter_mut().any(|b| {
                b.get_mut("text")
                    .is_some_and(|t| append_if_target(t, descriptor))
            }),
            Some(prompt) => append_if_target(prompt, descriptor),
            None => false,
        };
        Ok(injected || append_to_first_key(body, FALLBACK_FIELDS, descriptor))
    }
}
