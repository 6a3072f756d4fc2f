//! ChatGPT adapter.
//!
//! Conversation calls carry a `messages` array whose last entry holds the
//! user's text in `content.parts`. Older shapes use `input` or `prompt`.

use crate::adapter::{
    append_to_first_key, endpoint_pattern, first_string, inject_last_message,
    last_message_text, url_matches, EndpointKind, Payload, PlatformAdapter,
};
use crate::error::AdapterError;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::platform::Platform;
use regex_lite::Regex;

pub struct ChatGptAdapter {
    endpoint: Option<Regex>,
}

impl ChatGptAdapter {
    pub fn new() -> Self {
        Self {
            endpoint: endpoint_pattern(r"(?i)conversation|backend-api"),
        }
    }
}

impl Default for ChatGptAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for ChatGptAdapter {
    fn platform(&self) -> Platform {
        Platform::ChatGpt
    }

    fn match_endpoint(&self, url: &str) -> Option<EndpointKind> {
        url_matches(&self.endpoint, url).then_some(EndpointKind::Completion)
    }

    fn extract_text(&self, payload: &Payload) -> Option<String> {
        let body = payload.as_json()?;
        last_message_text(body).or_else(|| first_string(body, &["input", "prompt"]))
    }

    fn inject_text(
        &self,
        payload: &mut Payload,
        descriptor: &InjectionDescriptor,
    ) -> Result<bool, AdapterError> {
        let body = payload
            .as_json_mut()
            .ok_or_else(|| AdapterError::Shape("expected a JSON body".into()))?;
        if body.get("messages").is_some_and(|m| m.is_array()) {
            return Ok(inject_last_message(body, descriptor));
        }
        Ok(append_to_first_key(body, &["prompt"], descriptor))
    }
}
