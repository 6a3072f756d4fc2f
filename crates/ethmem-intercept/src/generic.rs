//! Fallback adapter for OpenAI-compatible and Ollama-style chat APIs.

use crate::adapter::{
    append_to_first_key, endpoint_pattern, first_string, inject_last_message, last_message_text,
    url_matches, EndpointKind, Payload, PlatformAdapter,
};
use crate::error::AdapterError;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::platform::Platform;
use regex_lite::Regex;

const CANDIDATE_KEYS: &[&str] = &["prompt", "input", "message", "text", "query", "content"];

pub struct GenericAdapter {
    endpoint: Option<Regex>,
}

impl GenericAdapter {
    pub fn new() -> Self {
        Self {
            endpoint: endpoint_pattern(r"(?i)/chat/completions|/completions$|/api/chat|/api/generate"),
        }
    }
}

impl Default for GenericAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformAdapter for GenericAdapter {
    fn platform(&self) -> Platform {
        Platform::Generic
    }

    fn match_endpoint(&self, url: &str) -> Option<EndpointKind> {
        url_matches(&self.endpoint, url).then_some(EndpointKind::Completion)
    }

    fn extract_text(&self, payload: &Payload) -> Option<String> {
        let body = payload.as_json()?;
        last_message_text(body).or_else(|| first_string(body, CANDIDATE_KEYS))
    }

    fn inject_text(
        &self,
        payload: &mut Payload,
        descriptor: &InjectionDescriptor,
    ) -> Result<bool, AdapterError> {
        let body = payload
            .as_json_mut()
            .ok_or_else(|| AdapterError::Shape("expected a JSON body".into()))?;
        Ok(inject_last_message(body, descriptor)
            || append_to_first_key(body, CANDIDATE_KEYS, descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_completions_shape() {
        let a = GenericAdapter::new();
        assert_eq!(
            a.match_endpoint("http://localhost:11434/api/chat"),
            Some(EndpointKind::Completion)
        );
        assert_eq!(
            a.match_endpoint("https://api.example.com/v1/chat/completions"),
            Some(EndpointKind::Completion)
        );
        assert_eq!(a.match_endpoint("https://api.example.com/v1/models"), None);

        let mut p = Payload::Json(json!({
            "model": "m",
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "I speak French"}
            ]
        }));
        assert_eq!(a.extract_text(&p).as_deref(), Some("I speak French"));
        assert!(a
            .inject_text(&mut p, &InjectionDescriptor::new("I speak French", "!"))
            .unwrap());
        assert_eq!(p.as_json().unwrap()["messages"][1]["content"], "I speak French!");
        assert_eq!(p.as_json().unwrap()["messages"][0]["content"], "be nice");
    }
}
