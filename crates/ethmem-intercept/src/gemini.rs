//! Gemini adapter.
//!
//! The web client posts a form body whose `f.req` parameter is a JSON array
//! `[null, "<inner JSON>"]`; the message is `inner[0][0]`. Only that one
//! parameter is rewritten, every other parameter is left byte for byte.
//! JSON bodies are handled by probing nested arrays and common field names.

use crate::adapter::{
    append_if_target, append_to_first_key, endpoint_pattern, first_string, url_matches,
    EndpointKind, Payload, PlatformAdapter,
};
use crate::error::AdapterError;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::platform::Platform;
use regex_lite::Regex;
use serde_json::Value;
use url::form_urlencoded;

const FREQ_KEY: &str = "f.req";
const CANDIDATE_KEYS: &[&str] = &["text", "prompt", "message", "input", "query", "content"];

pub struct GeminiAdapter {
    endpoint: Option<Regex>,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            endpoint: endpoint_pattern(
                r"(?i)streamGenerate|generateContent|_/BardChatUi|BardFrontendService",
            ),
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Position and decoded value of the `f.req` parameter in a form body.
fn find_freq(raw: &str) -> Option<(usize, String)> {
    raw.split('&').enumerate().find_map(|(i, segment)| {
        form_urlencoded::parse(segment.as_bytes())
            .next()
            .filter(|(k, _)| k == FREQ_KEY)
            .map(|(_, v)| (i, v.into_owned()))
    })
}

/// Decode `[null, "<inner>"]` into the outer array and the parsed inner value.
fn unwrap_freq(decoded: &str) -> Result<(Value, Value), AdapterError> {
    let outer: Value = serde_json::from_str(decoded)?;
    let inner_src = outer
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::Shape("f.req[1] is not a string".into()))?;
    let inner: Value = serde_json::from_str(inner_src)?;
    Ok((outer, inner))
}

fn inner_message(inner: &Value) -> Option<&str> {
    inner.get(0)?.get(0)?.as_str()
}

fn inject_form(raw: &mut String, descriptor: &InjectionDescriptor) -> Result<bool, AdapterError> {
    let (index, decoded) = find_freq(raw)
        .ok_or_else(|| AdapterError::Shape("no f.req parameter".into()))?;
    let (mut outer, mut inner) = unwrap_freq(&decoded)?;
    let Some(slot) = inner.get_mut(0).and_then(|v| v.get_mut(0)) else {
        return Ok(false);
    };
    if !append_if_target(slot, descriptor) {
        return Ok(false);
    }
    if let Some(wrapped) = outer.get_mut(1) {
        *wrapped = Value::String(serde_json::to_string(&inner)?);
    }
    let encoded: String =
        form_urlencoded::byte_serialize(serde_json::to_string(&outer)?.as_bytes()).collect();
    let rebuilt = raw
        .split('&')
        .enumerate()
        .map(|(i, segment)| {
            if i == index {
                format!("{FREQ_KEY}={encoded}")
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&");
    *raw = rebuilt;
    Ok(true)
}

fn inject_json(body: &mut Value, descriptor: &InjectionDescriptor) -> bool {
    if let Value::Array(items) = body {
        for item in items.iter_mut() {
            let hit = match item {
                Value::Array(nested) => nested.iter_mut().any(|n| append_if_target(n, descriptor)),
                other => append_if_target(other, descriptor),
            };
            if hit {
                return true;
            }
        }
        return false;
    }
    append_to_first_key(body, CANDIDATE_KEYS, descriptor)
}

impl PlatformAdapter for GeminiAdapter {
    fn platform(&self) -> Platform {
        Platform::Gemini
    }

    fn match_endpoint(&self, url: &str) -> Option<EndpointKind> {
        url_matches(&self.endpoint, url).then_some(EndpointKind::Completion)
    }

    fn extract_text(&self, payload: &Payload) -> Option<String> {
        match payload {
            Payload::Form(raw) => {
                let (_, decoded) = find_freq(raw)?;
                let (_, inner) = unwrap_freq(&decoded).ok()?;
                inner_message(&inner)
                    .filter(|s| !s.trim().is_empty())
                    .map(String::from)
            }
            Payload::Json(body) => first_string(body, CANDIDATE_KEYS),
        }
    }

    fn inject_text(
        &self,
        payload: &mut Payload,
        descriptor: &InjectionDescriptor,
    ) -> Result<bool, AdapterError> {
        match payload {
            Payload::Form(raw) => inject_form(raw, descriptor),
            Payload::Json(body) => Ok(inject_json(body, descriptor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form_body(message: &str) -> String {
        let inner = json!([[message, 0, null, null, null, null, 0], ["en"], ["", "", ""]]);
        let outer = json!([null, serde_json::to_string(&inner).unwrap()]);
        let encoded: String =
            form_urlencoded::byte_serialize(serde_json::to_string(&outer).unwrap().as_bytes())
                .collect();
        format!("f.req={encoded}&at=AJvLN6M%3A1700000000000&")
    }

    #[test]
    fn test_endpoint_matching() {
        let a = GeminiAdapter::new();
        let url = "https://gemini.google.com/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate?bl=x";
        assert_eq!(a.match_endpoint(url), Some(EndpointKind::Completion));
        assert_eq!(a.match_endpoint("https://play.google.com/log"), None);
    }

    #[test]
    fn test_form_extract_and_splice() {
        let a = GeminiAdapter::new();
        let raw = form_body("I love sushi");
        let mut p = Payload::parse(&raw).unwrap();
        assert_eq!(a.extract_text(&p).as_deref(), Some("I love sushi"));

        let d = InjectionDescriptor::new("I love sushi", "\n\n[Personal Context: User is from delhi]");
        assert!(a.inject_text(&mut p, &d).unwrap());
        let Payload::Form(rewritten) = &p else {
            panic!("form body expected");
        };
        assert!(rewritten.ends_with("&at=AJvLN6M%3A1700000000000&"));
        assert_eq!(
            a.extract_text(&p).as_deref(),
            Some("I love sushi\n\n[Personal Context: User is from delhi]")
        );
    }

    #[test]
    fn test_form_mismatch_and_bad_shape() {
        let a = GeminiAdapter::new();
        let raw = form_body("hello");
        let mut p = Payload::Form(raw.clone());
        assert!(!a
            .inject_text(&mut p, &InjectionDescriptor::new("bye", "!"))
            .unwrap());
        assert_eq!(p, Payload::Form(raw));

        let mut broken = Payload::Form("f.req=%5Bnull%5D&at=x".into());
        assert!(a
            .inject_text(&mut broken, &InjectionDescriptor::new("bye", "!"))
            .is_err());
        let mut missing = Payload::Form("at=x".into());
        assert!(a
            .inject_text(&mut missing, &InjectionDescriptor::new("bye", "!"))
            .is_err());
    }

    #[test]
    fn test_json_shapes() {
        let a = GeminiAdapter::new();
        let mut nested = Payload::Json(json!([[null, "hello"], "x"]));
        assert!(a
            .inject_text(&mut nested, &InjectionDescriptor::new("hello", "!"))
            .unwrap());
        assert_eq!(nested.as_json().unwrap()[0][1], "hello!");

        let mut obj = Payload::Json(json!({"query": "hello"}));
        assert_eq!(a.extract_text(&obj).as_deref(), Some("hello"));
        assert!(a
            .inject_text(&mut obj, &InjectionDescriptor::new("hello", "!"))
            .unwrap());
        assert_eq!(obj.as_json().unwrap()["query"], "hello!");
    }
}
