//! The per-platform adapter contract and shared payload helpers.

use crate::error::AdapterError;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::platform::Platform;
use regex_lite::Regex;
use serde_json::Value;
use tracing::warn;

/// What a matched endpoint may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Text is captured but never rewritten.
    Observe,
    /// Text is captured and the call is eligible for injection.
    Completion,
}

/// A request body in one of the shapes chat platforms send.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    /// URL-encoded form body, kept verbatim so untouched parameters
    /// survive byte for byte.
    Form(String),
}

impl Payload {
    /// Classify a raw body.
    pub fn parse(body: &str) -> Result<Self, AdapterError> {
        match serde_json::from_str::<Value>(body) {
            Ok(v) => Ok(Payload::Json(v)),
            Err(_) if body.contains('=') && !body.trim_start().starts_with(['{', '[']) => {
                Ok(Payload::Form(body.to_string()))
            }
            Err(e) => Err(AdapterError::Json(e)),
        }
    }

    /// Serialize back to a body string.
    pub fn into_body(self) -> Result<String, AdapterError> {
        match self {
            Payload::Json(v) => Ok(serde_json::to_string(&v)?),
            Payload::Form(raw) => Ok(raw),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Form(_) => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Form(_) => None,
        }
    }
}

/// Per-platform knowledge of endpoints and payload shapes.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Classify `url`, or `None` when it is not this platform's chat traffic.
    fn match_endpoint(&self, url: &str) -> Option<EndpointKind>;

    /// The user's message in `payload`, if the shape is recognized.
    fn extract_text(&self, payload: &Payload) -> Option<String>;

    /// Append the descriptor's context to the first field holding its
    /// original message. Returns whether a field was rewritten.
    fn inject_text(
        &self,
        payload: &mut Payload,
        descriptor: &InjectionDescriptor,
    ) -> Result<bool, AdapterError>;
}

/// Compile an endpoint pattern. An invalid pattern disables the adapter's
/// matching instead of failing construction.
pub(crate) fn endpoint_pattern(source: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = source, error = %e, "Invalid endpoint pattern");
            None
        }
    }
}

/// Whether `re` matches `url`; a missing pattern never matches.
pub(crate) fn url_matches(re: &Option<Regex>, url: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(url))
}

/// Append to `slot` when it is a string holding the original message.
pub(crate) fn append_if_target(slot: &mut Value, descriptor: &InjectionDescriptor) -> bool {
    match slot {
        Value::String(s) if descriptor.targets(s) => {
            s.push_str(&descriptor.injection_text);
            true
        }
        _ => false,
    }
}

/// Probe `keys` of an object in order and append to the first match.
pub(crate) fn append_to_first_key(
    obj: &mut Value,
    keys: &[&str],
    descriptor: &InjectionDescriptor,
) -> bool {
    keys.iter().any(|k| {
        obj.get_mut(*k)
            .map(|slot| append_if_target(slot, descriptor))
            .unwrap_or(false)
    })
}

/// First non-empty string among `keys`.
pub(crate) fn first_string(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Text of the last entry in a `messages` array: either `content.parts`
/// joined by newlines or a plain `content` string.
pub(crate) fn last_message_text(body: &Value) -> Option<String> {
    let last = body.get("messages")?.as_array()?.last()?;
    let content = last.get("content")?;
    if let Some(parts) = content.get("parts").and_then(Value::as_array) {
        let joined = parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        return (!joined.trim().is_empty()).then_some(joined);
    }
    content
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}

/// Rewrite the last entry of a `messages` array: a matching `content.parts`
/// element first, then a plain `content` string.
pub(crate) fn inject_last_message(body: &mut Value, descriptor: &InjectionDescriptor) -> bool {
    let Some(last) = body
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|m| m.last_mut())
    else {
        return false;
    };
    let Some(content) = last.get_mut("content") else {
        return false;
    };
    if let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) {
        return parts.iter_mut().any(|p| append_if_target(p, descriptor));
    }
    append_if_target(content, descriptor)
}

/// Assistant text in a JSON response body.
pub fn incoming_text(body: &Value) -> Option<String> {
    if let Some(content) = body.get("message").and_then(|m| m.get("content")) {
        if let Some(parts) = content.get("parts").and_then(Value::as_array) {
            let joined = parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n");
            return (!joined.is_empty()).then_some(joined);
        }
        if let Some(s) = content.as_str() {
            return Some(s.to_string());
        }
    }
    let choice = body.get("choices")?.as_array()?.first()?;
    choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .or_else(|| {
            choice
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
        })
        .or_else(|| choice.get("text").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_classification() {
        assert!(matches!(Payload::parse(r#"{"a":1}"#), Ok(Payload::Json(_))));
        assert!(matches!(Payload::parse("f.req=%5B%5D&at=x"), Ok(Payload::Form(_))));
        assert!(Payload::parse("{broken").is_err());
        assert!(Payload::parse("plain text").is_err());
    }

    #[test]
    fn test_incoming_heuristics() {
        assert_eq!(
            incoming_text(&json!({"message": {"content": {"parts": ["a", "b"]}}})).as_deref(),
            Some("a\nb")
        );
        assert_eq!(
            incoming_text(&json!({"choices": [{"delta": {"content": "hi"}}]})).as_deref(),
            Some("hi")
        );
        assert_eq!(
            incoming_text(&json!({"choices": [{"message": {"content": "yo"}}]})).as_deref(),
            Some("yo")
        );
        assert_eq!(
            incoming_text(&json!({"choices": [{"text": "t"}]})).as_deref(),
            Some("t")
        );
        assert!(incoming_text(&json!({"status": "ok"})).is_none());
    }

    #[test]
    fn test_first_key_probe_stops_at_first_match() {
        let d = InjectionDescriptor::new("hello", " [ctx]");
        let mut body = json!({"text": "other", "message": " hello ", "content": "hello"});
        assert!(append_to_first_key(&mut body, &["text", "message", "content"], &d));
        assert_eq!(body["message"], " hello  [ctx]");
        assert_eq!(body["content"], "hello");
    }
}
