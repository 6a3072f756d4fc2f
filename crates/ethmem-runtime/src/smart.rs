//! Smart processing: one remote call that both picks relevant memories and
//! spots a new fact worth remembering.

use ethmem_types::memory::{Memory, CONFIDENCE_THRESHOLD};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::extraction::{validate_candidate, Candidate};
use crate::llm::{extract_json_object, CompletionDriver, CompletionRequest, LlmError};

pub const SMART_SYSTEM_PROMPT: &str = "You are a memory relevance analyzer. Identify which memories \
     genuinely help answer the question and detect new personal facts. If nothing is relevant, \
     return an empty list. Respond only with valid JSON.";

const SMART_TEMPERATURE: f32 = 0.3;
const SMART_MAX_TOKENS: u32 = 250;

/// Build the analysis prompt. Memories are numbered from 1.
pub fn smart_prompt(message: &str, memories: &[Memory]) -> String {
    let listing = if memories.is_empty() {
        "No memories yet.".to_string()
    } else {
        memories
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let text = if m.description.is_empty() {
                    &m.entity
                } else {
                    &m.description
                };
                format!("{}. [{}] {}", i + 1, m.category, text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "Stored memories about the user:\n{listing}\n\n\
         New message from the user:\n\"{message}\"\n\n\
         1. List the numbers of stored memories that would help answer this message. \
         Be generous with matches inside the same topic.\n\
         2. Decide whether the message states a lasting personal fact (identity, preference, \
         location, allergy, skill). Requests, questions and one-off plans are not facts.\n\n\
         Return ONLY valid JSON:\n\
         {{\"relevant\": [numbers], \"newMemory\": {{\"category\", \"entity\", \"description\", \"confidence\"}} or null}}\n\
         JSON:"
    )
}

/// Outcome of one analysis.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartAnalysis {
    /// Relevant memories in the order the model listed them.
    pub relevant: Vec<Memory>,
    /// A validated new fact, if the model found one.
    pub new_memory: Option<Candidate>,
}

/// Interpret a reply against `memories`. 1-based indices; unknown ones drop.
/// `None` when the reply carries no JSON object.
pub fn parse_smart_reply(reply: &str, memories: &[Memory], threshold: f64) -> Option<SmartAnalysis> {
    let Some(value) = extract_json_object(reply) else {
        debug!("Smart reply carried no JSON object");
        return None;
    };
    let mut seen = HashSet::new();
    let relevant = value
        .get("relevant")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_u64().or_else(|| v.as_str()?.trim().parse().ok()))
                .filter_map(|n| usize::try_from(n).ok()?.checked_sub(1))
                .filter(|&i| i < memories.len() && seen.insert(i))
                .map(|i| memories[i].clone())
                .collect()
        })
        .unwrap_or_default();
    let new_memory = value
        .get("newMemory")
        .filter(|v| v.is_object())
        .and_then(|v| validate_candidate(v, threshold));
    Some(SmartAnalysis {
        relevant,
        new_memory,
    })
}

/// Remote smart processor.
pub struct SmartProcessor {
    driver: Arc<dyn CompletionDriver>,
    threshold: f64,
}

impl SmartProcessor {
    pub fn new(driver: Arc<dyn CompletionDriver>) -> Self {
        Self {
            driver,
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Model name stamped on new memories.
    pub fn model(&self) -> &str {
        self.driver.model()
    }

    /// Analyze `message`. A failed call or a reply without a JSON object is
    /// an error so the caller can fall back to the local engines.
    pub async fn analyze(
        &self,
        message: &str,
        memories: &[Memory],
    ) -> Result<SmartAnalysis, LlmError> {
        let request = CompletionRequest {
            system: SMART_SYSTEM_PROMPT.to_string(),
            prompt: smart_prompt(message, memories),
            temperature: SMART_TEMPERATURE,
            max_tokens: SMART_MAX_TOKENS,
        };
        let reply = self.driver.complete(request).await?;
        parse_smart_reply(&reply, memories, self.threshold)
            .ok_or_else(|| LlmError::Parse("smart reply carried no JSON object".into()))
    }
}

/// Context block appended to an outgoing message, or empty when there is
/// nothing to add.
pub fn format_injection(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = memories
        .iter()
        .map(|m| {
            if m.description.is_empty() {
                format!("{}: {}", m.category, m.entity)
            } else {
                m.description.clone()
            }
        })
        .collect();
    format!("\n\n[Personal Context: {}]", parts.join(". "))
}
