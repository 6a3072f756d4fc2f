//! ExtractionEngine: turns one utterance into at most one memory.
//!
//! Strategies are tried in a fixed order: the remote completion endpoint
//! (when a credential is configured), the local model (when the lifecycle
//! manager reports ready), and finally the rule cascade. A strategy that
//! errors or yields nothing hands over to the next one. Every candidate
//! passes the same validation before a [`Memory`] is built.
//!
//! # Rule cascade
//!
//! [`RULES`] is evaluated top to bottom against the lowercased text and the
//! first rule that yields an entity wins. Reordering the table changes
//! results: "I am 30" must stay an age and never become a name, so `name`
//! rejects digits by construction and `age` comes after it.

use ethmem_types::config::RemoteConfig;
use ethmem_types::memory::{
    Category, Memory, MemoryContext, CONFIDENCE_THRESHOLD, DEFAULT_CONFIDENCE,
    KNOWN_CATEGORIES, MODEL_PATTERN_BASED,
};
use ethmem_types::model::InferenceTask;
use regex_lite::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

use crate::lifecycle::InferenceResource;
use crate::llm::{extract_json_object, CompletionDriver, CompletionRequest};

/// How a rule's captured entity is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityShape {
    /// A single word. Filler words are skipped.
    Word,
    /// A run of words, trimmed.
    Phrase,
    /// Digits.
    Number,
}

/// One entry of the ordered cascade.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub category: &'static str,
    /// Group 1 is the trigger phrase, group 2 the entity.
    pub pattern: &'static str,
    pub confidence: f64,
    pub shape: EntityShape,
}

/// The cascade, in evaluation order.
pub const RULES: &[Rule] = &[
    Rule {
        category: "location",
        pattern: r"\b(live in|from|in)\s+([a-z]+)",
        confidence: 0.85,
        shape: EntityShape::Word,
    },
    Rule {
        category: "name",
        pattern: r"\b(my name is|i am|i'm|call me)\s+([a-z]+)",
        confidence: 0.90,
        shape: EntityShape::Word,
    },
    Rule {
        category: "age",
        pattern: r"\b(i am|i'm|age)\s+(\d+)",
        confidence: 0.88,
        shape: EntityShape::Number,
    },
    Rule {
        category: "occupation",
        pattern: r"\b(i am a|i'm a|i work as|my job is)\s+([a-z\s]+)",
        confidence: 0.82,
        shape: EntityShape::Phrase,
    },
    Rule {
        category: "food",
        pattern: r"\b(i like|i love|i enjoy|i hate|i dislike|favorite food|favourite food)\s+([a-z\s]+)",
        confidence: 0.85,
        shape: EntityShape::Phrase,
    },
    Rule {
        category: "hobby",
        pattern: r"\b(hobby|hobbies|i enjoy|i like to|i love to)\s+([a-z\s]+)",
        confidence: 0.78,
        shape: EntityShape::Phrase,
    },
    Rule {
        category: "skill",
        pattern: r"\b(i know|i can|skilled in|expert in)\s+([a-z\s]+)",
        confidence: 0.80,
        shape: EntityShape::Phrase,
    },
    Rule {
        category: "language",
        pattern: r"\b(i speak|i know|fluent in|language)\s+([a-z]+)",
        confidence: 0.85,
        shape: EntityShape::Word,
    },
    Rule {
        category: "visited",
        pattern: r"\b(visited|been to|traveled to|went to)\s+([a-z\s]+)",
        confidence: 0.83,
        shape: EntityShape::Phrase,
    },
];

/// Single words that follow a trigger phrase without naming anything.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "not", "from", "in", "so", "just", "very", "really", "here", "going",
    "trying", "looking", "my", "this", "that",
];

/// A rule hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub category: &'static str,
    pub entity: String,
    pub confidence: f64,
    pub description: Option<String>,
}

struct CompiledRule {
    rule: &'static Rule,
    regex: Regex,
}

fn cascade() -> &'static [CompiledRule] {
    static CASCADE: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    CASCADE.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|rule| match Regex::new(rule.pattern) {
                Ok(regex) => Some(CompiledRule { rule, regex }),
                Err(e) => {
                    warn!(category = rule.category, error = %e, "Skipping rule with invalid pattern");
                    None
                }
            })
            .collect()
    })
}

/// Food descriptions follow the sentiment of the trigger phrase.
fn food_description(trigger: &str, entity: &str) -> String {
    if trigger.contains("hate") || trigger.contains("dislike") {
        format!("User dislikes {entity}")
    } else if trigger.contains("love") || trigger.contains("favorite") || trigger.contains("favourite") {
        format!("User loves {entity}")
    } else {
        format!("User likes {entity}")
    }
}

/// Run the cascade over `text`. First rule with a usable entity wins.
pub fn match_rules(text: &str) -> Option<RuleMatch> {
    let lowered = text.to_lowercase();
    for compiled in cascade() {
        let rule = compiled.rule;
        for caps in compiled.regex.captures_iter(&lowered) {
            let (Some(trigger), Some(entity)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let entity = entity.as_str().trim();
            if entity.is_empty() {
                continue;
            }
            if rule.shape == EntityShape::Word && FILLER_WORDS.contains(&entity) {
                continue;
            }
            let description = (rule.category == "food")
                .then(|| food_description(trigger.as_str(), entity));
            return Some(RuleMatch {
                category: rule.category,
                entity: entity.to_string(),
                confidence: rule.confidence,
                description,
            });
        }
    }
    None
}

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub category: Category,
    pub entity: String,
    pub description: Option<String>,
    pub confidence: f64,
}

/// Validate a model-produced object: category and entity required,
/// confidence defaulted to 0.5, anything non-finite or below `threshold`
/// rejected.
/// Unknown categories pass with a warning.
pub fn validate_candidate(value: &Value, threshold: f64) -> Option<Candidate> {
    let category = value
        .get("category")
        .and_then(Value::as_str)
        .map(Category::new)
        .filter(|c| !c.as_str().is_empty())?;
    let entity = match value.get("entity")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if entity.is_empty() {
        return None;
    }
    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT_CONFIDENCE),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_CONFIDENCE),
        _ => DEFAULT_CONFIDENCE,
    };
    if !confidence.is_finite() || confidence < threshold {
        debug!(category = %category, confidence, threshold, "Candidate below confidence threshold");
        return None;
    }
    if !category.is_known() {
        warn!(category = %category, "Accepting memory with unknown category");
    }
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from);
    Some(Candidate {
        category,
        entity,
        description,
        confidence,
    })
}

/// System instruction for remote extraction.
pub const REMOTE_SYSTEM_PROMPT: &str =
    "You are a personal memory extraction assistant. Return only valid JSON.";

/// Structured prompt enumerating the category vocabulary.
pub fn remote_prompt(text: &str) -> String {
    format!(
        "You are a memory extraction system. Extract ONE important personal fact from this message.\n\n\
         Message: \"{text}\"\n\n\
         Return ONLY valid JSON with these fields:\n\
         - category: one of {categories}\n\
         - entity: the specific value (e.g. \"pizza\", \"Denver\", \"teacher\")\n\
         - description: one short sentence about the user\n\
         - confidence: a number between 0 and 1\n\n\
         If no clear fact exists, return {{\"category\": null, \"entity\": null, \"confidence\": 0}}",
        categories = KNOWN_CATEGORIES.join(", "),
    )
}

/// Prompt for the local text2text model.
pub fn local_prompt(text: &str) -> String {
    format!("extract personal fact: {text}")
}

struct RemoteStrategy {
    driver: Arc<dyn CompletionDriver>,
    temperature: f32,
    max_tokens: u32,
}

/// Extraction over the three strategies.
pub struct ExtractionEngine {
    remote: Option<RemoteStrategy>,
    model: Option<Arc<dyn InferenceResource>>,
    threshold: f64,
}

impl ExtractionEngine {
    /// Engine with default remote sampling parameters.
    pub fn new(
        remote: Option<Arc<dyn CompletionDriver>>,
        model: Option<Arc<dyn InferenceResource>>,
    ) -> Self {
        let defaults = RemoteConfig::default();
        Self {
            remote: remote.map(|driver| RemoteStrategy {
                driver,
                temperature: defaults.extraction_temperature,
                max_tokens: defaults.extraction_max_tokens,
            }),
            model,
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    /// Use sampling parameters from `config`.
    pub fn with_remote_config(mut self, config: &RemoteConfig) -> Self {
        if let Some(remote) = self.remote.as_mut() {
            remote.temperature = config.extraction_temperature;
            remote.max_tokens = config.extraction_max_tokens;
        }
        self
    }

    /// Override the confidence threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Extract at most one memory from `text` observed on `platform`.
    pub async fn extract(&self, text: &str, platform: &str) -> Option<Memory> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let context = || MemoryContext::for_platform(platform);

        if let Some(remote) = &self.remote {
            match self.extract_remote(remote, text).await {
                Some(c) => {
                    info!(category = %c.category, strategy = "remote", "Memory extracted");
                    return Some(self.build(text, c, context(), remote.driver.model()));
                }
                None => debug!("Remote extraction yielded nothing; trying next strategy"),
            }
        }

        if let Some(model) = &self.model {
            if model.is_ready().await {
                if let Some((c, model_id)) = self.extract_local(model.as_ref(), text).await {
                    info!(category = %c.category, strategy = "local", "Memory extracted");
                    return Some(self.build(text, c, context(), &model_id));
                }
            }
        }

        let hit = match_rules(text)?;
        if hit.confidence < self.threshold {
            debug!(category = hit.category, "Rule match below threshold");
            return None;
        }
        info!(category = hit.category, strategy = "rules", "Memory extracted");
        let candidate = Candidate {
            category: Category::new(hit.category),
            entity: hit.entity,
            description: hit.description,
            confidence: hit.confidence,
        };
        Some(self.build(text, candidate, context(), MODEL_PATTERN_BASED))
    }

    async fn extract_remote(&self, remote: &RemoteStrategy, text: &str) -> Option<Candidate> {
        let request = CompletionRequest {
            system: REMOTE_SYSTEM_PROMPT.to_string(),
            prompt: remote_prompt(text),
            temperature: remote.temperature,
            max_tokens: remote.max_tokens,
        };
        let reply = match remote.driver.complete(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Remote extraction failed");
                return None;
            }
        };
        let value = extract_json_object(&reply)?;
        validate_candidate(&value, self.threshold)
    }

    async fn extract_local(
        &self,
        model: &dyn InferenceResource,
        text: &str,
    ) -> Option<(Candidate, String)> {
        let output = match model.infer(InferenceTask::Extraction, &local_prompt(text)).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Local extraction failed");
                return None;
            }
        };
        let value = extract_json_object(&output)?;
        let candidate = validate_candidate(&value, self.threshold)?;
        let model_id = model.active_model().await.unwrap_or_default();
        Some((candidate, model_id))
    }

    fn build(&self, source: &str, c: Candidate, context: MemoryContext, model_used: &str) -> Memory {
        Memory::new(
            source,
            c.category,
            &c.entity,
            c.description,
            context,
            c.confidence,
            model_used,
        )
    }
}
