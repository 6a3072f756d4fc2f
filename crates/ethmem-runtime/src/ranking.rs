//! RankingEngine: picks the stored memories most relevant to a message.
//!
//! With a ready model the engine asks it for a comma-separated list of
//! indices into an enumerated listing. Otherwise, or when the model errors
//! or returns nothing usable, a deterministic keyword/recency score is used.

use ethmem_types::config::RankingConfig;
use ethmem_types::memory::{now_millis, Memory};
use ethmem_types::model::InferenceTask;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::lifecycle::InferenceResource;

const DAY_MS: f64 = 86_400_000.0;

/// Ranking over the model strategy and the deterministic fallback.
pub struct RankingEngine {
    config: RankingConfig,
    model: Option<Arc<dyn InferenceResource>>,
}

impl RankingEngine {
    pub fn new(config: RankingConfig, model: Option<Arc<dyn InferenceResource>>) -> Self {
        Self { config, model }
    }

    /// Up to `top_n` memories, most relevant first.
    pub async fn rank(&self, message: &str, memories: &[Memory], top_n: usize) -> Vec<Memory> {
        if memories.is_empty() || top_n == 0 {
            return Vec::new();
        }
        if let Some(model) = &self.model {
            if model.is_ready().await {
                let prompt = ranking_prompt(message, memories, top_n);
                match model.infer(InferenceTask::Ranking, &prompt).await {
                    Ok(output) => {
                        let picked = parse_rank_indices(&output, memories.len(), top_n);
                        if !picked.is_empty() {
                            debug!(count = picked.len(), "Ranked by model");
                            return picked.into_iter().map(|i| memories[i].clone()).collect();
                        }
                        debug!(output = %output, "Model returned no usable indices");
                    }
                    Err(e) => warn!(error = %e, "Model ranking failed; using fallback"),
                }
            }
        }
        fallback_rank(message, memories, top_n, now_millis(), &self.config)
    }
}

/// Enumerated listing of `memories` (0-based) followed by the question.
pub fn ranking_prompt(message: &str, memories: &[Memory], top_n: usize) -> String {
    let mut prompt = format!("User's message: \"{message}\"\n\nAvailable memories:\n");
    for (i, m) in memories.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{i}. {}: {} ({})",
            m.category, m.entity, m.context.platform
        );
    }
    let _ = write!(
        prompt,
        "\nTask: Which memories are most relevant to this message? \
         Return ONLY the indices (numbers) of the top {top_n} most relevant memories, separated by commas.\n\
         Example output: 0,3,7,12,15\n\nRelevant indices: "
    );
    prompt
}

/// Parse model output into distinct in-range indices, at most `top_n`.
/// Tokens are read like `parseInt`: leading digits count, anything else drops.
pub fn parse_rank_indices(output: &str, len: usize, top_n: usize) -> Vec<usize> {
    let mut seen = HashSet::new();
    output
        .split(',')
        .filter_map(|token| {
            let digits: String = token
                .trim()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse::<usize>().ok()
        })
        .filter(|&i| i < len && seen.insert(i))
        .take(top_n)
        .collect()
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
}

/// Score of one memory, or `None` when it does not qualify.
///
/// Qualification needs keyword overlap or a positive recency boost; the
/// confidence boost only orders memories that already qualify.
pub fn fallback_score(
    message_tokens: &HashSet<String>,
    memory: &Memory,
    now_ms: i64,
    config: &RankingConfig,
) -> Option<f64> {
    let haystack: HashSet<String> = tokens(&format!(
        "{} {} {}",
        memory.category, memory.entity, memory.context.platform
    ))
    .collect();
    let overlap = message_tokens
        .iter()
        .filter(|t| haystack.contains(*t))
        .count() as f64;

    let age_days = ((now_ms - memory.timestamp).max(0) as f64) / DAY_MS;
    let window = config.recency_window_days.max(f64::EPSILON);
    let recency = (1.0 - age_days / window).max(0.0) * config.recency_weight;
    let confidence = memory.metadata.confidence * config.confidence_weight;

    (overlap + recency > 0.0).then_some(overlap + recency + confidence)
}

/// Deterministic keyword/recency ranking. Ties keep input order.
pub fn fallback_rank(
    message: &str,
    memories: &[Memory],
    top_n: usize,
    now_ms: i64,
    config: &RankingConfig,
) -> Vec<Memory> {
    let message_tokens: HashSet<String> = tokens(message).collect();
    let mut scored: Vec<(f64, &Memory)> = memories
        .iter()
        .filter_map(|m| fallback_score(&message_tokens, m, now_ms, config).map(|s| (s, m)))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(top_n)
        .map(|(_, m)| m.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ModelError;
    use async_trait::async_trait;
    use ethmem_types::memory::{Category, MemoryContext};

    fn memory(category: &str, entity: &str, confidence: f64, age_days: f64, now: i64) -> Memory {
        let mut m = Memory::new(
            "src",
            Category::new(category),
            entity,
            None,
            MemoryContext::for_platform("chatgpt"),
            confidence,
            "pattern-based",
        );
        m.timestamp = now - (age_days * DAY_MS) as i64;
        m
    }

    struct ScriptedModel(Result<String, ()>);

    #[async_trait]
    impl InferenceResource for ScriptedModel {
        async fn is_ready(&self) -> bool {
            true
        }
        async fn active_model(&self) -> Option<String> {
            Some("flan-t5-base".into())
        }
        async fn infer(&self, _task: InferenceTask, _input: &str) -> Result<String, ModelError> {
            self.0.clone().map_err(|_| ModelError::NotReady)
        }
    }

    #[test]
    fn test_food_question_ranks_recent_match_and_drops_stale() {
        let now = 1_700_000_000_000;
        let pizza = memory("food", "pizza", 0.9, 1.0, now);
        let denver = memory("location", "denver", 0.85, 40.0, now);
        let cfg = RankingConfig::default();

        let tokens: HashSet<String> = tokens("what food do I like").collect();
        let pizza_score = fallback_score(&tokens, &pizza, now, &cfg).unwrap();
        let expected = 1.0 + (1.0 - 1.0 / 30.0) * 0.5 + 0.9 * 0.3;
        assert!((pizza_score - expected).abs() < 1e-9);
        assert!(fallback_score(&tokens, &denver, now, &cfg).is_none());

        let ranked = fallback_rank(
            "what food do I like",
            &[denver.clone(), pizza.clone()],
            5,
            now,
            &cfg,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, pizza.id);
    }

    #[test]
    fn test_fallback_is_deterministic_and_stable() {
        let now = 1_700_000_000_000;
        let a = memory("hobby", "chess", 0.8, 2.0, now);
        let b = memory("hobby", "chess", 0.8, 2.0, now);
        let c = memory("food", "ramen", 0.9, 100.0, now);
        let input = vec![a.clone(), b.clone(), c];
        let cfg = RankingConfig::default();
        let first = fallback_rank("any chess tips?", &input, 5, now, &cfg);
        let second = fallback_rank("any chess tips?", &input, 5, now, &cfg);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].id, a.id);
        assert_eq!(first[1].id, b.id);
    }

    #[test]
    fn test_fallback_truncates_to_top_n() {
        let now = 1_700_000_000_000;
        let input: Vec<Memory> = (0..8)
            .map(|i| memory("food", &format!("dish{i}"), 0.7, i as f64, now))
            .collect();
        let ranked = fallback_rank("food", &input, 3, now, &RankingConfig::default());
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].entity, "dish0");
    }

    #[test]
    fn test_parse_rank_indices_is_permissive() {
        assert_eq!(parse_rank_indices("0,3, 1", 4, 5), vec![0, 3, 1]);
        assert_eq!(parse_rank_indices("2, x, 9, 2, 1abc", 4, 5), vec![2, 1]);
        assert_eq!(parse_rank_indices("0,1,2,3", 4, 2), vec![0, 1]);
        assert!(parse_rank_indices("none are relevant", 4, 5).is_empty());
        assert!(parse_rank_indices("-1", 4, 5).is_empty());
    }

    #[test]
    fn test_prompt_lists_memories() {
        let now = now_millis();
        let prompt = ranking_prompt(
            "hello",
            &[memory("food", "pizza", 0.9, 0.0, now), memory("name", "alex", 0.9, 0.0, now)],
            5,
        );
        assert!(prompt.contains("0. food: pizza (chatgpt)"));
        assert!(prompt.contains("1. name: alex (chatgpt)"));
        assert!(prompt.ends_with("Relevant indices: "));
    }

    #[tokio::test]
    async fn test_model_strategy_maps_indices() {
        let now = now_millis();
        let input = vec![
            memory("food", "pizza", 0.9, 0.0, now),
            memory("name", "alex", 0.9, 0.0, now),
        ];
        let engine = RankingEngine::new(
            RankingConfig::default(),
            Some(Arc::new(ScriptedModel(Ok("1, 0".into())))),
        );
        let ranked = engine.rank("who am i", &input, 5).await;
        assert_eq!(ranked[0].entity, "alex");
        assert_eq!(ranked[1].entity, "pizza");
    }

    #[tokio::test]
    async fn test_model_error_uses_fallback() {
        let now = now_millis();
        let input = vec![memory("food", "pizza", 0.9, 100.0, now)];
        let engine = RankingEngine::new(
            RankingConfig::default(),
            Some(Arc::new(ScriptedModel(Err(())))),
        );
        let ranked = engine.rank("pizza tonight?", &input, 5).await;
        assert_eq!(ranked.len(), 1);
        assert!(engine.rank("pizza", &[], 5).await.is_empty());
    }
}
