//! Local model resource state and the model catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Residency state of a model in the shared inference resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ModelState {
    /// Not resident.
    Unloaded,
    /// A load is in flight.
    Loading,
    /// Resident and usable.
    Loaded,
    /// The last operation failed. Recovery requires an explicit retry.
    Error(String),
}

impl ModelState {
    /// Whether this is the `Loaded` state.
    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelState::Loaded)
    }
}

impl Default for ModelState {
    fn default() -> Self {
        ModelState::Unloaded
    }
}

impl fmt::Display for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelState::Unloaded => f.write_str("unloaded"),
            ModelState::Loading => f.write_str("loading"),
            ModelState::Loaded => f.write_str("loaded"),
            ModelState::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Pipeline task a model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelTask {
    /// Encoder-decoder instruction models.
    #[serde(rename = "text2text-generation")]
    Text2TextGeneration,
    /// Decoder-only chat models.
    #[serde(rename = "text-generation")]
    TextGeneration,
}

impl ModelTask {
    /// Stable task name understood by the model host.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTask::Text2TextGeneration => "text2text-generation",
            ModelTask::TextGeneration => "text-generation",
        }
    }
}

/// What an inference call is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceTask {
    /// Memory extraction from an utterance.
    Extraction,
    /// Relevance ranking of stored memories.
    Ranking,
}

/// A catalog entry for a locally hosted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    /// Short id used in configuration.
    pub id: &'static str,
    /// Full model name passed to the host.
    pub name: &'static str,
    /// Pipeline task.
    pub task: ModelTask,
}

/// Id used when a configured model is not in the catalog.
pub const FALLBACK_MODEL_ID: &str = "flan-t5-base";

/// Known local models.
pub const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: "lamini-flan-t5",
        name: "Xenova/LaMini-Flan-T5-783M",
        task: ModelTask::Text2TextGeneration,
    },
    ModelSpec {
        id: "flan-t5-base",
        name: "Xenova/flan-t5-base",
        task: ModelTask::Text2TextGeneration,
    },
    ModelSpec {
        id: "phi-3-mini",
        name: "Xenova/Phi-3-mini-4k-instruct",
        task: ModelTask::TextGeneration,
    },
];

/// Look up a model by id, falling back to the default entry for unknown ids.
pub fn model_spec(id: &str) -> ModelSpec {
    MODEL_CATALOG
        .iter()
        .find(|m| m.id == id)
        .or_else(|| MODEL_CATALOG.iter().find(|m| m.id == FALLBACK_MODEL_ID))
        .copied()
        .unwrap_or(ModelSpec {
            id: FALLBACK_MODEL_ID,
            name: "Xenova/flan-t5-base",
            task: ModelTask::Text2TextGeneration,
        })
}
