//! Model-host RPC messages.
//!
//! Requests carry a `messageId`; every response for that request repeats it.
//! `MODEL_PROGRESS` may arrive any number of times before the final response.

use ethmem_types::model::ModelTask;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request to the model host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ModelRequest {
    /// Load `model` for `task`. The caller unloads any resident model first.
    LoadModel {
        message_id: u64,
        model_id: String,
        model: String,
        task: ModelTask,
    },
    /// Release the resident model.
    UnloadModel { message_id: u64, model_id: String },
    /// Run one generation against the resident model.
    RunInference {
        message_id: u64,
        model_id: String,
        input: String,
        task: ModelTask,
    },
}

impl ModelRequest {
    /// Correlation id of this request.
    pub fn message_id(&self) -> u64 {
        match self {
            ModelRequest::LoadModel { message_id, .. }
            | ModelRequest::UnloadModel { message_id, .. }
            | ModelRequest::RunInference { message_id, .. } => *message_id,
        }
    }
}

/// Kind of message coming back from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelEventKind {
    /// Host finished bootstrapping.
    #[serde(alias = "TRANSFORMERS_READY")]
    HostReady,
    /// Host failed to bootstrap.
    #[serde(alias = "TRANSFORMERS_ERROR")]
    HostError,
    ModelLoaded,
    ModelUnloaded,
    InferenceResult,
    ModelProgress,
    ModelError,
    InferenceError,
}

/// A message from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEvent {
    #[serde(rename = "type")]
    pub kind: ModelEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<u64>,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ModelEvent {
    /// A bare event of `kind` for `message_id`.
    pub fn new(kind: ModelEventKind, message_id: Option<u64>) -> Self {
        Self {
            kind,
            message_id,
            success: false,
            result: None,
            error: None,
            progress: None,
            model: None,
        }
    }

    /// Successful final response.
    pub fn ok(kind: ModelEventKind, message_id: u64, result: Option<Value>) -> Self {
        Self {
            success: true,
            result,
            ..Self::new(kind, Some(message_id))
        }
    }

    /// Failed final response.
    pub fn failed(kind: ModelEventKind, message_id: u64, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(kind, Some(message_id))
        }
    }

    /// Whether this event settles its request (everything but progress).
    pub fn is_final(&self) -> bool {
        !matches!(
            self.kind,
            ModelEventKind::ModelProgress | ModelEventKind::HostReady | ModelEventKind::HostError
        )
    }

    /// Whether this final event reports success.
    pub fn succeeded(&self) -> bool {
        self.success
            && !matches!(
                self.kind,
                ModelEventKind::ModelError | ModelEventKind::InferenceError
            )
    }

    /// Progress as a percentage, from either a bare number or `{progress: n}`.
    pub fn progress_percent(&self) -> Option<f64> {
        let p = self.progress.as_ref()?;
        p.as_f64()
            .or_else(|| p.get("progress").and_then(|v| v.as_f64()))
    }
}
