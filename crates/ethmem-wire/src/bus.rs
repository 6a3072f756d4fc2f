//! Coordination-bus message types.
//!
//! Requests are `{type, payload}` objects; every response carries `success`
//! plus either a type-specific `payload` or an `error` string.

use ethmem_types::memory::{Memory, MemoryId, MemoryStats, MemoryStatus};
use ethmem_types::model::ModelState;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

fn default_max_memories() -> usize {
    5
}

/// A request sent to the coordination process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum BusRequest {
    /// Extract (and store) a memory from an utterance.
    ExtractMemory {
        text: String,
        #[serde(default)]
        platform: Option<String>,
    },
    /// List every stored memory.
    GetMemories,
    /// Aggregate statistics.
    GetMemoryStats,
    /// Delete one memory.
    DeleteMemory { id: MemoryId },
    /// Delete every memory.
    ClearAllMemories,
    /// Persist the remote API key.
    SaveApiKey { api_key: String },
    /// Whether a remote key is configured.
    GetApiStatus,
    /// Check a key (or the stored one) against the remote endpoint.
    TestApiKey {
        #[serde(default)]
        api_key: Option<String>,
    },
    /// Extraction and ranking in one call.
    ProcessMessageSmart {
        message: String,
        #[serde(default)]
        platform: Option<String>,
    },
    /// Store a memory entered by hand.
    AddManualMemory {
        category: String,
        entity: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        platform: Option<String>,
    },
    /// Advance a memory's lifecycle status.
    UpdateMemoryStatus { id: MemoryId, status: MemoryStatus },
    /// Rank stored memories against a message.
    GetRankedMemories {
        user_message: String,
        #[serde(default = "default_max_memories")]
        max_memories: usize,
    },
    /// Active local model and its residency state.
    GetActiveModel,
}

impl BusRequest {
    /// Parse a raw bus message. Unknown or malformed messages yield `None`
    /// and are meant to be ignored by the receiver.
    pub fn parse(raw: &Value) -> Option<Self> {
        match serde_json::from_value::<BusRequest>(raw.clone()) {
            Ok(req) => Some(req),
            Err(e) => {
                debug!(
                    kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or("<none>"),
                    error = %e,
                    "Ignoring unrecognized bus message"
                );
                None
            }
        }
    }

    /// Wire name of the request type.
    pub fn kind(&self) -> &'static str {
        match self {
            BusRequest::ExtractMemory { .. } => "EXTRACT_MEMORY",
            BusRequest::GetMemories => "GET_MEMORIES",
            BusRequest::GetMemoryStats => "GET_MEMORY_STATS",
            BusRequest::DeleteMemory { .. } => "DELETE_MEMORY",
            BusRequest::ClearAllMemories => "CLEAR_ALL_MEMORIES",
            BusRequest::SaveApiKey { .. } => "SAVE_API_KEY",
            BusRequest::GetApiStatus => "GET_API_STATUS",
            BusRequest::TestApiKey { .. } => "TEST_API_KEY",
            BusRequest::ProcessMessageSmart { .. } => "PROCESS_MESSAGE_SMART",
            BusRequest::AddManualMemory { .. } => "ADD_MANUAL_MEMORY",
            BusRequest::UpdateMemoryStatus { .. } => "UPDATE_MEMORY_STATUS",
            BusRequest::GetRankedMemories { .. } => "GET_RANKED_MEMORIES",
            BusRequest::GetActiveModel => "GET_ACTIVE_MODEL",
        }
    }

    /// Requests that may wait on a remote endpoint or the local model.
    pub fn uses_inference(&self) -> bool {
        matches!(
            self,
            BusRequest::ExtractMemory { .. }
                | BusRequest::ProcessMessageSmart { .. }
                | BusRequest::GetRankedMemories { .. }
                | BusRequest::TestApiKey { .. }
        )
    }
}

/// Response to a bus request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusResponse {
    /// Whether the request succeeded.
    pub success: bool,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BusResponse {
    /// Successful response carrying `payload`.
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self {
                success: true,
                payload: Some(value),
                error: None,
            },
            Err(e) => Self::err(format!("Failed to encode response: {e}")),
        }
    }

    /// Successful response with no payload.
    pub fn empty() -> Self {
        Self {
            success: true,
            payload: None,
            error: None,
        }
    }

    /// Failed response.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(message.into()),
        }
    }

    /// Decode the payload into `T`.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::WireError> {
        if !self.success {
            return Err(crate::WireError::Remote(
                self.error.clone().unwrap_or_else(|| "unknown error".into()),
            ));
        }
        let value = self.payload.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }
}

/// Outcome of `EXTRACT_MEMORY` and `ADD_MANUAL_MEMORY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOutcome {
    /// The candidate, if one was produced.
    pub memory: Option<Memory>,
    /// Whether the candidate was written to the store.
    pub stored: bool,
    /// Whether the candidate was dropped as a duplicate.
    pub duplicate: bool,
}

/// Outcome of `PROCESS_MESSAGE_SMART`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartOutcome {
    /// Memories relevant to the message, most relevant first.
    pub relevant_memories: Vec<Memory>,
    /// Memory extracted from the message and stored, if any.
    pub new_memory: Option<Memory>,
    /// Context block to append to the outgoing message; empty when nothing is relevant.
    pub injection_text: String,
}

/// Payload of `GET_MEMORIES`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryList {
    pub memories: Vec<Memory>,
}

/// Payload of `GET_MEMORY_STATS`.
pub type StatsPayload = MemoryStats;

/// Payload of `GET_API_STATUS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStatus {
    /// Whether a remote key is available.
    pub configured: bool,
    /// Remote model name.
    pub model: String,
}

/// Payload of `TEST_API_KEY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyCheck {
    /// Whether the endpoint accepted the key.
    pub valid: bool,
    /// Models listed by the endpoint.
    #[serde(default)]
    pub models: Vec<String>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of `GET_ACTIVE_MODEL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveModel {
    /// Configured model id.
    pub active_model: Option<String>,
    /// Residency state of that model.
    pub state: ModelState,
    /// Whether inference can run right now.
    pub ready: bool,
}
