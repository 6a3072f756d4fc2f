//! Chat-completion driver for the remote extraction/ranking endpoint.
//!
//! Works with any provider exposing the OpenAI `/chat/completions` and
//! `/models` endpoints.

use async_trait::async_trait;
use ethmem_types::config::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

/// Error type for remote completion calls.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing API key")]
    MissingApiKey,
}

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System instruction.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A remote text-completion backend.
#[async_trait]
pub trait CompletionDriver: Send + Sync {
    /// Model name, stamped into `metadata.modelUsed`.
    fn model(&self) -> &str;

    /// Run one completion and return the trimmed reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// List model ids visible to this credential.
    async fn list_models(&self) -> Result<Vec<String>, LlmError>;
}

/// OpenAI-compatible completion driver.
pub struct OpenAiCompatDriver {
    api_key: Zeroizing<String>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl OpenAiCompatDriver {
    /// Create a driver for `config` using `api_key`.
    pub fn new(config: &RemoteConfig, api_key: String) -> Result<Self, LlmError> {
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            api_key: Zeroizing::new(api_key),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            client,
        })
    }

    /// Build a driver from config when a key is available.
    pub fn from_config(config: &RemoteConfig) -> Option<Self> {
        let key = config.resolve_api_key()?;
        Self::new(config, key).ok()
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: body_text,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl CompletionDriver for OpenAiCompatDriver {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.as_str()))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;

        let data: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::Parse("Empty completion".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/models", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.as_str()))
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;
        let resp = Self::check_status(resp).await?;
        let data: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(data.data.into_iter().map(|m| m.id).collect())
    }
}

/// Pull the outermost `{...}` object out of model output, tolerating code
/// fences and chatter around it.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
