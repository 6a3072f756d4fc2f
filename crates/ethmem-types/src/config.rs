//! Configuration types for the EthMem coordination process.
//!
//! Every section is `#[serde(default)]` so a partial `config.toml` fills the
//! rest from defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default home directory (`~/.ethmem`).
pub fn ethmem_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".ethmem")
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthMemConfig {
    /// Directory holding the database and other state.
    pub data_dir: PathBuf,
    /// SQLite database path. Defaults to `<data_dir>/memories.db`.
    pub db_path: Option<PathBuf>,
    /// Remote inference endpoint.
    pub remote: RemoteConfig,
    /// Extraction tuning.
    pub extraction: ExtractionConfig,
    /// Ranking tuning.
    pub ranking: RankingConfig,
    /// Injection tuning.
    pub injection: InjectionConfig,
    /// Local model resource.
    pub model: ModelConfig,
    /// Coordination bus.
    pub bus: BusConfig,
}

impl Default for EthMemConfig {
    fn default() -> Self {
        Self {
            data_dir: ethmem_home(),
            db_path: None,
            remote: RemoteConfig::default(),
            extraction: ExtractionConfig::default(),
            ranking: RankingConfig::default(),
            injection: InjectionConfig::default(),
            model: ModelConfig::default(),
            bus: BusConfig::default(),
        }
    }
}

impl EthMemConfig {
    /// The database path after applying the `data_dir` default.
    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("memories.db"))
    }
}

/// Remote chat-completion endpoint used for extraction and ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Stored API key. Takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable consulted when no key is stored.
    pub api_key_env: String,
    /// OpenAI-compatible base URL.
    pub base_url: String,
    /// Model name.
    pub model: String,
    /// Sampling temperature for extraction.
    pub extraction_temperature: f32,
    /// Token cap for extraction replies.
    pub extraction_max_tokens: u32,
    /// Sampling temperature for ranking and smart processing.
    pub ranking_temperature: f32,
    /// Token cap for ranking replies.
    pub ranking_max_tokens: u32,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            extraction_temperature: 0.3,
            extraction_max_tokens: 150,
            ranking_temperature: 0.2,
            ranking_max_tokens: 300,
            timeout_secs: 30,
        }
    }
}

impl RemoteConfig {
    /// The effective API key: stored key first, then the environment.
    /// Blank values count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| {
                std::env::var(&self.api_key_env)
                    .ok()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
            })
    }
}

/// Extraction tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Candidates below this confidence are rejected.
    pub confidence_threshold: f64,
    /// Stamped into each record's metadata.
    pub extraction_version: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: crate::memory::CONFIDENCE_THRESHOLD,
            extraction_version: crate::memory::EXTRACTION_VERSION.to_string(),
        }
    }
}

/// Ranking tuning for the deterministic fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Number of memories returned.
    pub top_n: usize,
    /// Age in days at which the recency boost reaches zero.
    pub recency_window_days: f64,
    /// Multiplier on the recency boost.
    pub recency_weight: f64,
    /// Multiplier on the confidence boost.
    pub confidence_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            recency_window_days: 30.0,
            recency_weight: 0.5,
            confidence_weight: 0.3,
        }
    }
}

/// Injection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Descriptor lifetime in milliseconds.
    pub ttl_ms: u64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: crate::injection::DEFAULT_INJECTION_TTL_MS,
        }
    }
}

/// Local model resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Catalog id of the model to load. `None` disables the local model.
    pub active_model: Option<String>,
    /// Executable hosting the model, spoken to over framed stdio.
    pub host_command: Option<String>,
    /// Arguments for `host_command`.
    pub host_args: Vec<String>,
    /// Seconds to wait for the host to report ready.
    pub ready_timeout_secs: u64,
    /// Seconds to wait for a load or inference.
    pub operation_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            active_model: None,
            host_command: None,
            host_args: Vec::new(),
            ready_timeout_secs: 30,
            operation_timeout_secs: 300,
        }
    }
}

/// Coordination bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 5,
        }
    }
}
