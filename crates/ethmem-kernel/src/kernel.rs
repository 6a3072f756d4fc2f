//! EthMemKernel: the coordination process.
//!
//! Owns the memory store, the dedup gate, the remote driver and the optional
//! local model manager, and answers every coordination-bus request.

use crate::config::load_config;
use crate::dedup::{Admission, DedupGate};
use crate::error::{KernelError, KernelResult};
use async_trait::async_trait;
use ethmem_memory::SqliteMemoryStore;
use ethmem_runtime::host::ProcessTransport;
use ethmem_runtime::lifecycle::{LifecycleTimeouts, ProgressFn};
use ethmem_runtime::smart::{format_injection, SmartProcessor};
use ethmem_runtime::{
    CompletionDriver, ExtractionEngine, InferenceResource, LlmError, ModelLifecycleManager,
    OpenAiCompatDriver, RankingEngine,
};
use ethmem_types::config::{EthMemConfig, RemoteConfig};
use ethmem_types::error::EthMemError;
use ethmem_types::memory::{
    Category, Memory, MemoryContext, MemoryId, MemoryStats, MemoryStatus, MemoryStore,
    MODEL_MANUAL,
};
use ethmem_types::model::ModelState;
use ethmem_types::platform::Platform;
use ethmem_wire::bus::{
    ActiveModel, ApiKeyCheck, ApiStatus, ExtractOutcome, MemoryList, SmartOutcome,
};
use ethmem_wire::router::RouterTimeouts;
use ethmem_wire::{BusHandler, BusRequest, BusResponse, MessageRouter};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// Builds a remote driver for a config section and key.
pub type DriverFactory =
    Arc<dyn Fn(&RemoteConfig, String) -> Result<Arc<dyn CompletionDriver>, LlmError> + Send + Sync>;

fn openai_driver(
    config: &RemoteConfig,
    key: String,
) -> Result<Arc<dyn CompletionDriver>, LlmError> {
    Ok(Arc::new(OpenAiCompatDriver::new(config, key)?))
}

/// Manual entries are trusted as typed.
const MANUAL_CONFIDENCE: f64 = 1.0;

pub struct EthMemKernel {
    config: RwLock<EthMemConfig>,
    config_path: Option<PathBuf>,
    store: Arc<dyn MemoryStore>,
    dedup: DedupGate,
    remote: RwLock<Option<Arc<dyn CompletionDriver>>>,
    model: Option<Arc<ModelLifecycleManager>>,
    driver_factory: DriverFactory,
    timeouts: RouterTimeouts,
}

impl EthMemKernel {
    /// Kernel over an already-initialized store. A remote driver is built
    /// when the config resolves an API key.
    pub fn new(config: EthMemConfig, store: Arc<dyn MemoryStore>) -> Self {
        let driver_factory: DriverFactory = Arc::new(openai_driver);
        let remote = build_remote(&driver_factory, &config.remote);
        let timeouts = RouterTimeouts {
            request: Duration::from_secs(config.bus.request_timeout_secs.max(1)),
            inference: Duration::from_secs(config.model.operation_timeout_secs.max(1)),
        };
        Self {
            config: RwLock::new(config),
            config_path: None,
            dedup: DedupGate::new(Arc::clone(&store)),
            store,
            remote: RwLock::new(remote),
            model: None,
            driver_factory,
            timeouts,
        }
    }

    /// Persist `SAVE_API_KEY` into this file.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Attach a local model manager.
    pub fn with_model(mut self, model: Arc<ModelLifecycleManager>) -> Self {
        self.model = Some(model);
        self
    }

    /// Replace the remote driver.
    pub fn with_remote(mut self, driver: Option<Arc<dyn CompletionDriver>>) -> Self {
        self.remote = RwLock::new(driver);
        self
    }

    /// Replace how drivers are built for new or tested keys.
    pub fn with_driver_factory(mut self, factory: DriverFactory) -> Self {
        self.driver_factory = factory;
        self
    }

    /// Load the config file and boot.
    pub async fn boot(config_path: Option<&Path>) -> KernelResult<Arc<Self>> {
        let config = load_config(config_path);
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(crate::config::default_config_path);
        Self::boot_with_config(config, Some(path)).await
    }

    /// Open the store, start the model host when one is configured, and
    /// begin loading the active model in the background.
    pub async fn boot_with_config(
        config: EthMemConfig,
        config_path: Option<PathBuf>,
    ) -> KernelResult<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            KernelError::BootFailed(format!("cannot create {}: {e}", config.data_dir.display()))
        })?;
        let db_path = config.resolved_db_path();
        let store = SqliteMemoryStore::open(&db_path)?;
        store.init().await?;
        info!(path = %db_path.display(), "Memory store opened");

        let model = config.model.host_command.as_ref().map(|command| {
            let (events_tx, events_rx) = mpsc::channel(64);
            let transport = ProcessTransport::new(
                command.clone(),
                config.model.host_args.clone(),
                events_tx,
            );
            ModelLifecycleManager::spawn(
                Arc::new(transport),
                events_rx,
                config.model.active_model.clone(),
                LifecycleTimeouts::from(&config.model),
            )
        });

        if let (Some(manager), Some(model_id)) = (&model, config.model.active_model.clone()) {
            let manager = Arc::clone(manager);
            tokio::spawn(async move {
                if let Err(e) = manager.initialize().await {
                    warn!(error = %e, "Model host unavailable; using fallback strategies");
                    return;
                }
                let progress: ProgressFn =
                    Arc::new(|pct: f64| debug!(progress = pct, "Loading model"));
                match manager.load_active_model(Some(progress)).await {
                    Ok(()) => info!(model = %model_id, "Local model ready"),
                    Err(e) => warn!(model = %model_id, error = %e, "Local model failed to load"),
                }
            });
        }

        let mut kernel = Self::new(config, Arc::new(store));
        if let Some(path) = config_path {
            kernel = kernel.with_config_path(path);
        }
        if let Some(manager) = model {
            kernel = kernel.with_model(manager);
        }
        info!(
            remote = kernel.remote.read().await.is_some(),
            local_model = kernel.model.is_some(),
            "EthMem kernel booted"
        );
        Ok(Arc::new(kernel))
    }

    /// Spawn a bus endpoint served by this kernel.
    pub fn router(self: &Arc<Self>) -> MessageRouter {
        let handler: Arc<dyn BusHandler> = Arc::clone(self) as Arc<dyn BusHandler>;
        MessageRouter::spawn(handler, self.timeouts)
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    pub fn model(&self) -> Option<&Arc<ModelLifecycleManager>> {
        self.model.as_ref()
    }

    fn inference_resource(&self) -> Option<Arc<dyn InferenceResource>> {
        self.model
            .as_ref()
            .map(|m| Arc::clone(m) as Arc<dyn InferenceResource>)
    }

    async fn extraction_engine(&self) -> ExtractionEngine {
        let config = self.config.read().await;
        ExtractionEngine::new(self.remote.read().await.clone(), self.inference_resource())
            .with_remote_config(&config.remote)
            .with_threshold(config.extraction.confidence_threshold)
    }

    async fn ranking_engine(&self) -> RankingEngine {
        let config = self.config.read().await.ranking.clone();
        RankingEngine::new(config, self.inference_resource())
    }

    // ---- bus operations ----

    /// Extract a memory from `text` and store it unless it is a duplicate.
    pub async fn extract_memory(
        &self,
        text: &str,
        platform: Option<&str>,
    ) -> KernelResult<ExtractOutcome> {
        let platform = platform_name(platform);
        let Some(candidate) = self.extraction_engine().await.extract(text, platform).await else {
            return Ok(ExtractOutcome {
                memory: None,
                stored: false,
                duplicate: false,
            });
        };
        Ok(admission_outcome(self.dedup.admit(candidate).await?))
    }

    pub async fn memories(&self) -> KernelResult<Vec<Memory>> {
        Ok(self.store.get_all_memories().await?)
    }

    pub async fn stats(&self) -> KernelResult<MemoryStats> {
        Ok(self.store.stats().await?)
    }

    pub async fn delete_memory(&self, id: &MemoryId) -> KernelResult<bool> {
        let deleted = self.store.delete_memory(id).await?;
        info!(id = %id, deleted, "Delete requested");
        Ok(deleted)
    }

    pub async fn clear_all(&self) -> KernelResult<u64> {
        let cleared = self.store.clear_all_memories().await?;
        info!(cleared, "All memories cleared");
        Ok(cleared)
    }

    /// Store `api_key`, persist it when a config file is attached, and
    /// rebuild the remote driver.
    pub async fn save_api_key(&self, api_key: &str) -> KernelResult<ApiStatus> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(EthMemError::InvalidInput("API key is empty".into()).into());
        }
        if let Some(path) = &self.config_path {
            crate::config::save_api_key(path, api_key)?;
        }
        let mut config = self.config.write().await;
        config.remote.api_key = Some(api_key.to_string());
        let driver = (self.driver_factory)(&config.remote, api_key.to_string())
            .map_err(|e| EthMemError::Remote(e.to_string()))?;
        *self.remote.write().await = Some(driver);
        Ok(ApiStatus {
            configured: true,
            model: config.remote.model.clone(),
        })
    }

    pub async fn api_status(&self) -> ApiStatus {
        let config = self.config.read().await;
        ApiStatus {
            configured: config.remote.resolve_api_key().is_some(),
            model: config.remote.model.clone(),
        }
    }

    /// Check `api_key` (or the configured one) by listing remote models.
    /// Failures are reported in the result, never as an error.
    pub async fn test_api_key(&self, api_key: Option<&str>) -> ApiKeyCheck {
        let remote = self.config.read().await.remote.clone();
        let key = api_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| remote.resolve_api_key());
        let Some(key) = key else {
            return invalid_key("No API key configured");
        };
        let driver = match (self.driver_factory)(&remote, key) {
            Ok(driver) => driver,
            Err(e) => return invalid_key(e.to_string()),
        };
        match driver.list_models().await {
            Ok(models) => {
                info!(models = models.len(), "API key accepted");
                ApiKeyCheck {
                    valid: true,
                    models,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "API key check failed");
                invalid_key(e.to_string())
            }
        }
    }

    /// Rank stored memories against `message`, extract and store a new
    /// memory from it, and format the injection text.
    pub async fn process_message_smart(
        &self,
        message: &str,
        platform: Option<&str>,
    ) -> KernelResult<SmartOutcome> {
        if message.trim().is_empty() {
            return Ok(SmartOutcome::default());
        }
        let platform = platform_name(platform);
        let memories = self.store.get_all_memories().await?;
        let (top_n, threshold) = {
            let config = self.config.read().await;
            (config.ranking.top_n, config.extraction.confidence_threshold)
        };
        let remote = self.remote.read().await.clone();

        let remote_analysis = match remote {
            Some(driver) => {
                let processor = SmartProcessor::new(driver).with_threshold(threshold);
                match processor.analyze(message, &memories).await {
                    Ok(analysis) => Some((analysis, processor.model().to_string())),
                    Err(e) => {
                        warn!(error = %e, "Remote smart processing failed; using local engines");
                        None
                    }
                }
            }
            None => None,
        };

        let (relevant, candidate) = match remote_analysis {
            Some((analysis, model)) => {
                let candidate = analysis.new_memory.map(|c| {
                    Memory::new(
                        message.trim(),
                        c.category,
                        &c.entity,
                        c.description,
                        MemoryContext::for_platform(platform),
                        c.confidence,
                        model,
                    )
                });
                let relevant: Vec<Memory> = analysis.relevant.into_iter().take(top_n).collect();
                (relevant, candidate)
            }
            None => {
                let relevant = self.ranking_engine().await.rank(message, &memories, top_n).await;
                let candidate = self.extraction_engine().await.extract(message, platform).await;
                (relevant, candidate)
            }
        };

        let new_memory = match candidate {
            Some(candidate) => match self.dedup.admit(candidate).await? {
                Admission::Stored(memory) => Some(memory),
                Admission::Duplicate(_) => None,
            },
            None => None,
        };
        let injection_text = format_injection(&relevant);
        debug!(
            relevant = relevant.len(),
            new_memory = new_memory.is_some(),
            "Smart processing complete"
        );
        Ok(SmartOutcome {
            relevant_memories: relevant,
            new_memory,
            injection_text,
        })
    }

    /// Store a hand-entered memory. No confidence threshold applies.
    pub async fn add_manual_memory(
        &self,
        category: &str,
        entity: &str,
        description: Option<String>,
        platform: Option<&str>,
    ) -> KernelResult<ExtractOutcome> {
        let category = Category::new(category);
        if category.as_str().is_empty() || entity.trim().is_empty() {
            return Err(
                EthMemError::InvalidInput("category and entity are required".into()).into(),
            );
        }
        if !category.is_known() {
            warn!(category = %category, "Manual memory with unknown category");
        }
        let source = description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{category}: {}", entity.trim()));
        let memory = Memory::new(
            source,
            category,
            entity,
            description,
            MemoryContext::for_platform(platform_name(platform)),
            MANUAL_CONFIDENCE,
            MODEL_MANUAL,
        );
        Ok(admission_outcome(self.dedup.admit(memory).await?))
    }

    pub async fn update_status(&self, id: &MemoryId, status: MemoryStatus) -> KernelResult<Memory> {
        let memory = self.store.update_status(id, status).await?;
        info!(id = %id, status = %status, "Memory status updated");
        Ok(memory)
    }

    pub async fn ranked_memories(&self, message: &str, max: usize) -> KernelResult<Vec<Memory>> {
        let memories = self.store.get_all_memories().await?;
        Ok(self.ranking_engine().await.rank(message, &memories, max).await)
    }

    pub async fn active_model(&self) -> ActiveModel {
        match &self.model {
            Some(manager) => {
                let active_model = manager.active_model().await;
                let state = match &active_model {
                    Some(id) => manager.model_state(id).await,
                    None => ModelState::Unloaded,
                };
                ActiveModel {
                    active_model,
                    state,
                    ready: manager.is_ready().await,
                }
            }
            None => ActiveModel {
                active_model: self.config.read().await.model.active_model.clone(),
                state: ModelState::Unloaded,
                ready: false,
            },
        }
    }
}

#[async_trait]
impl BusHandler for EthMemKernel {
    async fn handle(&self, request: BusRequest) -> BusResponse {
        let kind = request.kind();
        match request {
            BusRequest::ExtractMemory { text, platform } => {
                respond(kind, self.extract_memory(&text, platform.as_deref()).await)
            }
            BusRequest::GetMemories => respond(
                kind,
                self.memories().await.map(|memories| MemoryList { memories }),
            ),
            BusRequest::GetMemoryStats => respond(kind, self.stats().await),
            BusRequest::DeleteMemory { id } => respond(
                kind,
                self.delete_memory(&id)
                    .await
                    .map(|deleted| json!({ "deleted": deleted })),
            ),
            BusRequest::ClearAllMemories => respond(
                kind,
                self.clear_all().await.map(|cleared| json!({ "cleared": cleared })),
            ),
            BusRequest::SaveApiKey { api_key } => respond(kind, self.save_api_key(&api_key).await),
            BusRequest::GetApiStatus => BusResponse::ok(&self.api_status().await),
            BusRequest::TestApiKey { api_key } => {
                BusResponse::ok(&self.test_api_key(api_key.as_deref()).await)
            }
            BusRequest::ProcessMessageSmart { message, platform } => respond(
                kind,
                self.process_message_smart(&message, platform.as_deref()).await,
            ),
            BusRequest::AddManualMemory {
                category,
                entity,
                description,
                platform,
            } => respond(
                kind,
                self.add_manual_memory(&category, &entity, description, platform.as_deref())
                    .await,
            ),
            BusRequest::UpdateMemoryStatus { id, status } => {
                respond(kind, self.update_status(&id, status).await)
            }
            BusRequest::GetRankedMemories {
                user_message,
                max_memories,
            } => respond(
                kind,
                self.ranked_memories(&user_message, max_memories)
                    .await
                    .map(|memories| MemoryList { memories }),
            ),
            BusRequest::GetActiveModel => BusResponse::ok(&self.active_model().await),
        }
    }
}

fn respond<T: Serialize>(kind: &str, result: KernelResult<T>) -> BusResponse {
    match result {
        Ok(payload) => BusResponse::ok(&payload),
        Err(e) => {
            warn!(kind, error = %e, "Bus request failed");
            BusResponse::err(e.to_string())
        }
    }
}

fn admission_outcome(admission: Admission) -> ExtractOutcome {
    let stored = admission.is_stored();
    ExtractOutcome {
        memory: Some(admission.memory().clone()),
        stored,
        duplicate: !stored,
    }
}

fn invalid_key(error: impl Into<String>) -> ApiKeyCheck {
    ApiKeyCheck {
        valid: false,
        models: Vec::new(),
        error: Some(error.into()),
    }
}

/// Canonical platform name; unknown or missing names map to `generic`.
fn platform_name(platform: Option<&str>) -> &'static str {
    platform
        .and_then(Platform::from_name)
        .unwrap_or(Platform::Generic)
        .as_str()
}

fn build_remote(
    factory: &DriverFactory,
    config: &RemoteConfig,
) -> Option<Arc<dyn CompletionDriver>> {
    let key = config.resolve_api_key()?;
    match factory(config, key) {
        Ok(driver) => Some(driver),
        Err(e) => {
            warn!(error = %e, "Remote driver unavailable; using local strategies");
            None
        }
    }
}
