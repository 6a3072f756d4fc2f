//! ModelLifecycleManager: sole owner of the shared inference resource.
//!
//! Residency follows `Unloaded → Loading → Loaded`, with any state moving to
//! `Error` on failure. Every load and unload runs under one operation lock,
//! and a load first unloads whatever is resident, so at most one model is
//! ever `Loaded`.
//!
//! The manager talks to the model host through a [`ModelTransport`] and
//! receives host events via [`ModelLifecycleManager::dispatch`]. Each request
//! carries a correlation id; progress events stream against that id without
//! settling it.

use async_trait::async_trait;
use dashmap::DashMap;
use ethmem_types::config::ModelConfig;
use ethmem_types::memory::Memory;
use ethmem_types::model::{model_spec, InferenceTask, ModelState};
use ethmem_wire::correlate::{IdSequence, PendingTable};
use ethmem_wire::model_rpc::{ModelEvent, ModelEventKind, ModelRequest};
use ethmem_wire::WireError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::extraction::ExtractionEngine;
use crate::ranking::RankingEngine;

/// Errors from the model resource.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("No active model configured")]
    NoActiveModel,
    #[error("Model host unavailable: {0}")]
    HostUnavailable(String),
    #[error("Model not ready")]
    NotReady,
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
    #[error("Model host rejected request: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

impl From<WireError> for ModelError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Timeout { operation, secs } => ModelError::Timeout { operation, secs },
            other => ModelError::Transport(other.to_string()),
        }
    }
}

/// Progress callback, called with a percentage.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Carries requests to the isolated model host.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Make sure the host is running. Readiness is signalled by a
    /// `HOST_READY` event, not by this call returning.
    async fn boot(&self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Deliver one request.
    async fn send(&self, request: ModelRequest) -> Result<(), ModelError>;
}

/// Anything that can run inference for the engines.
#[async_trait]
pub trait InferenceResource: Send + Sync {
    /// Whether inference can run right now.
    async fn is_ready(&self) -> bool;

    /// Id of the model inference would use.
    async fn active_model(&self) -> Option<String>;

    /// Run one generation and return its text.
    async fn infer(&self, task: InferenceTask, input: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Clone, PartialEq)]
enum HostStatus {
    Pending,
    Ready,
    Failed(String),
}

#[derive(Debug, Default)]
struct Residency {
    active_model_id: Option<String>,
    resident: Option<String>,
    states: HashMap<String, ModelState>,
}

impl Residency {
    fn state_of(&self, id: &str) -> ModelState {
        self.states.get(id).cloned().unwrap_or_default()
    }

    fn set(&mut self, id: &str, state: ModelState) {
        debug!(model = id, state = %state, "Model state");
        self.states.insert(id.to_string(), state);
    }
}

/// Deadlines for host operations.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleTimeouts {
    /// Waiting for the host to report ready.
    pub ready: Duration,
    /// Waiting for a load, unload, or inference.
    pub operation: Duration,
}

impl Default for LifecycleTimeouts {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(30),
            operation: Duration::from_secs(300),
        }
    }
}

impl From<&ModelConfig> for LifecycleTimeouts {
    fn from(cfg: &ModelConfig) -> Self {
        Self {
            ready: Duration::from_secs(cfg.ready_timeout_secs),
            operation: Duration::from_secs(cfg.operation_timeout_secs),
        }
    }
}

/// The single-resident model manager.
pub struct ModelLifecycleManager {
    transport: Arc<dyn ModelTransport>,
    residency: Mutex<Residency>,
    op_lock: Mutex<()>,
    host: watch::Sender<HostStatus>,
    pending: PendingTable<u64, ModelEvent>,
    progress: DashMap<u64, ProgressFn>,
    ids: IdSequence,
    timeouts: LifecycleTimeouts,
}

impl ModelLifecycleManager {
    /// Create a manager over `transport`. Events read from `events` are
    /// dispatched until the channel closes or the manager is dropped.
    pub fn spawn(
        transport: Arc<dyn ModelTransport>,
        mut events: mpsc::Receiver<ModelEvent>,
        active_model: Option<String>,
        timeouts: LifecycleTimeouts,
    ) -> Arc<Self> {
        let (host, _) = watch::channel(HostStatus::Pending);
        let manager = Arc::new(Self {
            transport,
            residency: Mutex::new(Residency {
                active_model_id: active_model,
                ..Default::default()
            }),
            op_lock: Mutex::new(()),
            host,
            pending: PendingTable::new(),
            progress: DashMap::new(),
            ids: IdSequence::new(),
            timeouts,
        });

        let weak: Weak<Self> = Arc::downgrade(&manager);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.dispatch(event).await;
            }
            if let Some(manager) = weak.upgrade() {
                manager.host_lost("model host event stream closed").await;
            }
        });

        manager
    }

    /// Route one host event to its waiter.
    pub async fn dispatch(&self, event: ModelEvent) {
        match event.kind {
            ModelEventKind::HostReady => {
                info!("Model host ready");
                self.host.send_replace(HostStatus::Ready);
            }
            ModelEventKind::HostError => {
                let reason = event.error.unwrap_or_else(|| "unknown host error".into());
                warn!(error = %reason, "Model host failed");
                self.host_lost(&reason).await;
            }
            ModelEventKind::ModelProgress => {
                let Some(id) = event.message_id else { return };
                if let (Some(cb), Some(pct)) = (self.progress.get(&id), event.progress_percent()) {
                    (cb.value())(pct);
                }
            }
            _ => {
                let Some(id) = event.message_id else {
                    debug!(kind = ?event.kind, "Host event without messageId ignored");
                    return;
                };
                self.progress.remove(&id);
                self.pending.resolve(&id, event);
            }
        }
    }

    fn host_ready(&self) -> bool {
        *self.host.borrow() == HostStatus::Ready
    }

    /// A dead host holds no model: fail every waiter and drop residency.
    async fn host_lost(&self, reason: &str) {
        self.host.send_replace(HostStatus::Failed(reason.to_string()));
        self.pending.clear();
        self.progress.clear();
        let mut r = self.residency.lock().await;
        if let Some(resident) = r.resident.take() {
            info!(model = %resident, "Resident model lost with its host");
            r.set(&resident, ModelState::Unloaded);
        }
    }

    /// Bring up the host and wait for it to report ready.
    pub async fn initialize(&self) -> Result<(), ModelError> {
        if self.host_ready() {
            return Ok(());
        }
        // A failed host is retried from scratch.
        self.host.send_if_modified(|status| {
            let failed = matches!(status, HostStatus::Failed(_));
            if failed {
                *status = HostStatus::Pending;
            }
            failed
        });
        self.transport.boot().await?;
        let mut rx = self.host.subscribe();
        let wait = rx.wait_for(|s| !matches!(s, HostStatus::Pending));
        let status = match tokio::time::timeout(self.timeouts.ready, wait).await {
            Ok(Ok(status)) => HostStatus::clone(&status),
            Ok(Err(_)) => return Err(ModelError::HostUnavailable("host channel closed".into())),
            Err(_) => {
                return Err(ModelError::Timeout {
                    operation: "host startup".into(),
                    secs: self.timeouts.ready.as_secs(),
                })
            }
        };
        match status {
            HostStatus::Ready => Ok(()),
            HostStatus::Failed(reason) => Err(ModelError::HostUnavailable(reason)),
            HostStatus::Pending => Err(ModelError::NotReady),
        }
    }

    /// Select which model later loads use. A different resident model is
    /// unloaded first.
    pub async fn set_active_model(&self, model_id: &str) -> Result<(), ModelError> {
        let _op = self.op_lock.lock().await;
        let resident = self.residency.lock().await.resident.clone();
        if let Some(current) = resident {
            if current != model_id {
                self.unload_locked(&current).await?;
            }
        }
        self.residency.lock().await.active_model_id = Some(model_id.to_string());
        info!(model = model_id, "Active model set");
        Ok(())
    }

    /// Load the active model, unloading any other resident model first.
    pub async fn load_active_model(&self, on_progress: Option<ProgressFn>) -> Result<(), ModelError> {
        let _op = self.op_lock.lock().await;
        let (model_id, resident, state) = {
            let r = self.residency.lock().await;
            let id = r.active_model_id.clone().ok_or(ModelError::NoActiveModel)?;
            let state = r.state_of(&id);
            (id, r.resident.clone(), state)
        };

        self.initialize().await?;

        if resident.as_deref() == Some(model_id.as_str()) && state.is_loaded() {
            return Ok(());
        }
        if let Some(previous) = resident {
            self.unload_locked(&previous).await?;
        }

        let spec = model_spec(&model_id);
        self.residency
            .lock()
            .await
            .set(&model_id, ModelState::Loading);
        info!(model = %model_id, name = spec.name, "Loading model");

        let message_id = self.ids.next();
        if let Some(cb) = on_progress {
            self.progress.insert(message_id, cb);
        }
        let result = self
            .call(ModelRequest::LoadModel {
                message_id,
                model_id: model_id.clone(),
                model: spec.name.to_string(),
                task: spec.task,
            })
            .await;
        self.progress.remove(&message_id);

        let mut r = self.residency.lock().await;
        match result {
            Ok(_) => {
                r.set(&model_id, ModelState::Loaded);
                r.resident = Some(model_id);
                Ok(())
            }
            Err(e) => {
                warn!(model = %model_id, error = %e, "Model load failed");
                r.set(&model_id, ModelState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Unload the resident model, if any.
    pub async fn unload_model(&self) -> Result<(), ModelError> {
        let _op = self.op_lock.lock().await;
        let resident = self.residency.lock().await.resident.clone();
        match resident {
            Some(id) => self.unload_locked(&id).await,
            None => Ok(()),
        }
    }

    /// Clear an `Error` state so the model can be loaded again.
    pub async fn reset_model(&self, model_id: &str) {
        let _op = self.op_lock.lock().await;
        let mut r = self.residency.lock().await;
        if matches!(r.state_of(model_id), ModelState::Error(_)) {
            r.set(model_id, ModelState::Unloaded);
        }
    }

    async fn unload_locked(&self, model_id: &str) -> Result<(), ModelError> {
        info!(model = model_id, "Unloading model");
        let message_id = self.ids.next();
        let result = self
            .call(ModelRequest::UnloadModel {
                message_id,
                model_id: model_id.to_string(),
            })
            .await;
        let mut r = self.residency.lock().await;
        match result {
            Ok(_) => {
                r.set(model_id, ModelState::Unloaded);
                if r.resident.as_deref() == Some(model_id) {
                    r.resident = None;
                }
                Ok(())
            }
            Err(e) => {
                // Residency is unknown after a failed unload; nothing may load on top.
                r.set(model_id, ModelState::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn call(&self, request: ModelRequest) -> Result<ModelEvent, ModelError> {
        let message_id = request.message_id();
        let operation = match &request {
            ModelRequest::LoadModel { .. } => "LOAD_MODEL",
            ModelRequest::UnloadModel { .. } => "UNLOAD_MODEL",
            ModelRequest::RunInference { .. } => "RUN_INFERENCE",
        };
        let rx = self.pending.register(message_id);
        if let Err(e) = self.transport.send(request).await {
            self.pending.discard(&message_id);
            return Err(e);
        }
        let event = self
            .pending
            .wait(&message_id, rx, self.timeouts.operation, operation)
            .await?;
        if event.succeeded() {
            Ok(event)
        } else {
            Err(ModelError::Rejected(
                event.error.unwrap_or_else(|| format!("{operation} failed")),
            ))
        }
    }

    /// Recorded state of `model_id`.
    pub async fn model_state(&self, model_id: &str) -> ModelState {
        self.residency.lock().await.state_of(model_id)
    }

    /// Id of the model currently resident, if any.
    pub async fn resident_model(&self) -> Option<String> {
        self.residency.lock().await.resident.clone()
    }

    /// Extract a memory: through the model when ready, else the rule cascade.
    pub async fn extract_memory(self: &Arc<Self>, text: &str, platform: &str) -> Option<Memory> {
        let resource: Arc<dyn InferenceResource> = self.clone();
        ExtractionEngine::new(None, Some(resource))
            .extract(text, platform)
            .await
    }

    /// Rank memories: through the model when ready, else the deterministic fallback.
    pub async fn rank_memories(
        self: &Arc<Self>,
        message: &str,
        memories: &[Memory],
        top_n: usize,
    ) -> Vec<Memory> {
        let resource: Arc<dyn InferenceResource> = self.clone();
        RankingEngine::new(Default::default(), Some(resource))
            .rank(message, memories, top_n)
            .await
    }
}

#[async_trait]
impl InferenceResource for ModelLifecycleManager {
    async fn is_ready(&self) -> bool {
        if !self.host_ready() {
            return false;
        }
        let r = self.residency.lock().await;
        match (&r.active_model_id, &r.resident) {
            (Some(active), Some(resident)) => {
                active == resident && r.state_of(resident).is_loaded()
            }
            _ => false,
        }
    }

    async fn active_model(&self) -> Option<String> {
        self.residency.lock().await.active_model_id.clone()
    }

    async fn infer(&self, task: InferenceTask, input: &str) -> Result<String, ModelError> {
        if !self.is_ready().await {
            return Err(ModelError::NotReady);
        }
        let model_id = self.resident_model().await.ok_or(ModelError::NotReady)?;
        let spec = model_spec(&model_id);
        let message_id = self.ids.next();
        debug!(model = %model_id, ?task, "Running inference");
        let event = self
            .call(ModelRequest::RunInference {
                message_id,
                model_id,
                input: input.to_string(),
                task: spec.task,
            })
            .await?;
        event
            .result
            .as_ref()
            .and_then(normalize_output)
            .ok_or_else(|| ModelError::Output("no generated text".into()))
    }
}

/// Pull generated text out of a host result: a bare string, an object with
/// `generated_text`/`text`, or an array whose first element is such an object.
pub fn normalize_output(result: &Value) -> Option<String> {
    match result {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(normalize_output),
        Value::Object(obj) => obj
            .get("generated_text")
            .or_else(|| obj.get("text"))
            .and_then(|v| v.as_str())
            .map(String::from),
        _ => None,
    }
}
