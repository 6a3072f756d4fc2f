//! Integration tests for the capture → extract → dedupe → rank → inject
//! pipeline.
//!
//! Each test boots a kernel over an in-memory store and talks to it through
//! the real MessageRouter (and, for the injection tests, the real page
//! bridge and network interceptor). Remote drivers and the model host are
//! in-process fakes; nothing leaves the process.

use async_trait::async_trait;
use ethmem_intercept::{
    InjectionController, NetworkInterceptor, OutgoingRequest, Primitive, SmartInjector,
};
use ethmem_kernel::{DriverFactory, EthMemKernel};
use ethmem_memory::SqliteMemoryStore;
use ethmem_runtime::host::InProcessTransport;
use ethmem_runtime::lifecycle::LifecycleTimeouts;
use ethmem_runtime::llm::CompletionRequest;
use ethmem_runtime::{CompletionDriver, LlmError, ModelLifecycleManager};
use ethmem_types::config::{EthMemConfig, RemoteConfig};
use ethmem_types::injection::InjectionDescriptor;
use ethmem_types::memory::{
    now_millis, Category, Memory, MemoryContext, MemoryStatus, MemoryStore, MODEL_PATTERN_BASED,
};
use ethmem_types::model::ModelState;
use ethmem_wire::bus::{
    ActiveModel, ApiKeyCheck, ApiStatus, ExtractOutcome, MemoryList, SmartOutcome,
};
use ethmem_wire::model_rpc::{ModelEvent, ModelEventKind, ModelRequest};
use ethmem_wire::{BusRequest, MessageRouter, PageBridge};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DAY_MS: i64 = 86_400_000;

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Config with no reachable API key.
fn offline_config() -> EthMemConfig {
    let mut config = EthMemConfig::default();
    config.remote.api_key = None;
    config.remote.api_key_env = "ETHMEM_TEST_UNSET_KEY".into();
    config
}

fn kernel() -> Arc<EthMemKernel> {
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    Arc::new(EthMemKernel::new(offline_config(), store))
}

async fn extract(router: &MessageRouter, text: &str) -> ExtractOutcome {
    router
        .request(BusRequest::ExtractMemory {
            text: text.into(),
            platform: Some("chatgpt".into()),
        })
        .await
        .unwrap()
        .decode()
        .unwrap()
}

async fn all_memories(router: &MessageRouter) -> Vec<Memory> {
    let list: MemoryList = router
        .request(BusRequest::GetMemories)
        .await
        .unwrap()
        .decode()
        .unwrap();
    list.memories
}

fn aged_memory(category: &str, entity: &str, confidence: f64, age_ms: i64) -> Memory {
    let mut memory = Memory::new(
        format!("about {entity}"),
        Category::new(category),
        entity,
        None,
        MemoryContext::for_platform("chatgpt"),
        confidence,
        MODEL_PATTERN_BASED,
    );
    memory.timestamp = now_millis() - age_ms;
    memory
}

// ---------------------------------------------------------------------------
// Fake remote driver
// ---------------------------------------------------------------------------

struct ScriptedDriver {
    reply: &'static str,
}

#[async_trait]
impl CompletionDriver for ScriptedDriver {
    fn model(&self) -> &str {
        "gpt-test"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
        Ok(self.reply.to_string())
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(vec!["gpt-test".into()])
    }
}

/// Accepts only the key `sk-good`.
struct KeyCheckDriver {
    key: String,
}

#[async_trait]
impl CompletionDriver for KeyCheckDriver {
    fn model(&self) -> &str {
        "gpt-test"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<String, LlmError> {
        Err(LlmError::Http("offline".into()))
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if self.key == "sk-good" {
            Ok(vec!["gpt-test".into(), "gpt-test-mini".into()])
        } else {
            Err(LlmError::Api {
                status: 401,
                message: "invalid api key".into(),
            })
        }
    }
}

fn key_check_factory() -> DriverFactory {
    Arc::new(|_config: &RemoteConfig, key: String| {
        let driver: Arc<dyn CompletionDriver> = Arc::new(KeyCheckDriver { key });
        Ok(driver)
    })
}

// ---------------------------------------------------------------------------
// Fake model host
// ---------------------------------------------------------------------------

fn fake_host(mut requests: mpsc::Receiver<ModelRequest>, events: mpsc::Sender<ModelEvent>) {
    tokio::spawn(async move {
        let _ = events.send(ModelEvent::new(ModelEventKind::HostReady, None)).await;
        while let Some(req) = requests.recv().await {
            let reply = match req {
                ModelRequest::LoadModel { message_id, .. } => {
                    ModelEvent::ok(ModelEventKind::ModelLoaded, message_id, None)
                }
                ModelRequest::UnloadModel { message_id, .. } => {
                    ModelEvent::ok(ModelEventKind::ModelUnloaded, message_id, None)
                }
                ModelRequest::RunInference { message_id, .. } => ModelEvent::ok(
                    ModelEventKind::InferenceResult,
                    message_id,
                    Some(json!([{"generated_text": "not json"}])),
                ),
            };
            let _ = events.send(reply).await;
        }
    });
}

fn model_manager(active: &str) -> Arc<ModelLifecycleManager> {
    let (transport, requests) = InProcessTransport::new();
    let (events_tx, events_rx) = mpsc::channel(64);
    fake_host(requests, events_tx);
    ModelLifecycleManager::spawn(
        Arc::new(transport),
        events_rx,
        Some(active.to_string()),
        LifecycleTimeouts {
            ready: Duration::from_secs(2),
            operation: Duration::from_secs(2),
        },
    )
}

// ---------------------------------------------------------------------------
// Extraction scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_location_extracted_without_remote_key() {
    let router = kernel().router();
    let out = extract(&router, "I live in Denver").await;
    assert!(out.stored);
    let memory = out.memory.unwrap();
    assert_eq!(memory.category.as_str(), "location");
    assert_eq!(memory.entity, "denver");
    assert_eq!(memory.metadata.confidence, 0.85);
    assert_eq!(memory.description, "User is from denver");
    assert_eq!(memory.metadata.model_used, "pattern-based");
    assert_eq!(memory.context.platform, "chatgpt");
}

#[tokio::test]
async fn test_name_rule_wins_by_order() {
    let router = kernel().router();
    let memory = extract(&router, "My name is Alex").await.memory.unwrap();
    assert_eq!(memory.category.as_str(), "name");
    assert_eq!(memory.entity, "alex");
    assert_eq!(memory.metadata.confidence, 0.90);
}

#[tokio::test]
async fn test_no_fact_stores_nothing() {
    let router = kernel().router();
    let out = extract(&router, "what time is it?").await;
    assert!(out.memory.is_none());
    assert!(!out.stored);
    assert!(all_memories(&router).await.is_empty());
}

#[tokio::test]
async fn test_extraction_is_idempotent() {
    let router = kernel().router();
    assert!(extract(&router, "I live in Denver").await.stored);
    let again = extract(&router, "I live in Denver").await;
    assert!(!again.stored);
    assert!(again.duplicate);
    assert_eq!(all_memories(&router).await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_identical_extractions_store_one() {
    let router = kernel().router();
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move { extract(&router, "My name is Alex").await })
        })
        .collect();
    let mut stored = 0;
    for h in handles {
        if h.await.unwrap().stored {
            stored += 1;
        }
    }
    assert_eq!(stored, 1);
    assert_eq!(all_memories(&router).await.len(), 1);
}

#[tokio::test]
async fn test_stored_confidence_stays_in_range() {
    let router = kernel().router();
    for text in [
        "I live in Denver",
        "My name is Alex",
        "I'm 34",
        "I speak French",
        "I have visited japan",
        "I love sushi",
    ] {
        extract(&router, text).await;
    }
    router
        .request(BusRequest::AddManualMemory {
            category: "allergy".into(),
            entity: "peanuts".into(),
            description: None,
            platform: None,
        })
        .await
        .unwrap();

    let memories = all_memories(&router).await;
    assert!(memories.len() >= 5);
    for m in memories.iter().filter(|m| !m.is_manual()) {
        assert!(
            (0.6..=1.0).contains(&m.metadata.confidence),
            "{} has confidence {}",
            m.entity,
            m.metadata.confidence
        );
    }
    assert!(memories.iter().any(|m| m.is_manual()));
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fallback_ranking_prefers_recent_overlap() {
    let kernel = kernel();
    let store = kernel.store().clone();
    let pizza = aged_memory("food", "pizza", 0.9, DAY_MS);
    let denver = aged_memory("location", "denver", 0.85, 40 * DAY_MS);
    store.save_memory(&denver).await.unwrap();
    store.save_memory(&pizza).await.unwrap();

    let router = kernel.router();
    let request = BusRequest::GetRankedMemories {
        user_message: "what food do I like".into(),
        max_memories: 5,
    };
    let first: MemoryList = router.request(request.clone()).await.unwrap().decode().unwrap();
    assert_eq!(first.memories.len(), 1);
    assert_eq!(first.memories[0].id, pizza.id);

    let second: MemoryList = router.request(request).await.unwrap().decode().unwrap();
    assert_eq!(first, second);
}

// ---------------------------------------------------------------------------
// Smart processing and injection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_smart_injection_end_to_end() {
    let router = kernel().router();
    extract(&router, "I live in Denver").await;

    let client = PageBridge::connect("https://chatgpt.com", router.clone(), Duration::from_secs(5));
    let controller = Arc::new(InjectionController::new());
    let injector = SmartInjector::new(
        Arc::new(client.clone()),
        controller.clone(),
        Some("chatgpt".into()),
    );
    let interceptor = NetworkInterceptor::new(controller.clone(), Some(Arc::new(client)));

    let message = "recommend a restaurant in denver";
    let staged = injector.before_send(message).await.unwrap();
    assert_eq!(
        staged.injection_text,
        "\n\n[Personal Context: User is from denver]"
    );

    let body = json!({
        "action": "next",
        "messages": [{"content": {"content_type": "text", "parts": [message]}}]
    })
    .to_string();
    let out = interceptor
        .on_outgoing(OutgoingRequest::post(
            Primitive::Fetch,
            "https://chatgpt.com/backend-api/conversation",
            body,
        ))
        .await;
    assert!(out.injected);
    let sent: serde_json::Value = serde_json::from_str(&out.request.body.unwrap()).unwrap();
    assert_eq!(
        sent["messages"][0]["content"]["parts"][0],
        "recommend a restaurant in denver\n\n[Personal Context: User is from denver]"
    );
    assert!(!controller.is_staged());

    // The restated location is a duplicate, so nothing new was stored.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(all_memories(&router).await.len(), 1);
}

#[tokio::test]
async fn test_expired_descriptor_never_applied() {
    let controller = Arc::new(InjectionController::new());
    let interceptor = NetworkInterceptor::new(controller.clone(), None);
    let mut stale = InjectionDescriptor::new("hello there", "\n\n[Personal Context: x]");
    stale.timestamp = now_millis() - 3_000;
    controller.stage_descriptor(stale);

    let body = json!({"messages": [{"content": {"parts": ["hello there"]}}]}).to_string();
    let out = interceptor
        .on_outgoing(OutgoingRequest::post(
            Primitive::Fetch,
            "https://chatgpt.com/backend-api/conversation",
            body.clone(),
        ))
        .await;
    assert!(!out.injected);
    assert_eq!(out.request.body.unwrap(), body);
    assert!(!controller.is_staged());
}

#[tokio::test]
async fn test_smart_with_remote_driver() {
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = EthMemKernel::new(offline_config(), store.clone()).with_remote(Some(Arc::new(
        ScriptedDriver {
            reply: r#"Sure: {"relevant": [1, 7], "newMemory": {"category": "food", "entity": "sushi", "confidence": 0.9}}"#,
        },
    )));
    store
        .save_memory(&aged_memory("location", "denver", 0.85, DAY_MS))
        .await
        .unwrap();
    let router = Arc::new(kernel).router();

    let out: SmartOutcome = router
        .request(BusRequest::ProcessMessageSmart {
            message: "I love sushi, where should I eat?".into(),
            platform: Some("claude".into()),
        })
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(out.relevant_memories.len(), 1);
    assert_eq!(out.relevant_memories[0].entity, "denver");
    let new_memory = out.new_memory.unwrap();
    assert_eq!(new_memory.entity, "sushi");
    assert_eq!(new_memory.metadata.model_used, "gpt-test");
    assert_eq!(new_memory.context.platform, "claude");
    assert_eq!(out.injection_text, "\n\n[Personal Context: User is from denver]");
    assert_eq!(all_memories(&router).await.len(), 2);
}

#[tokio::test]
async fn test_smart_falls_back_when_remote_fails() {
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = EthMemKernel::new(offline_config(), store.clone()).with_remote(Some(Arc::new(
        KeyCheckDriver {
            key: "sk-good".into(),
        },
    )));
    store
        .save_memory(&aged_memory("food", "pizza", 0.9, DAY_MS))
        .await
        .unwrap();
    let router = Arc::new(kernel).router();

    let out: SmartOutcome = router
        .request(BusRequest::ProcessMessageSmart {
            message: "what food do I like? I live in Denver".into(),
            platform: Some("chatgpt".into()),
        })
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(out.relevant_memories.len(), 1);
    assert_eq!(out.relevant_memories[0].entity, "pizza");
    assert!(out.injection_text.contains("pizza"));
    let new_memory = out.new_memory.unwrap();
    assert_eq!(new_memory.category.as_str(), "location");
    assert_eq!(new_memory.entity, "denver");
    assert_eq!(new_memory.metadata.model_used, MODEL_PATTERN_BASED);
    assert_eq!(all_memories(&router).await.len(), 2);
}

#[tokio::test]
async fn test_smart_falls_back_on_reply_without_json() {
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = EthMemKernel::new(offline_config(), store.clone()).with_remote(Some(Arc::new(
        ScriptedDriver {
            reply: "I'm not able to help with that.",
        },
    )));
    store
        .save_memory(&aged_memory("food", "pizza", 0.9, DAY_MS))
        .await
        .unwrap();
    let router = Arc::new(kernel).router();

    let out: SmartOutcome = router
        .request(BusRequest::ProcessMessageSmart {
            message: "any food ideas for tonight?".into(),
            platform: None,
        })
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(out.relevant_memories.len(), 1);
    assert_eq!(out.relevant_memories[0].entity, "pizza");
}

#[tokio::test]
async fn test_smart_with_nothing_relevant() {
    let router = kernel().router();
    let out: SmartOutcome = router
        .request(BusRequest::ProcessMessageSmart {
            message: "tell me a joke".into(),
            platform: None,
        })
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(out.relevant_memories.is_empty());
    assert!(out.new_memory.is_none());
    assert!(out.injection_text.is_empty());
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_moves_forward_only() {
    let router = kernel().router();
    let id = extract(&router, "I live in Denver").await.memory.unwrap().id;

    let synced = router
        .request(BusRequest::UpdateMemoryStatus {
            id: id.clone(),
            status: MemoryStatus::Synced,
        })
        .await
        .unwrap();
    assert!(synced.success);
    let back = router
        .request(BusRequest::UpdateMemoryStatus {
            id,
            status: MemoryStatus::Local,
        })
        .await
        .unwrap();
    assert!(!back.success);
    assert!(back.error.unwrap().contains("Invalid status transition"));
}

#[tokio::test]
async fn test_delete_clear_and_stats() {
    let router = kernel().router();
    let id = extract(&router, "I live in Denver").await.memory.unwrap().id;
    extract(&router, "My name is Alex").await;
    extract(&router, "I speak French").await;

    let stats = router.request(BusRequest::GetMemoryStats).await.unwrap();
    let stats = stats.payload.unwrap();
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["byCategory"]["location"], 1);

    let deleted = router
        .request(BusRequest::DeleteMemory { id: id.clone() })
        .await
        .unwrap();
    assert_eq!(deleted.payload.unwrap()["deleted"], true);
    let missing = router.request(BusRequest::DeleteMemory { id }).await.unwrap();
    assert_eq!(missing.payload.unwrap()["deleted"], false);

    let cleared = router.request(BusRequest::ClearAllMemories).await.unwrap();
    assert_eq!(cleared.payload.unwrap()["cleared"], 2);
    assert!(all_memories(&router).await.is_empty());
}

#[tokio::test]
async fn test_manual_memory_bypasses_threshold_but_not_dedup() {
    let router = kernel().router();
    let add = || BusRequest::AddManualMemory {
        category: "allergy".into(),
        entity: "Peanuts".into(),
        description: Some("Allergic to peanuts".into()),
        platform: None,
    };
    let first: ExtractOutcome = router.request(add()).await.unwrap().decode().unwrap();
    assert!(first.stored);
    let memory = first.memory.unwrap();
    assert!(memory.is_manual());
    assert_eq!(memory.description, "Allergic to peanuts");
    assert_eq!(memory.context.platform, "generic");

    let second: ExtractOutcome = router.request(add()).await.unwrap().decode().unwrap();
    assert!(second.duplicate);

    let blank = router
        .request(BusRequest::AddManualMemory {
            category: "food".into(),
            entity: "  ".into(),
            description: None,
            platform: None,
        })
        .await
        .unwrap();
    assert!(!blank.success);
}

#[tokio::test]
async fn test_unknown_message_is_ignored() {
    let router = kernel().router();
    let reply = router
        .request_raw(json!({"type": "SELF_DESTRUCT", "payload": {}}))
        .await
        .unwrap();
    assert!(reply.is_none());
}

// ---------------------------------------------------------------------------
// API key management
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_save_api_key_persists_and_configures() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[ranking]\ntop_n = 4\n").unwrap();

    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = EthMemKernel::new(offline_config(), store)
        .with_config_path(&path)
        .with_driver_factory(key_check_factory());
    let router = Arc::new(kernel).router();

    let before: ApiStatus = router
        .request(BusRequest::GetApiStatus)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(!before.configured);

    let saved = router
        .request(BusRequest::SaveApiKey {
            api_key: " sk-good ".into(),
        })
        .await
        .unwrap();
    assert!(saved.success);

    let after: ApiStatus = router
        .request(BusRequest::GetApiStatus)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(after.configured);

    let on_disk = ethmem_kernel::config::load_config(Some(&path));
    assert_eq!(on_disk.remote.api_key.as_deref(), Some("sk-good"));
    assert_eq!(on_disk.ranking.top_n, 4);

    let empty = router
        .request(BusRequest::SaveApiKey {
            api_key: "   ".into(),
        })
        .await
        .unwrap();
    assert!(!empty.success);
}

#[tokio::test]
async fn test_api_key_check_reports_validity() {
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel =
        EthMemKernel::new(offline_config(), store).with_driver_factory(key_check_factory());
    let router = Arc::new(kernel).router();

    let check = |key: Option<&str>| BusRequest::TestApiKey {
        api_key: key.map(String::from),
    };
    let good: ApiKeyCheck = router
        .request(check(Some("sk-good")))
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(good.valid);
    assert_eq!(good.models.len(), 2);

    let bad: ApiKeyCheck = router
        .request(check(Some("sk-bad")))
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert!(!bad.valid);
    assert!(bad.error.unwrap().contains("401"));

    let none: ApiKeyCheck = router.request(check(None)).await.unwrap().decode().unwrap();
    assert!(!none.valid);
    assert_eq!(none.error.as_deref(), Some("No API key configured"));
}

// ---------------------------------------------------------------------------
// Local model
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_active_model_reports_single_residency() {
    let manager = model_manager("flan-t5-base");
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = Arc::new(EthMemKernel::new(offline_config(), store).with_model(manager.clone()));
    let router = kernel.router();

    let idle: ActiveModel = router
        .request(BusRequest::GetActiveModel)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(idle.active_model.as_deref(), Some("flan-t5-base"));
    assert!(!idle.ready);

    manager.load_active_model(None).await.unwrap();
    manager.set_active_model("phi-3-mini").await.unwrap();
    manager.load_active_model(None).await.unwrap();

    let active: ActiveModel = router
        .request(BusRequest::GetActiveModel)
        .await
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(active.active_model.as_deref(), Some("phi-3-mini"));
    assert_eq!(active.state, ModelState::Loaded);
    assert!(active.ready);
    assert_ne!(manager.model_state("flan-t5-base").await, ModelState::Loaded);
}

#[tokio::test]
async fn test_unusable_model_output_falls_back_to_rules() {
    let manager = model_manager("flan-t5-base");
    manager.load_active_model(None).await.unwrap();
    let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
    let kernel = Arc::new(EthMemKernel::new(offline_config(), store).with_model(manager));
    let router = kernel.router();

    let memory = extract(&router, "I live in Denver").await.memory.unwrap();
    assert_eq!(memory.entity, "denver");
    assert_eq!(memory.metadata.model_used, "pattern-based");
}
