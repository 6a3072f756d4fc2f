//! NetworkInterceptor: the registered chain in front of the page's network
//! primitives.
//!
//! For each outgoing call the chain picks the first adapter that claims the
//! URL, captures the user's text, and then, on injection-eligible endpoints,
//! takes the staged descriptor and tries to apply it. Whatever happens, the
//! caller gets back a request it can send: the rewritten one on success, the
//! original one otherwise.

use crate::adapter::{incoming_text, EndpointKind, Payload, PlatformAdapter};
use crate::chatgpt::ChatGptAdapter;
use crate::claude::ClaudeAdapter;
use crate::controller::InjectionController;
use crate::gemini::GeminiAdapter;
use crate::generic::GenericAdapter;
use async_trait::async_trait;
use ethmem_types::injection::DEFAULT_INJECTION_TTL_MS;
use ethmem_types::memory::now_millis;
use ethmem_wire::page::{CaptureEvent, Direction};
use ethmem_wire::PageClient;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The network primitive a call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// Request/response fetch-style call.
    Fetch,
    /// Legacy request-object call.
    LegacyRequest,
    /// Frame sent over a persistent socket.
    Socket,
}

/// An outgoing call as seen by the interceptor.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingRequest {
    pub primitive: Primitive,
    pub method: String,
    pub url: String,
    pub body: Option<String>,
}

impl OutgoingRequest {
    pub fn post(primitive: Primitive, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            primitive,
            method: "POST".to_string(),
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

/// What the interceptor did to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct Intercepted {
    /// The request to send.
    pub request: OutgoingRequest,
    /// Whether context was appended.
    pub injected: bool,
}

/// Where captured text goes.
#[async_trait]
pub trait CaptureSink: Send + Sync {
    async fn forward(&self, event: CaptureEvent);
}

#[async_trait]
impl CaptureSink for PageClient {
    async fn forward(&self, event: CaptureEvent) {
        if let Err(e) = self.capture(event).await {
            warn!(error = %e, "Failed to forward capture");
        }
    }
}

pub struct NetworkInterceptor {
    adapters: Vec<Box<dyn PlatformAdapter>>,
    controller: Arc<InjectionController>,
    sink: Option<Arc<dyn CaptureSink>>,
    ttl_ms: u64,
}

impl NetworkInterceptor {
    /// Interceptor with the built-in chain. Claude and Gemini are consulted
    /// before ChatGPT, whose pattern would also claim their URLs.
    pub fn new(controller: Arc<InjectionController>, sink: Option<Arc<dyn CaptureSink>>) -> Self {
        Self::with_adapters(
            vec![
                Box::new(ClaudeAdapter::new()),
                Box::new(GeminiAdapter::new()),
                Box::new(ChatGptAdapter::new()),
                Box::new(GenericAdapter::new()),
            ],
            controller,
            sink,
        )
    }

    pub fn with_adapters(
        adapters: Vec<Box<dyn PlatformAdapter>>,
        controller: Arc<InjectionController>,
        sink: Option<Arc<dyn CaptureSink>>,
    ) -> Self {
        Self {
            adapters,
            controller,
            sink,
            ttl_ms: DEFAULT_INJECTION_TTL_MS,
        }
    }

    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    /// First adapter claiming `url`.
    pub fn classify(&self, url: &str) -> Option<(&dyn PlatformAdapter, EndpointKind)> {
        self.adapters
            .iter()
            .find_map(|a| a.match_endpoint(url).map(|kind| (a.as_ref(), kind)))
    }

    /// Process an outgoing call. Never fails: on any problem the original
    /// request comes back unchanged.
    pub async fn on_outgoing(&self, request: OutgoingRequest) -> Intercepted {
        let unchanged = |request| Intercepted {
            request,
            injected: false,
        };
        let Some(body) = request.body.as_deref() else {
            return unchanged(request);
        };
        let Some((adapter, kind)) = self.classify(&request.url) else {
            return unchanged(request);
        };

        let eligible = kind == EndpointKind::Completion && request.primitive != Primitive::Socket;
        // Taken before parsing: a descriptor gets exactly one attempt.
        let descriptor = if eligible {
            self.controller.take()
        } else {
            None
        };

        let mut payload = match Payload::parse(body) {
            Ok(p) => p,
            Err(e) => {
                debug!(url = %request.url, error = %e, "Unparseable chat body; passing through");
                return unchanged(request);
            }
        };

        if let Some(text) = adapter.extract_text(&payload) {
            self.capture(Direction::Outgoing, text, &request.url, adapter).await;
        }

        let Some(descriptor) = descriptor else {
            return unchanged(request);
        };
        let now = now_millis();
        if !descriptor.is_fresh(now, self.ttl_ms) {
            info!(age_ms = descriptor.age_ms(now), "Injection descriptor expired; discarded");
            return unchanged(request);
        }

        match adapter.inject_text(&mut payload, &descriptor) {
            Ok(true) => match payload.into_body() {
                Ok(new_body) => {
                    info!(
                        platform = %adapter.platform(),
                        added = descriptor.injection_text.len(),
                        "Context injected"
                    );
                    Intercepted {
                        request: OutgoingRequest {
                            body: Some(new_body),
                            ..request
                        },
                        injected: true,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to re-encode body; sending original");
                    unchanged(request)
                }
            },
            Ok(false) => {
                info!(platform = %adapter.platform(), "No field matched the staged message");
                unchanged(request)
            }
            Err(e) => {
                warn!(platform = %adapter.platform(), error = %e, "Injection failed; sending original");
                unchanged(request)
            }
        }
    }

    /// Inspect a response. Only JSON bodies from chat endpoints are read.
    pub async fn on_incoming(&self, url: &str, content_type: &str, body: &str) {
        if !content_type.contains("application/json") {
            return;
        }
        let Some((adapter, _)) = self.classify(url) else {
            return;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
            return;
        };
        if let Some(text) = incoming_text(&json) {
            self.capture(Direction::Incoming, text, url, adapter).await;
        }
    }

    async fn capture(
        &self,
        direction: Direction,
        text: String,
        url: &str,
        adapter: &dyn PlatformAdapter,
    ) {
        let Some(sink) = &self.sink else {
            return;
        };
        debug!(?direction, platform = %adapter.platform(), chars = text.len(), "Captured chat text");
        sink.forward(CaptureEvent {
            direction,
            text,
            url: url.to_string(),
            timestamp: now_millis(),
            platform: Some(adapter.platform().as_str().to_string()),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethmem_types::injection::InjectionDescriptor;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CaptureEvent>>);

    #[async_trait]
    impl CaptureSink for Recorder {
        async fn forward(&self, event: CaptureEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    const CHATGPT_URL: &str = "https://chatgpt.com/backend-api/conversation";

    fn chatgpt_body(text: &str) -> String {
        json!({"messages": [{"content": {"content_type": "text", "parts": [text]}}]}).to_string()
    }

    fn setup() -> (NetworkInterceptor, Arc<InjectionController>, Arc<Recorder>) {
        let controller = Arc::new(InjectionController::new());
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn CaptureSink> = recorder.clone();
        (
            NetworkInterceptor::new(controller.clone(), Some(sink)),
            controller,
            recorder,
        )
    }

    #[tokio::test]
    async fn test_capture_then_inject_once() {
        let (icpt, controller, recorder) = setup();
        controller.stage("I love sushi", " [ctx]");

        let out = icpt
            .on_outgoing(OutgoingRequest::post(Primitive::Fetch, CHATGPT_URL, chatgpt_body("I love sushi")))
            .await;
        assert!(out.injected);
        let body: serde_json::Value = serde_json::from_str(out.request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["messages"][0]["content"]["parts"][0], "I love sushi [ctx]");

        // Captured text is the user's own, without injected context.
        let captured = recorder.0.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].text, "I love sushi");
        assert_eq!(captured[0].platform.as_deref(), Some("chatgpt"));

        // At most once: a second identical call goes out untouched.
        let again = icpt
            .on_outgoing(OutgoingRequest::post(Primitive::Fetch, CHATGPT_URL, chatgpt_body("I love sushi")))
            .await;
        assert!(!again.injected);
    }

    #[tokio::test]
    async fn test_expired_descriptor_never_applied() {
        let (icpt, controller, _) = setup();
        controller.stage_descriptor(InjectionDescriptor {
            original_message: "hello".into(),
            injection_text: " [ctx]".into(),
            timestamp: now_millis() - 3000,
        });
        let req = OutgoingRequest::post(Primitive::Fetch, CHATGPT_URL, chatgpt_body("hello"));
        let out = icpt.on_outgoing(req.clone()).await;
        assert!(!out.injected);
        assert_eq!(out.request, req);
        assert!(!controller.is_staged());
    }

    #[tokio::test]
    async fn test_parse_failure_is_fail_open_and_consumes() {
        let (icpt, controller, _) = setup();
        controller.stage("hello", " [ctx]");
        let req = OutgoingRequest::post(Primitive::Fetch, CHATGPT_URL, "{not json");
        let out = icpt.on_outgoing(req.clone()).await;
        assert_eq!(out.request, req);
        assert!(!controller.is_staged());
    }

    #[tokio::test]
    async fn test_mismatch_consumes_without_rewrite() {
        let (icpt, controller, _) = setup();
        controller.stage("hello", " [ctx]");
        let req = OutgoingRequest::post(Primitive::Fetch, CHATGPT_URL, chatgpt_body("goodbye"));
        let out = icpt.on_outgoing(req.clone()).await;
        assert_eq!(out.request, req);
        assert!(!controller.is_staged());
    }

    #[tokio::test]
    async fn test_observe_only_and_unknown_urls_keep_descriptor() {
        let (icpt, controller, recorder) = setup();
        controller.stage("hello", " [ctx]");
        let observe = OutgoingRequest::post(
            Primitive::Fetch,
            "https://claude.ai/api/organizations/o/chat_conversations/c",
            json!({"prompt": "hello"}).to_string(),
        );
        assert!(!icpt.on_outgoing(observe).await.injected);
        let other = OutgoingRequest::post(Primitive::Fetch, "https://example.com/track", "{}");
        assert!(!icpt.on_outgoing(other).await.injected);
        assert!(controller.is_staged());
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claude_completion_routed_before_chatgpt() {
        let (icpt, controller, _) = setup();
        let url = "https://claude.ai/api/organizations/o/chat_conversations/c/completion";
        let (adapter, kind) = icpt.classify(url).unwrap();
        assert_eq!(adapter.platform().as_str(), "claude");
        assert_eq!(kind, EndpointKind::Completion);

        controller.stage("My name is Alex", " [ctx]");
        let out = icpt
            .on_outgoing(OutgoingRequest::post(
                Primitive::LegacyRequest,
                url,
                json!({"prompt": "My name is Alex"}).to_string(),
            ))
            .await;
        assert!(out.injected);
    }

    #[tokio::test]
    async fn test_socket_frames_are_captured_not_rewritten() {
        let (icpt, controller, recorder) = setup();
        controller.stage("hello", " [ctx]");
        let out = icpt
            .on_outgoing(OutgoingRequest::post(Primitive::Socket, CHATGPT_URL, chatgpt_body("hello")))
            .await;
        assert!(!out.injected);
        assert!(controller.is_staged());
        assert_eq!(recorder.0.lock().unwrap()[0].text, "hello");
    }

    #[tokio::test]
    async fn test_incoming_capture() {
        let (icpt, _, recorder) = setup();
        let body = json!({"message": {"content": {"parts": ["Sure!"]}}}).to_string();
        icpt.on_incoming(CHATGPT_URL, "application/json; charset=utf-8", &body).await;
        icpt.on_incoming(CHATGPT_URL, "text/event-stream", &body).await;
        let captured = recorder.0.lock().unwrap().clone();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].direction, Direction::Incoming);
        assert_eq!(captured[0].text, "Sure!");
    }
}
