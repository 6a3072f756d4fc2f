//! Page ↔ bridge channel.
//!
//! The page side posts `{type, payload}` envelopes; the bridge accepts only
//! posts from the page's own origin, forwards outgoing captures to the bus
//! as extraction requests, and answers smart-processing requests.

use crate::bus::{BusRequest, BusResponse};
use crate::correlate::{IdSequence, PendingTable};
use crate::error::WireError;
use crate::router::MessageRouter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Direction of captured chat text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Typed by the user.
    Outgoing,
    /// Produced by the assistant.
    Incoming,
}

/// A captured chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub direction: Direction,
    pub text: String,
    pub url: String,
    /// Capture instant in milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Envelope exchanged over the page channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PageMessage {
    /// Captured chat text.
    ChatgptLog(CaptureEvent),
    /// Smart-processing request from the page.
    EthmemSmart {
        request_id: u64,
        message: String,
        #[serde(default)]
        platform: Option<String>,
    },
    /// Smart-processing response to the page.
    EthmemSmartRes {
        request_id: u64,
        response: BusResponse,
    },
    /// UI trigger. Acknowledged and otherwise unused here.
    ExtLogoClick,
}

/// A message as posted on the page, with the sender's origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePost {
    pub origin: String,
    pub data: Value,
}

/// Remembers recently forwarded captures so identical `(text, timestamp)`
/// pairs go out once.
#[derive(Debug, Default)]
pub struct ProcessedWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl ProcessedWindow {
    /// Keys kept before compaction.
    pub const CAPACITY: usize = 100;
    /// Keys kept after compaction.
    pub const RETAIN: usize = 50;

    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key. Returns false if it was already present.
    pub fn insert(&mut self, key: String) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        if self.order.len() > Self::CAPACITY {
            while self.order.len() > Self::RETAIN {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Bridge between the page channel and the bus.
pub struct PageBridge {
    origin: String,
    router: MessageRouter,
    to_page: mpsc::Sender<PagePost>,
    window: ProcessedWindow,
}

impl PageBridge {
    /// Wire a page client to `router` through a new bridge task.
    pub fn connect(origin: &str, router: MessageRouter, smart_timeout: Duration) -> PageClient {
        let (page_tx, bridge_rx) = mpsc::channel::<PagePost>(256);
        let (bridge_tx, page_rx) = mpsc::channel::<PagePost>(256);

        let bridge = PageBridge {
            origin: origin.to_string(),
            router,
            to_page: bridge_tx,
            window: ProcessedWindow::new(),
        };
        tokio::spawn(bridge.run(bridge_rx));

        PageClient::start(origin, page_tx, page_rx, smart_timeout)
    }

    async fn run(mut self, mut from_page: mpsc::Receiver<PagePost>) {
        while let Some(post) = from_page.recv().await {
            if post.origin != self.origin {
                warn!(origin = %post.origin, "Dropping page message from foreign origin");
                continue;
            }
            let Ok(message) = serde_json::from_value::<PageMessage>(post.data) else {
                continue;
            };
            self.dispatch(message);
        }
        debug!("Page bridge stopped");
    }

    fn dispatch(&mut self, message: PageMessage) {
        match message {
            PageMessage::ChatgptLog(event) => self.on_capture(event),
            PageMessage::EthmemSmart {
                request_id,
                message,
                platform,
            } => {
                let router = self.router.clone();
                let to_page = self.to_page.clone();
                let origin = self.origin.clone();
                tokio::spawn(async move {
                    let response = router
                        .request(BusRequest::ProcessMessageSmart { message, platform })
                        .await
                        .unwrap_or_else(|e| BusResponse::err(e.to_string()));
                    let reply = PageMessage::EthmemSmartRes {
                        request_id,
                        response,
                    };
                    match serde_json::to_value(&reply) {
                        Ok(data) => {
                            if to_page.send(PagePost { origin, data }).await.is_err() {
                                debug!(request_id = %request_id, "Page closed before smart response");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode smart response"),
                    }
                });
            }
            PageMessage::EthmemSmartRes { .. } => {}
            PageMessage::ExtLogoClick => debug!("Logo click received"),
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        let text = event.text.trim();
        if text.is_empty() {
            return;
        }
        if event.direction == Direction::Incoming {
            debug!(url = %event.url, chars = text.len(), "Assistant reply captured");
            return;
        }
        if !self.window.insert(format!("{}{}", text, event.timestamp)) {
            debug!("Capture already forwarded");
            return;
        }
        info!(url = %event.url, chars = text.len(), "User message captured");
        let router = self.router.clone();
        let request = BusRequest::ExtractMemory {
            text: text.to_string(),
            platform: event.platform,
        };
        tokio::spawn(async move {
            if let Err(e) = router.request(request).await {
                warn!(error = %e, "Extraction request failed");
            }
        });
    }
}

/// Page-side handle: posts captures and issues smart requests.
#[derive(Clone)]
pub struct PageClient {
    origin: String,
    to_bridge: mpsc::Sender<PagePost>,
    pending: Arc<PendingTable<u64, BusResponse>>,
    ids: Arc<IdSequence>,
    smart_timeout: Duration,
}

impl PageClient {
    fn start(
        origin: &str,
        to_bridge: mpsc::Sender<PagePost>,
        mut from_bridge: mpsc::Receiver<PagePost>,
        smart_timeout: Duration,
    ) -> Self {
        let pending: Arc<PendingTable<u64, BusResponse>> = Arc::new(PendingTable::new());
        let reader_pending = Arc::clone(&pending);
        let expected_origin = origin.to_string();
        tokio::spawn(async move {
            while let Some(post) = from_bridge.recv().await {
                if post.origin != expected_origin {
                    continue;
                }
                if let Ok(PageMessage::EthmemSmartRes {
                    request_id,
                    response,
                }) = serde_json::from_value::<PageMessage>(post.data)
                {
                    reader_pending.resolve(&request_id, response);
                }
            }
        });

        Self {
            origin: origin.to_string(),
            to_bridge,
            pending,
            ids: Arc::new(IdSequence::new()),
            smart_timeout,
        }
    }

    /// Post an envelope from this page's origin.
    pub async fn post(&self, message: &PageMessage) -> Result<(), WireError> {
        let data = serde_json::to_value(message)?;
        self.post_raw(&self.origin, data).await
    }

    /// Post arbitrary data claiming `origin`.
    pub async fn post_raw(&self, origin: &str, data: Value) -> Result<(), WireError> {
        self.to_bridge
            .send(PagePost {
                origin: origin.to_string(),
                data,
            })
            .await
            .map_err(|_| WireError::ConnectionClosed)
    }

    /// Forward a captured message.
    pub async fn capture(&self, event: CaptureEvent) -> Result<(), WireError> {
        self.post(&PageMessage::ChatgptLog(event)).await
    }

    /// Ask the coordination process for relevant memories and fresh extraction.
    pub async fn smart(
        &self,
        message: &str,
        platform: Option<&str>,
    ) -> Result<BusResponse, WireError> {
        let request_id = self.ids.next();
        let rx = self.pending.register(request_id);
        let msg = PageMessage::EthmemSmart {
            request_id,
            message: message.to_string(),
            platform: platform.map(String::from),
        };
        if let Err(e) = self.post(&msg).await {
            self.pending.discard(&request_id);
            return Err(e);
        }
        self.pending
            .wait(&request_id, rx, self.smart_timeout, "ETHMEM_SMART")
            .await
    }
}
