//! MessageRouter: typed request/response bus to the coordination process.
//!
//! Requests travel as serialized frames tagged with a correlation id. The
//! endpoint task handles each frame concurrently and sends back a reply with
//! the same id; the client side resolves its pending entry from that reply.
//! Unknown or malformed messages get an empty reply and are otherwise ignored.

use crate::bus::{BusRequest, BusResponse};
use crate::correlate::{IdSequence, PendingTable};
use crate::error::WireError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Handles bus requests inside the coordination process.
#[async_trait]
pub trait BusHandler: Send + Sync + 'static {
    /// Handle one request.
    async fn handle(&self, request: BusRequest) -> BusResponse;
}

/// Per-operation deadlines.
#[derive(Debug, Clone, Copy)]
pub struct RouterTimeouts {
    /// Plain store/config requests.
    pub request: Duration,
    /// Requests that may wait on a remote endpoint or the local model.
    pub inference: Duration,
}

impl Default for RouterTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(5),
            inference: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct Frame {
    id: u64,
    body: Value,
}

#[derive(Debug)]
struct Reply {
    id: u64,
    response: Option<BusResponse>,
}

struct RouterInner {
    outbound: mpsc::Sender<Frame>,
    pending: PendingTable<u64, Option<BusResponse>>,
    ids: IdSequence,
    timeouts: RouterTimeouts,
}

/// Client handle to the bus. Cheap to clone.
#[derive(Clone)]
pub struct MessageRouter {
    inner: Arc<RouterInner>,
}

const CHANNEL_CAPACITY: usize = 256;

impl MessageRouter {
    /// Start an endpoint serving `handler` and return a client connected to it.
    pub fn spawn(handler: Arc<dyn BusHandler>, timeouts: RouterTimeouts) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>(CHANNEL_CAPACITY);

        let inner = Arc::new(RouterInner {
            outbound: frame_tx,
            pending: PendingTable::new(),
            ids: IdSequence::new(),
            timeouts,
        });

        tokio::spawn(serve_endpoint(handler, frame_rx, reply_tx));
        tokio::spawn(pump_replies(Arc::downgrade(&inner), reply_rx));

        Self { inner }
    }

    /// Send a typed request and wait for its response.
    pub async fn request(&self, request: BusRequest) -> Result<BusResponse, WireError> {
        let timeout = if request.uses_inference() {
            self.inner.timeouts.inference
        } else {
            self.inner.timeouts.request
        };
        let kind = request.kind();
        let body = serde_json::to_value(&request)?;
        self.exchange(body, timeout, kind)
            .await?
            .ok_or(WireError::Ignored)
    }

    /// Send an untyped message. `Ok(None)` means the endpoint ignored it.
    pub async fn request_raw(&self, body: Value) -> Result<Option<BusResponse>, WireError> {
        let timeout = self.inner.timeouts.request;
        self.exchange(body, timeout, "raw").await
    }

    /// Number of requests awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    async fn exchange(
        &self,
        body: Value,
        timeout: Duration,
        operation: &str,
    ) -> Result<Option<BusResponse>, WireError> {
        let id = self.inner.ids.next();
        let rx = self.inner.pending.register(id);
        if self.inner.outbound.send(Frame { id, body }).await.is_err() {
            self.inner.pending.discard(&id);
            return Err(WireError::ConnectionClosed);
        }
        self.inner.pending.wait(&id, rx, timeout, operation).await
    }
}

async fn serve_endpoint(
    handler: Arc<dyn BusHandler>,
    mut frames: mpsc::Receiver<Frame>,
    replies: mpsc::Sender<Reply>,
) {
    while let Some(frame) = frames.recv().await {
        let handler = Arc::clone(&handler);
        let replies = replies.clone();
        tokio::spawn(async move {
            let response = match BusRequest::parse(&frame.body) {
                Some(request) => {
                    debug!(id = frame.id, kind = request.kind(), "Bus request");
                    Some(handler.handle(request).await)
                }
                None => None,
            };
            if replies
                .send(Reply {
                    id: frame.id,
                    response,
                })
                .await
                .is_err()
            {
                warn!(id = frame.id, "Bus client gone before reply");
            }
        });
    }
    debug!("Bus endpoint stopped");
}

async fn pump_replies(inner: std::sync::Weak<RouterInner>, mut replies: mpsc::Receiver<Reply>) {
    while let Some(reply) = replies.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.pending.resolve(&reply.id, reply.response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl BusHandler for EchoHandler {
        async fn handle(&self, request: BusRequest) -> BusResponse {
            match request {
                BusRequest::ExtractMemory { text, .. } => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    BusResponse::ok(&json!({"echo": text}))
                }
                BusRequest::GetApiStatus => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    BusResponse::empty()
                }
                other => BusResponse::ok(&json!({"kind": other.kind()})),
            }
        }
    }

    fn router(request_ms: u64) -> MessageRouter {
        MessageRouter::spawn(
            Arc::new(EchoHandler),
            RouterTimeouts {
                request: Duration::from_millis(request_ms),
                inference: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let bus = router(1000);
        let resp = bus.request(BusRequest::GetMemories).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.payload.unwrap()["kind"], "GET_MEMORIES");
        assert_eq!(bus.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_requests_correlate() {
        let bus = router(1000);
        let slow = bus.request(BusRequest::ExtractMemory {
            text: "slow".into(),
            platform: None,
        });
        let fast = bus.request(BusRequest::GetMemoryStats);
        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow.unwrap().payload.unwrap()["echo"], "slow");
        assert_eq!(fast.unwrap().payload.unwrap()["kind"], "GET_MEMORY_STATS");
    }

    #[tokio::test]
    async fn test_unknown_message_ignored() {
        let bus = router(1000);
        let resp = bus
            .request_raw(json!({"type": "WALLET_CONNECTED"}))
            .await
            .unwrap();
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_timeout_rejects_only_that_request() {
        let bus = router(50);
        let err = bus.request(BusRequest::GetApiStatus).await.unwrap_err();
        assert!(matches!(err, WireError::Timeout { .. }));
        let ok = bus.request(BusRequest::GetMemories).await.unwrap();
        assert!(ok.success);
    }
}
