//! Errors from the message layer.

use thiserror::Error;

/// Errors from the wire layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
    #[error("Request was ignored by the receiver")]
    Ignored,
    #[error("Rejected message from origin {origin}")]
    ForeignOrigin { origin: String },
    #[error("Remote side reported an error: {0}")]
    Remote(String),
}
