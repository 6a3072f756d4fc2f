use thiserror::Error;

/// Payload shape errors. The interceptor logs these and lets the call through.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Body is neither JSON nor a form body")]
    UnrecognizedBody,
    #[error("Unexpected payload shape: {0}")]
    Shape(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
