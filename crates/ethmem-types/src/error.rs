//! Shared error types for EthMem.

use thiserror::Error;

/// Top-level error type shared across the EthMem crates.
#[derive(Error, Debug)]
pub enum EthMemError {
    /// A memory store operation failed.
    #[error("Memory store error: {0}")]
    Memory(String),

    /// The requested memory was not found.
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// A status change would move a memory backwards in its lifecycle.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The remote inference endpoint failed.
    #[error("Remote inference error: {0}")]
    Remote(String),

    /// The local model resource failed.
    #[error("Model resource error: {0}")]
    Model(String),

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with EthMemError.
pub type EthMemResult<T> = Result<T, EthMemError>;
