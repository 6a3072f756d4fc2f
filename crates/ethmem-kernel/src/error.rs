//! Kernel-specific error types.

use ethmem_types::error::EthMemError;
use thiserror::Error;

/// Kernel error type wrapping EthMemError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped EthMemError.
    #[error(transparent)]
    EthMem(#[from] EthMemError),

    /// The coordination process failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
