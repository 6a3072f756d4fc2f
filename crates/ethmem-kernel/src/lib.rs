//! Coordination process for EthMem.
//!
//! The kernel answers coordination-bus requests: it runs extraction and
//! ranking, gates new memories through the dedup check, manages the remote
//! API key and reports on the local model.

pub mod config;
pub mod dedup;
pub mod error;
pub mod kernel;

pub use dedup::{Admission, DedupGate};
pub use error::{KernelError, KernelResult};
pub use kernel::{DriverFactory, EthMemKernel};
