//! Persistent memory store for EthMem.
//!
//! Implements the `MemoryStore` contract from `ethmem-types` over a single
//! SQLite database. The pipeline only sees the trait; this crate owns the
//! schema and its migrations.

pub mod migration;
pub mod store;

pub use store::SqliteMemoryStore;
