//! Core types and traits for EthMem.
//!
//! This crate defines the shared data structures used by the interceptor,
//! the message router, the extraction/ranking runtime, and the memory store.
//! It contains no business logic.

pub mod config;
pub mod error;
pub mod injection;
pub mod memory;
pub mod model;
pub mod platform;
