//! EthMem message plumbing.
//!
//! Every hop between execution contexts is an asynchronous request/response
//! pair tagged with a correlation id and bounded by an operation timeout.
//!
//! ## Architecture
//!
//! - **MessageRouter**: typed bus between the page side and the coordination process
//! - **PageBridge**: same-origin page channel that forwards captures and smart requests
//! - **PendingTable**: correlation-id table shared by the router, bridge and model manager
//! - **codec**: 4-byte big-endian length-prefixed JSON frames for subprocess hosts

pub mod bus;
pub mod codec;
pub mod correlate;
pub mod error;
pub mod model_rpc;
pub mod page;
pub mod router;

pub use bus::{BusRequest, BusResponse};
pub use correlate::PendingTable;
pub use error::WireError;
pub use page::{PageBridge, PageClient, PageMessage};
pub use router::{BusHandler, MessageRouter};
