//! Client-side capture and injection.
//!
//! A [`NetworkInterceptor`] sits in front of the page's network primitives.
//! It asks each [`PlatformAdapter`] in turn whether a call belongs to a chat
//! endpoint, forwards the user's text for extraction, and appends staged
//! context to the matching message. Every failure lets the original call
//! through untouched.

pub mod adapter;
pub mod chatgpt;
pub mod claude;
pub mod controller;
pub mod error;
pub mod gemini;
pub mod generic;
pub mod injector;
pub mod interceptor;

pub use adapter::{EndpointKind, Payload, PlatformAdapter};
pub use controller::InjectionController;
pub use error::AdapterError;
pub use injector::{SmartBackend, SmartInjector};
pub use interceptor::{CaptureSink, Intercepted, NetworkInterceptor, OutgoingRequest, Primitive};
