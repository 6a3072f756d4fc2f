//! Command implementations. Every command goes through the coordination bus.

pub mod config;
pub mod memory;

use anyhow::{bail, Context};
use ethmem_wire::{BusRequest, MessageRouter};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A connected bus client plus output preferences.
pub struct Session {
    pub router: MessageRouter,
    pub json: bool,
}

impl Session {
    /// Send `request` and decode a successful payload.
    pub async fn call<T: DeserializeOwned>(&self, request: BusRequest) -> anyhow::Result<T> {
        let kind = request.kind();
        let response = self
            .router
            .request(request)
            .await
            .with_context(|| format!("{kind} got no reply"))?;
        if !response.success {
            bail!(response
                .error
                .unwrap_or_else(|| format!("{kind} failed")));
        }
        Ok(response.decode()?)
    }

    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
