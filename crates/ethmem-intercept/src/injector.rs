//! SmartInjector: the pre-send hook.
//!
//! Right before the user's message is transmitted, the injector asks the
//! coordination process for relevant memories and, when there are any,
//! stages the formatted context for the interceptor to append.

use crate::controller::InjectionController;
use async_trait::async_trait;
use ethmem_types::injection::InjectionDescriptor;
use ethmem_wire::bus::SmartOutcome;
use ethmem_wire::{PageClient, WireError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Source of smart-processing results.
#[async_trait]
pub trait SmartBackend: Send + Sync {
    async fn process(&self, message: &str, platform: Option<&str>) -> Result<SmartOutcome, WireError>;
}

#[async_trait]
impl SmartBackend for PageClient {
    async fn process(&self, message: &str, platform: Option<&str>) -> Result<SmartOutcome, WireError> {
        self.smart(message, platform).await?.decode()
    }
}

pub struct SmartInjector {
    backend: Arc<dyn SmartBackend>,
    controller: Arc<InjectionController>,
    platform: Option<String>,
}

impl SmartInjector {
    pub fn new(
        backend: Arc<dyn SmartBackend>,
        controller: Arc<InjectionController>,
        platform: Option<String>,
    ) -> Self {
        Self {
            backend,
            controller,
            platform,
        }
    }

    /// Run before sending `message`. Returns the staged descriptor, if any.
    /// Errors are logged and the message goes out without context.
    pub async fn before_send(&self, message: &str) -> Option<InjectionDescriptor> {
        if message.trim().is_empty() {
            return None;
        }
        let outcome = match self.backend.process(message, self.platform.as_deref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Smart processing unavailable; sending without context");
                return None;
            }
        };
        if let Some(memory) = &outcome.new_memory {
            debug!(category = %memory.category, "New memory stored from outgoing message");
        }
        if outcome.injection_text.is_empty() {
            debug!("No relevant memories for this message");
            return None;
        }
        info!(
            memories = outcome.relevant_memories.len(),
            "Staging context for next outgoing message"
        );
        Some(self.controller.stage(message, outcome.injection_text))
    }
}
