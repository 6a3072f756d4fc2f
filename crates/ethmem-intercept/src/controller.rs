//! InjectionController: the process-wide single injection slot.
//!
//! Staging overwrites whatever is in the slot. Consumers take the
//! descriptor out atomically, so two concurrent calls can never both apply
//! the same descriptor.

use ethmem_types::injection::InjectionDescriptor;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct InjectionController {
    slot: Mutex<Option<InjectionDescriptor>>,
}

impl InjectionController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<InjectionDescriptor>> {
        // A panic while holding the guard cannot leave the Option half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stage a descriptor for the next matching outgoing call.
    pub fn stage(
        &self,
        original_message: impl Into<String>,
        injection_text: impl Into<String>,
    ) -> InjectionDescriptor {
        let descriptor = InjectionDescriptor::new(original_message, injection_text);
        if self.lock().replace(descriptor.clone()).is_some() {
            debug!("Unconsumed injection descriptor overwritten");
        }
        descriptor
    }

    /// Stage an already-built descriptor.
    pub fn stage_descriptor(&self, descriptor: InjectionDescriptor) {
        *self.lock() = Some(descriptor);
    }

    /// Take and clear the slot in one step.
    pub fn take(&self) -> Option<InjectionDescriptor> {
        self.lock().take()
    }

    /// Whether a descriptor is waiting.
    pub fn is_staged(&self) -> bool {
        self.lock().is_some()
    }
}
