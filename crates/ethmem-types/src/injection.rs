//! The ephemeral, single-use injection descriptor.

use crate::memory::now_millis;
use serde::{Deserialize, Serialize};

/// A descriptor older than this (in milliseconds) is never applied.
pub const DEFAULT_INJECTION_TTL_MS: u64 = 3000;

/// Intent to append context to the next matching outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionDescriptor {
    /// Exact text the user is about to send.
    pub original_message: String,
    /// Context block to append.
    pub injection_text: String,
    /// Creation instant in milliseconds.
    pub timestamp: i64,
}

impl InjectionDescriptor {
    /// Create a descriptor stamped with the current time.
    pub fn new(original_message: impl Into<String>, injection_text: impl Into<String>) -> Self {
        Self {
            original_message: original_message.into(),
            injection_text: injection_text.into(),
            timestamp: now_millis(),
        }
    }

    /// Age in milliseconds at `now`. Clock skew into the future counts as zero.
    pub fn age_ms(&self, now: i64) -> u64 {
        now.saturating_sub(self.timestamp).max(0) as u64
    }

    /// Whether the descriptor may still be applied at `now`.
    pub fn is_fresh(&self, now: i64, ttl_ms: u64) -> bool {
        self.age_ms(now) < ttl_ms
    }

    /// Whether `candidate` is the message this descriptor targets.
    /// Both sides are compared trimmed.
    pub fn targets(&self, candidate: &str) -> bool {
        let wanted = self.original_message.trim();
        !wanted.is_empty() && candidate.trim() == wanted
    }
}
