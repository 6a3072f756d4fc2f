//! Chat platforms the interceptor knows how to read and rewrite.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A chat platform whose network traffic carries user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// chatgpt.com / chat.openai.com.
    #[serde(rename = "chatgpt")]
    ChatGpt,
    /// claude.ai.
    Claude,
    /// gemini.google.com.
    Gemini,
    /// Any other chat-shaped endpoint.
    Generic,
}

impl Platform {
    /// Stable lowercase name, as stored in memory context.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::ChatGpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
            Platform::Generic => "generic",
        }
    }

    /// Parse a platform name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "chatgpt" | "openai" => Some(Platform::ChatGpt),
            "claude" => Some(Platform::Claude),
            "gemini" | "bard" => Some(Platform::Gemini),
            "generic" => Some(Platform::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
