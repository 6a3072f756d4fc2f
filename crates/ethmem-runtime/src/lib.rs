//! EthMem runtime: turning text into memories and memories into context.
//!
//! - [`extraction`]: remote strategy, local model strategy, ordered rule cascade, validation
//! - [`ranking`]: model-backed index ranking with a deterministic keyword/recency fallback
//! - [`lifecycle`]: the single-resident model manager, transport-agnostic
//! - [`host`]: transports to the isolated model host (subprocess or in-process)
//! - [`llm`]: OpenAI-compatible chat-completion driver
//! - [`smart`]: one-call extraction plus ranking against the remote endpoint

pub mod extraction;
pub mod host;
pub mod lifecycle;
pub mod llm;
pub mod ranking;
pub mod smart;

pub use extraction::ExtractionEngine;
pub use lifecycle::{InferenceResource, ModelError, ModelLifecycleManager};
pub use llm::{CompletionDriver, LlmError, OpenAiCompatDriver};
pub use ranking::RankingEngine;
