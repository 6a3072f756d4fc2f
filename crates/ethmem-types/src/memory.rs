//! Memory record types, the category vocabulary, and the `MemoryStore` contract.

use crate::error::{EthMemError, EthMemResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Minimum confidence a non-manual memory must carry to be persisted.
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Confidence assumed when an extractor omits one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Version stamped into `metadata.extractionVersion`.
pub const EXTRACTION_VERSION: &str = "2.0";

/// `modelUsed` value for rule-cascade extractions.
pub const MODEL_PATTERN_BASED: &str = "pattern-based";

/// `modelUsed` value for records entered by hand.
pub const MODEL_MANUAL: &str = "manual";

/// Current wall-clock time in milliseconds since the UNIX epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Unique identifier for a memory record (`mem-<millis>-<random>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Create a new unique MemoryId.
    pub fn new() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("mem-{}-{}", now_millis(), &suffix[..9]))
    }

    /// Borrow the raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Categories the extractors are prompted with. The vocabulary is open:
/// records with other categories are accepted and stored as-is.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "location",
    "name",
    "age",
    "occupation",
    "food",
    "hobby",
    "music",
    "movie",
    "family",
    "friend",
    "colleague",
    "skill",
    "language",
    "education",
    "allergy",
    "medication",
    "condition",
    "visited",
    "planning",
    "preference",
    "relationship",
    "goal",
    "interest",
    "fact",
];

/// A memory category. Serialized as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(pub String);

impl Category {
    /// Build a category from any string, trimmed and lowercased.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Borrow the category name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this category belongs to the known vocabulary.
    pub fn is_known(&self) -> bool {
        KNOWN_CATEGORIES.contains(&self.0.as_str())
    }

    /// Render the human-readable description for an entity of this category.
    pub fn describe(&self, entity: &str) -> String {
        match self.0.as_str() {
            "location" => format!("User is from {entity}"),
            "name" => format!("User's name is {entity}"),
            "age" => format!("User is {entity} years old"),
            "occupation" => format!("User works as {entity}"),
            "food" => format!("User likes {entity}"),
            "hobby" => format!("User enjoys {entity}"),
            "music" => format!("User listens to {entity}"),
            "movie" => format!("User likes the movie {entity}"),
            "family" => format!("User's family includes {entity}"),
            "friend" => format!("User has a friend named {entity}"),
            "colleague" => format!("User works with {entity}"),
            "skill" => format!("User knows {entity}"),
            "language" => format!("User speaks {entity}"),
            "education" => format!("User studied {entity}"),
            "allergy" => format!("User is allergic to {entity}"),
            "medication" => format!("User takes {entity}"),
            "condition" => format!("User has {entity}"),
            "visited" => format!("User has visited {entity}"),
            "planning" => format!("User is planning {entity}"),
            "preference" => format!("User prefers {entity}"),
            "relationship" => format!("User's relationship: {entity}"),
            "goal" => format!("User's goal is {entity}"),
            "interest" => format!("User is interested in {entity}"),
            other => format!("User {other}: {entity}"),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a memory record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemoryStatus {
    /// Stored on this device only.
    #[serde(rename = "local")]
    Local,
    /// Copied to the user's own backup.
    #[serde(rename = "synced")]
    Synced,
    /// Anchored on-chain.
    #[serde(rename = "on-chain")]
    OnChain,
}

impl MemoryStatus {
    /// Stable string form used in storage and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Local => "local",
            MemoryStatus::Synced => "synced",
            MemoryStatus::OnChain => "on-chain",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(MemoryStatus::Local),
            "synced" => Some(MemoryStatus::Synced),
            "on-chain" => Some(MemoryStatus::OnChain),
            _ => None,
        }
    }

    /// A status may stay put or advance; it never regresses.
    pub fn can_transition_to(&self, next: MemoryStatus) -> bool {
        next >= *self
    }
}

impl Default for MemoryStatus {
    fn default() -> Self {
        MemoryStatus::Local
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a memory was observed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryContext {
    /// Conversation the utterance belonged to.
    pub conversation_id: String,
    /// Chat platform name (`chatgpt`, `claude`, ...).
    pub platform: String,
}

impl MemoryContext {
    /// Context for a fresh conversation on `platform`.
    pub fn for_platform(platform: impl Into<String>) -> Self {
        let platform = platform.into();
        Self {
            conversation_id: format!("{}-{}", platform, now_millis()),
            platform,
        }
    }
}

/// Extraction provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetadata {
    /// Confidence score (0.0 - 1.0).
    pub confidence: f64,
    /// `pattern-based`, `manual`, or the model that produced the record.
    pub model_used: String,
    /// Extraction pipeline version.
    pub extraction_version: String,
}

/// A structured fact extracted from conversation text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique, immutable id.
    pub id: MemoryId,
    /// Creation instant in milliseconds.
    pub timestamp: i64,
    /// The utterance the fact was derived from.
    pub source: String,
    /// Category from the (open) vocabulary.
    pub category: Category,
    /// Extracted value, trimmed.
    pub entity: String,
    /// Human-readable sentence.
    pub description: String,
    /// Where the fact was observed.
    pub context: MemoryContext,
    /// Extraction provenance.
    pub metadata: MemoryMetadata,
    /// Lifecycle status.
    #[serde(default)]
    pub status: MemoryStatus,
}

impl Memory {
    /// Build a new local memory. The entity is trimmed, the confidence is
    /// clamped into `[0, 1]`, and a blank description is replaced by the
    /// category's template.
    pub fn new(
        source: impl Into<String>,
        category: Category,
        entity: &str,
        description: Option<String>,
        context: MemoryContext,
        confidence: f64,
        model_used: impl Into<String>,
    ) -> Self {
        let entity = entity.trim().to_string();
        // Non-finite confidence is stored as 0; JSON has no NaN.
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| category.describe(&entity));
        Self {
            id: MemoryId::new(),
            timestamp: now_millis(),
            source: source.into(),
            category,
            entity,
            description,
            context,
            metadata: MemoryMetadata {
                confidence,
                model_used: model_used.into(),
                extraction_version: EXTRACTION_VERSION.to_string(),
            },
            status: MemoryStatus::Local,
        }
    }

    /// Whether this record came from the manual entry path.
    pub fn is_manual(&self) -> bool {
        self.metadata.model_used == MODEL_MANUAL
    }

    /// Key under which two memories count as the same fact.
    pub fn dedup_key(&self) -> (String, String) {
        (self.category.0.clone(), normalize_entity(&self.entity))
    }
}

/// Normalize an entity for duplicate comparison: trimmed and case-folded.
pub fn normalize_entity(entity: &str) -> String {
    entity.trim().to_lowercase()
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Total number of stored memories.
    pub total: u64,
    /// Count per category.
    pub by_category: BTreeMap<String, u64>,
    /// Count per status; always carries every status key.
    pub by_status: BTreeMap<String, u64>,
    /// Most recent memories, newest first.
    pub recent: Vec<Memory>,
}

impl MemoryStats {
    /// Number of records listed in `recent`.
    pub const RECENT_LIMIT: usize = 5;

    /// Compute stats over a full memory listing.
    pub fn from_memories(memories: &[Memory]) -> Self {
        let mut by_category = BTreeMap::new();
        let mut by_status: BTreeMap<String, u64> = [
            MemoryStatus::Local,
            MemoryStatus::Synced,
            MemoryStatus::OnChain,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();

        for m in memories {
            *by_category.entry(m.category.0.clone()).or_insert(0) += 1;
            *by_status.entry(m.status.as_str().to_string()).or_insert(0) += 1;
        }

        let mut recent: Vec<Memory> = memories.to_vec();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(Self::RECENT_LIMIT);

        Self {
            total: memories.len() as u64,
            by_category,
            by_status,
            recent,
        }
    }
}

/// Persistence contract consumed by the pipeline. The storage engine behind
/// it is a collaborator; only this CRUD surface is relied on.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Prepare the backing storage (idempotent).
    async fn init(&self) -> EthMemResult<()>;

    /// All stored memories, oldest first.
    async fn get_all_memories(&self) -> EthMemResult<Vec<Memory>>;

    /// A single memory by id.
    async fn get_memory(&self, id: &MemoryId) -> EthMemResult<Option<Memory>>;

    /// Insert a new memory. Fails if the id already exists.
    async fn save_memory(&self, memory: &Memory) -> EthMemResult<()>;

    /// Delete by id. Returns whether a record was removed.
    async fn delete_memory(&self, id: &MemoryId) -> EthMemResult<bool>;

    /// Remove every memory. Returns the number removed.
    async fn clear_all_memories(&self) -> EthMemResult<u64>;

    /// Whether an equivalent memory (same category, same normalized entity)
    /// is already stored.
    async fn is_duplicate(&self, candidate: &Memory) -> EthMemResult<bool>;

    /// Advance a memory's status. Regressions are rejected.
    async fn update_status(&self, id: &MemoryId, status: MemoryStatus) -> EthMemResult<Memory>;

    /// Aggregate statistics.
    async fn stats(&self) -> EthMemResult<MemoryStats> {
        let all = self.get_all_memories().await?;
        Ok(MemoryStats::from_memories(&all))
    }
}

/// Check a requested status change against the forward-only lifecycle.
pub fn check_transition(current: MemoryStatus, next: MemoryStatus) -> EthMemResult<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(EthMemError::InvalidTransition {
            from: current.to_string(),
            to: next.to_string(),
        })
    }
}
