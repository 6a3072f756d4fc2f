//! DedupGate: the check-then-insert step in front of the store.
//!
//! Two memories are equivalent when they share a category and their
//! trimmed, case-folded entities are equal. The check and the insert run
//! under one lock, so concurrent extractions of the same fact store at most
//! one record.

use ethmem_types::error::EthMemResult;
use ethmem_types::memory::{Memory, MemoryStore};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What happened to a candidate at the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The candidate was new and is now persisted.
    Stored(Memory),
    /// An equivalent memory already exists; the candidate was dropped.
    Duplicate(Memory),
}

impl Admission {
    pub fn memory(&self) -> &Memory {
        match self {
            Admission::Stored(m) | Admission::Duplicate(m) => m,
        }
    }

    pub fn is_stored(&self) -> bool {
        matches!(self, Admission::Stored(_))
    }
}

pub struct DedupGate {
    store: Arc<dyn MemoryStore>,
    lock: Mutex<()>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Whether an equivalent memory is already stored. A store failure
    /// counts as "not a duplicate".
    pub async fn is_duplicate(&self, candidate: &Memory) -> bool {
        match self.store.is_duplicate(candidate).await {
            Ok(dup) => dup,
            Err(e) => {
                warn!(error = %e, "Duplicate check failed; treating as new");
                false
            }
        }
    }

    /// Persist `candidate` unless an equivalent memory exists.
    pub async fn admit(&self, candidate: Memory) -> EthMemResult<Admission> {
        let _guard = self.lock.lock().await;
        if self.is_duplicate(&candidate).await {
            debug!(
                category = %candidate.category,
                entity = %candidate.entity,
                "Duplicate memory dropped"
            );
            return Ok(Admission::Duplicate(candidate));
        }
        self.store.save_memory(&candidate).await?;
        info!(
            id = %candidate.id,
            category = %candidate.category,
            model = %candidate.metadata.model_used,
            "Memory stored"
        );
        Ok(Admission::Stored(candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethmem_memory::SqliteMemoryStore;
    use ethmem_types::error::EthMemError;
    use ethmem_types::memory::{
        Category, MemoryContext, MemoryId, MemoryStats, MemoryStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn memory(category: &str, entity: &str) -> Memory {
        Memory::new(
            format!("about {entity}"),
            Category::new(category),
            entity,
            None,
            MemoryContext::for_platform("chatgpt"),
            0.85,
            "pattern-based",
        )
    }

    fn gate() -> (DedupGate, Arc<SqliteMemoryStore>) {
        let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
        (DedupGate::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_second_equivalent_is_dropped() {
        let (gate, store) = gate();
        assert!(gate.admit(memory("location", "denver")).await.unwrap().is_stored());
        let again = gate.admit(memory("location", " Denver ")).await.unwrap();
        assert!(!again.is_stored());
        assert!(gate.admit(memory("hobby", "denver")).await.unwrap().is_stored());
        assert_eq!(store.get_all_memories().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_admits_store_one() {
        let (gate, store) = gate();
        let gate = Arc::new(gate);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                tokio::spawn(async move { gate.admit(memory("name", "alex")).await.unwrap() })
            })
            .collect();
        let mut stored = 0;
        for h in handles {
            if h.await.unwrap().is_stored() {
                stored += 1;
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(store.get_all_memories().await.unwrap().len(), 1);
    }

    /// Store whose duplicate check always fails.
    struct FlakyStore {
        saved: AtomicUsize,
    }

    #[async_trait]
    impl MemoryStore for FlakyStore {
        async fn init(&self) -> EthMemResult<()> {
            Ok(())
        }
        async fn get_all_memories(&self) -> EthMemResult<Vec<Memory>> {
            Ok(Vec::new())
        }
        async fn get_memory(&self, _id: &MemoryId) -> EthMemResult<Option<Memory>> {
            Ok(None)
        }
        async fn save_memory(&self, _memory: &Memory) -> EthMemResult<()> {
            self.saved.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete_memory(&self, _id: &MemoryId) -> EthMemResult<bool> {
            Ok(false)
        }
        async fn clear_all_memories(&self) -> EthMemResult<u64> {
            Ok(0)
        }
        async fn is_duplicate(&self, _candidate: &Memory) -> EthMemResult<bool> {
            Err(EthMemError::Memory("database is locked".into()))
        }
        async fn update_status(&self, id: &MemoryId, _status: MemoryStatus) -> EthMemResult<Memory> {
            Err(EthMemError::NotFound(id.to_string()))
        }
        async fn stats(&self) -> EthMemResult<MemoryStats> {
            Ok(MemoryStats::from_memories(&[]))
        }
    }

    #[tokio::test]
    async fn test_store_error_counts_as_new() {
        let store = Arc::new(FlakyStore {
            saved: AtomicUsize::new(0),
        });
        let gate = DedupGate::new(store.clone());
        assert!(gate.admit(memory("food", "pizza")).await.unwrap().is_stored());
        assert_eq!(store.saved.load(Ordering::SeqCst), 1);
    }
}
