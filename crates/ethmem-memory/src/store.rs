//! SQLite-backed `MemoryStore`.

use async_trait::async_trait;
use ethmem_types::error::{EthMemError, EthMemResult};
use ethmem_types::memory::{
    check_transition, normalize_entity, Category, Memory, MemoryContext, MemoryId,
    MemoryMetadata, MemoryStatus, MemoryStore,
};
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::migration::run_migrations;

const SELECT_COLUMNS: &str =
    "id, timestamp, source, category, entity, description, context, metadata, status";

/// Memory store backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> EthMemResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| EthMemError::Memory(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")
            .map_err(|e| EthMemError::Memory(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and ephemeral sessions.
    pub fn open_in_memory() -> EthMemResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EthMemError::Memory(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> EthMemResult<Self> {
        run_migrations(&conn).map_err(|e| EthMemError::Memory(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking closure against the connection off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> EthMemResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> EthMemResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| EthMemError::Internal(e.to_string()))?;
            f(&guard)
        })
        .await
        .map_err(|e| EthMemError::Internal(e.to_string()))?
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<(Memory, bool)> {
    let context: String = row.get(6)?;
    let metadata: String = row.get(7)?;
    let status: String = row.get(8)?;
    let mut ok = true;
    let context: MemoryContext = match serde_json::from_str(&context) {
        Ok(c) => c,
        Err(_) => {
            ok = false;
            MemoryContext::default()
        }
    };
    let metadata = match serde_json::from_str(&metadata) {
        Ok(m) => m,
        Err(_) => {
            ok = false;
            MemoryMetadata {
                confidence: 0.0,
                model_used: String::new(),
                extraction_version: String::new(),
            }
        }
    };
    let memory = Memory {
        id: MemoryId(row.get(0)?),
        timestamp: row.get(1)?,
        source: row.get(2)?,
        category: Category(row.get(3)?),
        entity: row.get(4)?,
        description: row.get(5)?,
        context,
        metadata,
        status: MemoryStatus::parse(&status).unwrap_or_default(),
    };
    Ok((memory, ok))
}

fn load_one(conn: &Connection, id: &str) -> EthMemResult<Option<Memory>> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM memories WHERE id = ?1");
    let row = conn
        .query_row(&sql, rusqlite::params![id], row_to_memory)
        .optional()
        .map_err(|e| EthMemError::Memory(e.to_string()))?;
    Ok(row.map(|(m, _)| m))
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn init(&self) -> EthMemResult<()> {
        self.with_conn(|conn| run_migrations(conn).map_err(|e| EthMemError::Memory(e.to_string())))
            .await
    }

    async fn get_all_memories(&self) -> EthMemResult<Vec<Memory>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM memories ORDER BY timestamp, rowid");
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| EthMemError::Memory(e.to_string()))?;
            let rows = stmt
                .query_map([], row_to_memory)
                .map_err(|e| EthMemError::Memory(e.to_string()))?;
            let mut memories = Vec::new();
            for row in rows {
                let (memory, ok) = row.map_err(|e| EthMemError::Memory(e.to_string()))?;
                if !ok {
                    tracing::warn!(id = %memory.id, "Memory row has malformed JSON columns");
                }
                memories.push(memory);
            }
            Ok(memories)
        })
        .await
    }

    async fn get_memory(&self, id: &MemoryId) -> EthMemResult<Option<Memory>> {
        let id = id.0.clone();
        self.with_conn(move |conn| load_one(conn, &id)).await
    }

    async fn save_memory(&self, memory: &Memory) -> EthMemResult<()> {
        let memory = memory.clone();
        self.with_conn(move |conn| {
            let context = serde_json::to_string(&memory.context)
                .map_err(|e| EthMemError::Serialization(e.to_string()))?;
            let metadata = serde_json::to_string(&memory.metadata)
                .map_err(|e| EthMemError::Serialization(e.to_string()))?;
            conn.execute(
                "INSERT INTO memories (id, timestamp, source, category, entity, entity_norm, description, context, metadata, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    memory.id.0,
                    memory.timestamp,
                    memory.source,
                    memory.category.0,
                    memory.entity,
                    normalize_entity(&memory.entity),
                    memory.description,
                    context,
                    metadata,
                    memory.status.as_str(),
                ],
            )
            .map_err(|e| EthMemError::Memory(e.to_string()))?;
            debug!(id = %memory.id, category = %memory.category, "Memory saved");
            Ok(())
        })
        .await
    }

    async fn delete_memory(&self, id: &MemoryId) -> EthMemResult<bool> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            let n = conn
                .execute("DELETE FROM memories WHERE id = ?1", rusqlite::params![id])
                .map_err(|e| EthMemError::Memory(e.to_string()))?;
            Ok(n > 0)
        })
        .await
    }

    async fn clear_all_memories(&self) -> EthMemResult<u64> {
        self.with_conn(|conn| {
            let n = conn
                .execute("DELETE FROM memories", [])
                .map_err(|e| EthMemError::Memory(e.to_string()))?;
            Ok(n as u64)
        })
        .await
    }

    async fn is_duplicate(&self, candidate: &Memory) -> EthMemResult<bool> {
        let (category, entity_norm) = candidate.dedup_key();
        self.with_conn(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM memories WHERE category = ?1 AND entity_norm = ?2",
                    rusqlite::params![category, entity_norm],
                    |row| row.get(0),
                )
                .map_err(|e| EthMemError::Memory(e.to_string()))?;
            Ok(count > 0)
        })
        .await
    }

    async fn update_status(&self, id: &MemoryId, status: MemoryStatus) -> EthMemResult<Memory> {
        let id = id.0.clone();
        self.with_conn(move |conn| {
            let mut memory =
                load_one(conn, &id)?.ok_or_else(|| EthMemError::NotFound(id.clone()))?;
            check_transition(memory.status, status)?;
            conn.execute(
                "UPDATE memories SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )
            .map_err(|e| EthMemError::Memory(e.to_string()))?;
            memory.status = status;
            Ok(memory)
        })
        .await
    }
}
