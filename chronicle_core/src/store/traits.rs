use crate::connections::Connection;
use crate::memories::models::StoredMemory;
use crate::models::{ConnectionId, ListQuery, RunId, UserId};
use crate::runs::{RunLog, RunLogQuery};
use crate::Result;
use async_trait::async_trait;

/// Persistent store consumed by the sync pipeline.
///
/// Covers CRUD plus natural-key lookup for connections, memories, and run logs.
/// Query/filtering beyond what the pipeline needs lives outside this crate.
#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn upsert_connection(&self, connection: &Connection) -> Result<()>;
    async fn get_connection(&self, id: ConnectionId) -> Result<Option<Connection>>;
    async fn list_connections(&self, user_id: UserId, query: ListQuery) -> Result<Vec<Connection>>;

    /// Natural-key lookup by `(connection id, external id)`.
    async fn find_memory(
        &self,
        connection_id: ConnectionId,
        external_id: &str,
    ) -> Result<Option<StoredMemory>>;

    /// Insert unless a memory with the same natural key exists.
    ///
    /// Returns `false` (and writes nothing) when the key is already taken.
    async fn insert_memory(&self, memory: &StoredMemory) -> Result<bool>;

    /// Overwrite the mutable fields of an existing memory (matched by natural key).
    async fn update_memory(&self, memory: &StoredMemory) -> Result<()>;

    async fn list_memories(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<StoredMemory>>;

    async fn insert_run_log(&self, run: &RunLog) -> Result<()>;
    async fn update_run_log(&self, run: &RunLog) -> Result<()>;
    async fn get_run_log(&self, id: RunId) -> Result<Option<RunLog>>;
    async fn list_run_logs(&self, query: RunLogQuery) -> Result<Vec<RunLog>>;
}
