use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::SyncStore;
use crate::connections::Connection;
use crate::memories::models::StoredMemory;
use crate::models::{ConnectionId, ListQuery, RunId, UserId};
use crate::runs::{RunLog, RunLogQuery};
use crate::{Error, Result};

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Connection>,
    memories: HashMap<(ConnectionId, String), StoredMemory>,
    runs: HashMap<RunId, RunLog>,
}

/// In-memory SyncStore for local development and unit tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    connection_writes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert_connection` calls so far.
    pub fn connection_write_count(&self) -> u64 {
        self.connection_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        self.connection_writes.fetch_add(1, Ordering::SeqCst);
        self.inner
            .write()
            .await
            .connections
            .insert(connection.id, connection.clone());
        Ok(())
    }

    async fn get_connection(&self, id: ConnectionId) -> Result<Option<Connection>> {
        Ok(self.inner.read().await.connections.get(&id).cloned())
    }

    async fn list_connections(&self, user_id: UserId, query: ListQuery) -> Result<Vec<Connection>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Connection> = inner
            .connections
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.created_at);
        Ok(out
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn find_memory(
        &self,
        connection_id: ConnectionId,
        external_id: &str,
    ) -> Result<Option<StoredMemory>> {
        Ok(self
            .inner
            .read()
            .await
            .memories
            .get(&(connection_id, external_id.to_string()))
            .cloned())
    }

    async fn insert_memory(&self, memory: &StoredMemory) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let key = (memory.connection_id, memory.external_id.clone());
        if inner.memories.contains_key(&key) {
            return Ok(false);
        }
        inner.memories.insert(key, memory.clone());
        Ok(true)
    }

    async fn update_memory(&self, memory: &StoredMemory) -> Result<()> {
        let mut inner = self.inner.write().await;
        let key = (memory.connection_id, memory.external_id.clone());
        let Some(existing) = inner.memories.get_mut(&key) else {
            return Err(Error::NotFound(format!(
                "memory '{}' not found for connection {}",
                memory.external_id, memory.connection_id
            )));
        };
        let id = existing.id;
        let created_at = existing.created_at;
        *existing = StoredMemory {
            id,
            created_at,
            ..memory.clone()
        };
        Ok(())
    }

    async fn list_memories(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<StoredMemory>> {
        let inner = self.inner.read().await;
        let mut out: Vec<StoredMemory> = inner
            .memories
            .values()
            .filter(|m| m.connection_id == connection_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        Ok(out
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }

    async fn insert_run_log(&self, run: &RunLog) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.runs.contains_key(&run.id) {
            return Err(Error::Conflict(format!("run {} already exists", run.id)));
        }
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn update_run_log(&self, run: &RunLog) -> Result<()> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.runs.get_mut(&run.id) else {
            return Err(Error::NotFound(format!("run {} not found", run.id)));
        };
        if !existing.status.can_transition_to(run.status) {
            return Err(Error::InvalidInput(format!(
                "run {} cannot move from {} to {}",
                run.id,
                existing.status.as_str(),
                run.status.as_str()
            )));
        }
        *existing = run.clone();
        Ok(())
    }

    async fn get_run_log(&self, id: RunId) -> Result<Option<RunLog>> {
        Ok(self.inner.read().await.runs.get(&id).cloned())
    }

    async fn list_run_logs(&self, query: RunLogQuery) -> Result<Vec<RunLog>> {
        let inner = self.inner.read().await;
        let mut out: Vec<RunLog> = inner
            .runs
            .values()
            .filter(|r| query.connection_id.map_or(true, |c| r.connection_id == c))
            .filter(|r| query.user_id.map_or(true, |u| r.user_id == u))
            .filter(|r| query.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}
