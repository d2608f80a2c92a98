//! SQLite-backed SyncStore (and delayed-task table).
//!
//! Persists connections, memories, run logs, and scheduled follow-up tasks in a
//! single WAL-mode SQLite file.
//!
//! Usage:
//! ```ignore
//! let store = SqliteStore::new("/path/to/chronicle.db").await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::traits::SyncStore;
use crate::connections::Connection;
use crate::memories::models::{MemoryMetadata, MemoryType, StoredMemory};
use crate::models::{ConnectionId, ListQuery, MemoryId, RunId, UserId};
use crate::runs::{RunKind, RunLog, RunLogQuery, RunStatus};
use crate::secrets::SealedSecret;
use crate::tasks::{QueuedTask, TaskKind, TaskQueue, TaskSubmission};
use crate::{Error, Result};

/// A durable, file-backed store backed by a single SQLite file (WAL mode).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create (or open) a SQLite store at the given file path.
    ///
    /// Creates the file and parent directories if they don't exist and runs the
    /// schema migration on startup.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::backend("sqlite_store", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path.display()))
            .map_err(db_err)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
            .map_err(db_err)?;

        Self::migrate(pool).await
    }

    /// Private in-memory database (single connection), for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(db_err)?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::backend("sqlite_store_migration", e))?;
        Ok(Self { pool })
    }

    /// Tasks whose `run_after` is at or before `now`, oldest first.
    pub async fn due_tasks(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>> {
        let rows = sqlx::query(
            "SELECT id, kind, payload, run_after, submitted_at FROM scheduled_tasks
             WHERE run_after <= ?1 ORDER BY run_after ASC LIMIT ?2",
        )
        .bind(fmt_dt(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(row_to_task).collect()
    }

    /// Remove a task once the host worker has executed it.
    pub async fn complete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    access_token BLOB NOT NULL,
    refresh_token BLOB,
    expires_at TEXT,
    scopes TEXT NOT NULL,
    active INTEGER NOT NULL,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS connections_user_idx ON connections(user_id, provider);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    external_id TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    metadata TEXT NOT NULL,
    payload TEXT NOT NULL,
    processed INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS memories_natural_key
    ON memories(connection_id, external_id);
CREATE INDEX IF NOT EXISTS memories_user_occurred_idx
    ON memories(user_id, occurred_at);

CREATE TABLE IF NOT EXISTS run_logs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    connection_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    input TEXT NOT NULL,
    output TEXT,
    error TEXT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    duration_ms INTEGER
);

CREATE INDEX IF NOT EXISTS run_logs_connection_idx ON run_logs(connection_id, started_at);

CREATE TABLE IF NOT EXISTS scheduled_tasks (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    run_after TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS scheduled_tasks_due_idx ON scheduled_tasks(run_after);
"#;

fn db_err(e: sqlx::Error) -> Error {
    Error::backend("sqlite_store", e)
}

fn json_err(e: serde_json::Error) -> Error {
    Error::backend("sqlite_store_json", e)
}

fn fmt_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| Error::backend(format!("sqlite_store: bad timestamp '{s}'"), e))
}

fn parse_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_dt).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::backend(format!("sqlite_store: bad uuid '{s}'"), e))
}

fn get<'r, T>(row: &'r SqliteRow, col: &str) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(col).map_err(db_err)
}

fn row_to_connection(r: &SqliteRow) -> Result<Connection> {
    let scopes: String = get(r, "scopes")?;
    let refresh: Option<Vec<u8>> = get(r, "refresh_token")?;
    Ok(Connection {
        id: ConnectionId(parse_uuid(&get::<String>(r, "id")?)?),
        user_id: UserId(parse_uuid(&get::<String>(r, "user_id")?)?),
        provider: get(r, "provider")?,
        access_token: SealedSecret(get(r, "access_token")?),
        refresh_token: refresh.map(SealedSecret),
        expires_at: parse_opt_dt(get(r, "expires_at")?)?,
        scopes: serde_json::from_str::<BTreeSet<String>>(&scopes).map_err(json_err)?,
        active: get::<i64>(r, "active")? != 0,
        last_synced_at: parse_opt_dt(get(r, "last_synced_at")?)?,
        created_at: parse_dt(&get::<String>(r, "created_at")?)?,
        updated_at: parse_dt(&get::<String>(r, "updated_at")?)?,
    })
}

fn row_to_memory(r: &SqliteRow) -> Result<StoredMemory> {
    let memory_type: String = get(r, "memory_type")?;
    let metadata: String = get(r, "metadata")?;
    let payload: String = get(r, "payload")?;
    Ok(StoredMemory {
        id: MemoryId(parse_uuid(&get::<String>(r, "id")?)?),
        connection_id: ConnectionId(parse_uuid(&get::<String>(r, "connection_id")?)?),
        user_id: UserId(parse_uuid(&get::<String>(r, "user_id")?)?),
        provider: get(r, "provider")?,
        external_id: get(r, "external_id")?,
        memory_type: MemoryType::parse_str(&memory_type).ok_or_else(|| {
            Error::BackendMessage(format!("sqlite_store: unknown memory_type '{memory_type}'"))
        })?,
        title: get(r, "title")?,
        body: get(r, "body")?,
        occurred_at: parse_dt(&get::<String>(r, "occurred_at")?)?,
        metadata: serde_json::from_str::<MemoryMetadata>(&metadata).map_err(json_err)?,
        payload: serde_json::from_str(&payload).map_err(json_err)?,
        processed: get::<i64>(r, "processed")? != 0,
        created_at: parse_dt(&get::<String>(r, "created_at")?)?,
        updated_at: parse_dt(&get::<String>(r, "updated_at")?)?,
    })
}

fn row_to_run(r: &SqliteRow) -> Result<RunLog> {
    let kind: String = get(r, "kind")?;
    let status: String = get(r, "status")?;
    let input: String = get(r, "input")?;
    let output: Option<String> = get(r, "output")?;
    let error: Option<String> = get(r, "error")?;
    let duration_ms: Option<i64> = get(r, "duration_ms")?;
    Ok(RunLog {
        id: RunId(parse_uuid(&get::<String>(r, "id")?)?),
        user_id: UserId(parse_uuid(&get::<String>(r, "user_id")?)?),
        connection_id: ConnectionId(parse_uuid(&get::<String>(r, "connection_id")?)?),
        provider: get(r, "provider")?,
        kind: RunKind::parse_str(&kind)
            .ok_or_else(|| Error::BackendMessage(format!("sqlite_store: unknown run kind '{kind}'")))?,
        status: RunStatus::parse_str(&status).ok_or_else(|| {
            Error::BackendMessage(format!("sqlite_store: unknown run status '{status}'"))
        })?,
        input: serde_json::from_str(&input).map_err(json_err)?,
        output: output
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(json_err)?,
        error: error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(json_err)?,
        started_at: parse_dt(&get::<String>(r, "started_at")?)?,
        finished_at: parse_opt_dt(get(r, "finished_at")?)?,
        duration_ms: duration_ms.map(|d| d.max(0) as u64),
    })
}

fn row_to_task(r: &SqliteRow) -> Result<QueuedTask> {
    let kind: String = get(r, "kind")?;
    let payload: String = get(r, "payload")?;
    Ok(QueuedTask {
        id: get(r, "id")?,
        kind: TaskKind::parse_str(&kind)
            .ok_or_else(|| Error::BackendMessage(format!("sqlite_store: unknown task kind '{kind}'")))?,
        payload: serde_json::from_str(&payload).map_err(json_err)?,
        run_after: parse_dt(&get::<String>(r, "run_after")?)?,
        submitted_at: parse_dt(&get::<String>(r, "submitted_at")?)?,
    })
}

const MEMORY_COLUMNS: &str = "id, connection_id, user_id, provider, external_id, memory_type, title, body,
     occurred_at, metadata, payload, processed, created_at, updated_at";

const RUN_COLUMNS: &str = "id, user_id, connection_id, provider, kind, status, input, output, error,
     started_at, finished_at, duration_ms";

// ── SyncStore impl ─────────────────────────────────────────────

#[async_trait]
impl SyncStore for SqliteStore {
    async fn upsert_connection(&self, c: &Connection) -> Result<()> {
        let scopes = serde_json::to_string(&c.scopes).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO connections (id, user_id, provider, access_token, refresh_token, expires_at,
             scopes, active, last_synced_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
               access_token = excluded.access_token,
               refresh_token = excluded.refresh_token,
               expires_at = excluded.expires_at,
               scopes = excluded.scopes,
               active = excluded.active,
               last_synced_at = excluded.last_synced_at,
               updated_at = excluded.updated_at",
        )
        .bind(c.id.to_string())
        .bind(c.user_id.to_string())
        .bind(&c.provider)
        .bind(&c.access_token.0)
        .bind(c.refresh_token.as_ref().map(|t| t.0.clone()))
        .bind(c.expires_at.map(fmt_dt))
        .bind(&scopes)
        .bind(c.active as i64)
        .bind(c.last_synced_at.map(fmt_dt))
        .bind(fmt_dt(c.created_at))
        .bind(fmt_dt(c.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_connection(&self, id: ConnectionId) -> Result<Option<Connection>> {
        let row = sqlx::query("SELECT * FROM connections WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_connection).transpose()
    }

    async fn list_connections(&self, user_id: UserId, query: ListQuery) -> Result<Vec<Connection>> {
        let rows = sqlx::query(
            "SELECT * FROM connections WHERE user_id = ?1
             ORDER BY created_at ASC LIMIT ?2 OFFSET ?3",
        )
        .bind(user_id.to_string())
        .bind(query.limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(row_to_connection).collect()
    }

    async fn find_memory(
        &self,
        connection_id: ConnectionId,
        external_id: &str,
    ) -> Result<Option<StoredMemory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE connection_id = ?1 AND external_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(connection_id.to_string())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_memory).transpose()
    }

    async fn insert_memory(&self, m: &StoredMemory) -> Result<bool> {
        let metadata = serde_json::to_string(&m.metadata).map_err(json_err)?;
        let payload = serde_json::to_string(&m.payload).map_err(json_err)?;
        let res = sqlx::query(
            "INSERT INTO memories (id, connection_id, user_id, provider, external_id, memory_type,
             title, body, occurred_at, metadata, payload, processed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(connection_id, external_id) DO NOTHING",
        )
        .bind(m.id.to_string())
        .bind(m.connection_id.to_string())
        .bind(m.user_id.to_string())
        .bind(&m.provider)
        .bind(&m.external_id)
        .bind(m.memory_type.as_str())
        .bind(&m.title)
        .bind(&m.body)
        .bind(fmt_dt(m.occurred_at))
        .bind(&metadata)
        .bind(&payload)
        .bind(m.processed as i64)
        .bind(fmt_dt(m.created_at))
        .bind(fmt_dt(m.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_memory(&self, m: &StoredMemory) -> Result<()> {
        let metadata = serde_json::to_string(&m.metadata).map_err(json_err)?;
        let payload = serde_json::to_string(&m.payload).map_err(json_err)?;
        let res = sqlx::query(
            "UPDATE memories SET
               memory_type = ?3, title = ?4, body = ?5, occurred_at = ?6, metadata = ?7,
               payload = ?8, processed = ?9, updated_at = ?10
             WHERE connection_id = ?1 AND external_id = ?2",
        )
        .bind(m.connection_id.to_string())
        .bind(&m.external_id)
        .bind(m.memory_type.as_str())
        .bind(&m.title)
        .bind(&m.body)
        .bind(fmt_dt(m.occurred_at))
        .bind(&metadata)
        .bind(&payload)
        .bind(m.processed as i64)
        .bind(fmt_dt(m.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "memory '{}' not found for connection {}",
                m.external_id, m.connection_id
            )));
        }
        Ok(())
    }

    async fn list_memories(
        &self,
        connection_id: ConnectionId,
        query: ListQuery,
    ) -> Result<Vec<StoredMemory>> {
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE connection_id = ?1
             ORDER BY occurred_at DESC, external_id ASC LIMIT ?2 OFFSET ?3"
        );
        let rows = sqlx::query(&sql)
            .bind(connection_id.to_string())
            .bind(query.limit as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_memory).collect()
    }

    async fn insert_run_log(&self, run: &RunLog) -> Result<()> {
        let input = serde_json::to_string(&run.input).map_err(json_err)?;
        let output = run
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let error = run
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        sqlx::query(
            "INSERT INTO run_logs (id, user_id, connection_id, provider, kind, status, input,
             output, error, started_at, finished_at, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(run.id.to_string())
        .bind(run.user_id.to_string())
        .bind(run.connection_id.to_string())
        .bind(&run.provider)
        .bind(run.kind.as_str())
        .bind(run.status.as_str())
        .bind(&input)
        .bind(&output)
        .bind(&error)
        .bind(fmt_dt(run.started_at))
        .bind(run.finished_at.map(fmt_dt))
        .bind(run.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_run_log(&self, run: &RunLog) -> Result<()> {
        let existing = self
            .get_run_log(run.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {} not found", run.id)))?;
        if !existing.status.can_transition_to(run.status) {
            return Err(Error::InvalidInput(format!(
                "run {} cannot move from {} to {}",
                run.id,
                existing.status.as_str(),
                run.status.as_str()
            )));
        }

        let output = run
            .output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let error = run
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        // Guard on the previous status so a concurrent writer cannot move it backwards.
        let res = sqlx::query(
            "UPDATE run_logs SET status = ?2, output = ?3, error = ?4, finished_at = ?5,
               duration_ms = ?6
             WHERE id = ?1 AND status = ?7",
        )
        .bind(run.id.to_string())
        .bind(run.status.as_str())
        .bind(&output)
        .bind(&error)
        .bind(run.finished_at.map(fmt_dt))
        .bind(run.duration_ms.map(|d| d as i64))
        .bind(existing.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(Error::Conflict(format!(
                "run {} changed status concurrently",
                run.id
            )));
        }
        Ok(())
    }

    async fn get_run_log(&self, id: RunId) -> Result<Option<RunLog>> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM run_logs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_run).transpose()
    }

    async fn list_run_logs(&self, query: RunLogQuery) -> Result<Vec<RunLog>> {
        let mut conditions = vec!["1 = 1".to_string()];
        let mut next_param = 1;

        if query.connection_id.is_some() {
            conditions.push(format!("connection_id = ?{next_param}"));
            next_param += 1;
        }
        if query.user_id.is_some() {
            conditions.push(format!("user_id = ?{next_param}"));
            next_param += 1;
        }
        if query.status.is_some() {
            conditions.push(format!("status = ?{next_param}"));
            next_param += 1;
        }

        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM run_logs WHERE {}
             ORDER BY started_at DESC
             LIMIT ?{next_param} OFFSET ?{}",
            conditions.join(" AND "),
            next_param + 1,
        );

        let mut q = sqlx::query(&sql);
        if let Some(cid) = query.connection_id {
            q = q.bind(cid.to_string());
        }
        if let Some(uid) = query.user_id {
            q = q.bind(uid.to_string());
        }
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        let rows = q
            .bind(query.limit as i64)
            .bind(query.offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_run).collect()
    }
}

#[async_trait]
impl TaskQueue for SqliteStore {
    async fn submit(&self, task: TaskSubmission) -> Result<String> {
        let now = Utc::now();
        let delay = task
            .delay
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| Error::InvalidInput(format!("task delay out of range: {e}")))?
            .unwrap_or_else(chrono::Duration::zero);
        let id = Uuid::new_v4().to_string();
        let payload = serde_json::to_string(&task.payload).map_err(json_err)?;
        sqlx::query(
            "INSERT INTO scheduled_tasks (id, kind, payload, run_after, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&id)
        .bind(task.kind.as_str())
        .bind(&payload)
        .bind(fmt_dt(now + delay))
        .bind(fmt_dt(now))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memories::models::NormalizedRecord;
    use std::time::Duration;

    fn memory(connection_id: ConnectionId, user_id: UserId, ext: &str, title: &str) -> StoredMemory {
        let record = NormalizedRecord::new(
            ext,
            MemoryType::Message,
            title,
            "body",
            Utc::now(),
            MemoryMetadata::default(),
            serde_json::json!({"id": ext, "labels": ["INBOX"]}),
        )
        .unwrap();
        StoredMemory::from_record(connection_id, user_id, "gmail", record, Utc::now())
    }

    #[tokio::test]
    async fn natural_key_insert_is_conditional() {
        let store = SqliteStore::in_memory().await.unwrap();
        let (cid, uid) = (ConnectionId::new(), UserId::new());

        assert!(store.insert_memory(&memory(cid, uid, "m1", "first")).await.unwrap());
        assert!(!store.insert_memory(&memory(cid, uid, "m1", "dupe")).await.unwrap());
        // Same external id under another connection is a different record.
        assert!(store
            .insert_memory(&memory(ConnectionId::new(), uid, "m1", "other"))
            .await
            .unwrap());

        let found = store.find_memory(cid, "m1").await.unwrap().unwrap();
        assert_eq!(found.title, "first");
        assert_eq!(found.payload["labels"][0], "INBOX");

        let mut changed = found.clone();
        changed.title = "renamed".into();
        store.update_memory(&changed).await.unwrap();
        let listed = store.list_memories(cid, ListQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "renamed");
        assert_eq!(listed[0].id, found.id);
    }

    #[tokio::test]
    async fn connection_round_trips_sealed_credentials() {
        let store = SqliteStore::in_memory().await.unwrap();
        let conn = Connection::new(
            UserId::new(),
            "spotify",
            SealedSecret(vec![9, 8, 7]),
            Some(SealedSecret(vec![1, 2])),
            Some(Utc::now()),
            ["user-read-recently-played".to_string()].into_iter().collect(),
            None,
        )
        .unwrap();
        store.upsert_connection(&conn).await.unwrap();
        let loaded = store.get_connection(conn.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, conn.access_token);
        assert_eq!(loaded.refresh_token, conn.refresh_token);
        assert_eq!(loaded.scopes, conn.scopes);
        assert_eq!(
            store
                .list_connections(conn.user_id, ListQuery::default())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn run_log_updates_are_monotonic() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut run = RunLog::new_pending(
            UserId::new(),
            ConnectionId::new(),
            "gmail",
            RunKind::IncrementalSync,
            serde_json::json!({"max_items": 10}),
            Utc::now(),
        );
        store.insert_run_log(&run).await.unwrap();
        run.mark_running().unwrap();
        store.update_run_log(&run).await.unwrap();
        run.complete(Default::default(), Utc::now()).unwrap();
        store.update_run_log(&run).await.unwrap();

        let mut stale = run.clone();
        stale.status = RunStatus::Running;
        assert!(store.update_run_log(&stale).await.is_err());

        let loaded = store.get_run_log(run.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        let listed = store
            .list_run_logs(RunLogQuery {
                connection_id: Some(run.connection_id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn delayed_tasks_become_due() {
        let store = SqliteStore::in_memory().await.unwrap();
        let id = store
            .submit(TaskSubmission {
                kind: TaskKind::EnrichContent,
                payload: serde_json::json!({"changed": 3}),
                delay: Some(Duration::from_secs(300)),
            })
            .await
            .unwrap();
        assert!(store.due_tasks(Utc::now(), 10).await.unwrap().is_empty());
        let later = Utc::now() + chrono::Duration::minutes(6);
        let due = store.due_tasks(later, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        store.complete_task(&id).await.unwrap();
        assert!(store.due_tasks(later, 10).await.unwrap().is_empty());
    }
}
