use crate::models::{ConnectionId, MemoryId, UserId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Kind of activity a memory represents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Message,
    Photo,
    Video,
    Track,
    Playlist,
    Event,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Message => "message",
            MemoryType::Photo => "photo",
            MemoryType::Video => "video",
            MemoryType::Track => "track",
            MemoryType::Playlist => "playlist",
            MemoryType::Event => "event",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "message" => Some(MemoryType::Message),
            "photo" => Some(MemoryType::Photo),
            "video" => Some(MemoryType::Video),
            "track" => Some(MemoryType::Track),
            "playlist" => Some(MemoryType::Playlist),
            "event" => Some(MemoryType::Event),
            _ => None,
        }
    }
}

/// Derived metadata. Sets, so ordering and duplicates never count as a change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub people: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
}

impl MemoryMetadata {
    /// Trimmed, non-empty entries only.
    pub fn normalized(&self) -> Self {
        fn clean(set: &BTreeSet<String>) -> BTreeSet<String> {
            set.iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }
        Self {
            tags: clean(&self.tags),
            people: clean(&self.people),
            categories: clean(&self.categories),
        }
    }
}

/// Provider-agnostic unit of ingested activity, as produced by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Provider-scoped identifier, unique within a connection.
    pub external_id: String,
    pub memory_type: MemoryType,
    pub title: String,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: MemoryMetadata,
    /// Raw provider payload retained for traceability.
    pub payload: serde_json::Value,
}

impl NormalizedRecord {
    #[tracing::instrument(level = "debug", skip(title, body, metadata, payload))]
    pub fn new(
        external_id: impl Into<String> + std::fmt::Debug,
        memory_type: MemoryType,
        title: impl Into<String>,
        body: impl Into<String>,
        occurred_at: DateTime<Utc>,
        metadata: MemoryMetadata,
        payload: serde_json::Value,
    ) -> Result<Self> {
        let external_id = external_id.into();
        if external_id.trim().is_empty() {
            return Err(Error::Transform("external_id is empty".to_string()));
        }
        Ok(Self {
            external_id,
            memory_type,
            title: title.into(),
            body: body.into(),
            occurred_at,
            metadata,
            payload,
        })
    }
}

/// A memory as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub id: MemoryId,
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub provider: String,
    pub external_id: String,
    pub memory_type: MemoryType,
    pub title: String,
    pub body: String,
    pub occurred_at: DateTime<Utc>,
    pub metadata: MemoryMetadata,
    pub payload: serde_json::Value,
    /// Cleared whenever content changes so enrichment revisits the record.
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMemory {
    pub fn from_record(
        connection_id: ConnectionId,
        user_id: UserId,
        provider: &str,
        record: NormalizedRecord,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MemoryId::new(),
            connection_id,
            user_id,
            provider: provider.to_string(),
            external_id: record.external_id,
            memory_type: record.memory_type,
            title: record.title,
            body: record.body,
            occurred_at: record.occurred_at,
            metadata: record.metadata,
            payload: record.payload,
            processed: false,
            created_at: now,
            updated_at: now,
        }
    }
}
