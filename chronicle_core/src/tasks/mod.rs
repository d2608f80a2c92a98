//! Task-execution facility seam.
//!
//! The host job system guarantees eventual at-least-once execution; callers in
//! this crate treat submission as fire-and-forget.

pub mod memory;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run one sync for a connection (payload: connection id + options).
    Sync,
    /// Content-enrichment pass over newly created/updated memories.
    EnrichContent,
    /// Structural reorganization after a large batch of changes.
    ReorganizeStructure,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Sync => "sync",
            TaskKind::EnrichContent => "enrich_content",
            TaskKind::ReorganizeStructure => "reorganize_structure",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(TaskKind::Sync),
            "enrich_content" => Some(TaskKind::EnrichContent),
            "reorganize_structure" => Some(TaskKind::ReorganizeStructure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub delay: Option<Duration>,
}

/// A submitted task as recorded by a queue implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub run_after: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Submit a task for eventual execution; returns the queue-assigned id.
    async fn submit(&self, task: TaskSubmission) -> Result<String>;
}
