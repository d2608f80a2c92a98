use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{QueuedTask, TaskKind, TaskQueue, TaskSubmission};
use crate::{Error, Result};

/// In-memory TaskQueue for local development and unit tests.
///
/// Tasks are recorded, never executed.
#[derive(Clone, Default)]
pub struct MemoryTaskQueue {
    tasks: Arc<Mutex<Vec<QueuedTask>>>,
    fail_submissions: bool,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue whose every submission fails (for testing non-fatal scheduling).
    pub fn failing() -> Self {
        Self {
            fail_submissions: true,
            ..Self::default()
        }
    }

    /// Return a snapshot of all submitted tasks.
    pub async fn all_tasks(&self) -> Vec<QueuedTask> {
        self.tasks.lock().await.clone()
    }

    pub async fn tasks_of_kind(&self, kind: TaskKind) -> Vec<QueuedTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn submit(&self, task: TaskSubmission) -> Result<String> {
        if self.fail_submissions {
            return Err(Error::BackendMessage("task queue unavailable".to_string()));
        }
        let now = Utc::now();
        let delay = task
            .delay
            .map(chrono::Duration::from_std)
            .transpose()
            .map_err(|e| Error::InvalidInput(format!("task delay out of range: {e}")))?
            .unwrap_or_else(chrono::Duration::zero);
        let id = Uuid::new_v4().to_string();
        self.tasks.lock().await.push(QueuedTask {
            id: id.clone(),
            kind: task.kind,
            payload: task.payload,
            run_after: now + delay,
            submitted_at: now,
        });
        Ok(id)
    }
}
