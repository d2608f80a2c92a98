use super::cascade::CascadeOutcome;
use crate::config::SyncOptions;
use crate::error::Error;
use crate::models::{ConnectionId, RunId, UserId};
use crate::runs::{RunCounts, RunFailure, RunKind, RunLog, RunStage, RunStatus};
use serde::{Deserialize, Serialize};

/// What a caller gets back from one orchestrated sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// `None` only when the run was rejected before a run log was written.
    pub run_id: Option<RunId>,
    pub connection_id: ConnectionId,
    pub user_id: Option<UserId>,
    pub provider: Option<String>,
    pub kind: Option<RunKind>,
    pub status: RunStatus,
    pub counts: RunCounts,
    pub elapsed_ms: u64,
    pub cascade: CascadeOutcome,
    pub failure: Option<RunFailure>,
}

impl RunSummary {
    pub(crate) fn from_run(run: &RunLog, cascade: CascadeOutcome) -> Self {
        Self {
            run_id: Some(run.id),
            connection_id: run.connection_id,
            user_id: Some(run.user_id),
            provider: Some(run.provider.clone()),
            kind: Some(run.kind),
            status: run.status,
            counts: run.output.unwrap_or_default(),
            elapsed_ms: run.duration_ms.unwrap_or(0),
            cascade,
            failure: run.error.clone(),
        }
    }

    /// Summary for a sync that never got a run log.
    pub(crate) fn rejected(connection_id: ConnectionId, err: &Error) -> Self {
        Self {
            run_id: None,
            connection_id,
            user_id: None,
            provider: None,
            kind: None,
            status: RunStatus::Failed,
            counts: RunCounts::default(),
            elapsed_ms: 0,
            cascade: CascadeOutcome::default(),
            failure: Some(RunFailure::from_error(RunStage::Start, err)),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Payload of a queued `sync` task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTaskPayload {
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub options: SyncOptions,
}
