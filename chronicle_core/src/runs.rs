//! Run log: the durable audit record of one orchestrated sync.

use crate::error::ErrorKind;
use crate::models::{ConnectionId, RunId, UserId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Transitions only move forward: pending -> running -> completed | failed.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    FirstSync,
    IncrementalSync,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::FirstSync => "first_sync",
            RunKind::IncrementalSync => "incremental_sync",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "first_sync" => Some(RunKind::FirstSync),
            "incremental_sync" => Some(RunKind::IncrementalSync),
            _ => None,
        }
    }
}

/// Pipeline stage a failure originated from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Rejected before execution began: unknown connection, run in progress,
    /// or the run log could not be moved to running.
    Start,
    Token,
    Connector,
    Fetch,
    Transform,
    Reconcile,
    Finalize,
}

/// Record counts reported by a completed run.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub records_fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub transform_failures: u64,
}

impl RunCounts {
    pub fn changed(&self) -> u64 {
        self.created + self.updated
    }
}

/// Structured failure detail: machine kind, message, origin, and cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: RunStage,
    pub causes: Vec<String>,
}

impl RunFailure {
    pub fn from_error(stage: RunStage, err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage,
            causes: err.cause_chain(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub id: RunId,
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub provider: String,
    pub kind: RunKind,
    pub status: RunStatus,
    /// The caller's requested `SyncOptions`, before provider defaults were applied.
    pub input: serde_json::Value,
    pub output: Option<RunCounts>,
    pub error: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl RunLog {
    #[tracing::instrument(level = "debug", skip(input))]
    pub fn new_pending(
        user_id: UserId,
        connection_id: ConnectionId,
        provider: impl Into<String> + std::fmt::Debug,
        kind: RunKind,
        input: serde_json::Value,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RunId::new(),
            user_id,
            connection_id,
            provider: provider.into(),
            kind,
            status: RunStatus::Pending,
            input,
            output: None,
            error: None,
            started_at,
            finished_at: None,
            duration_ms: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "run {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<()> {
        self.transition(RunStatus::Running)
    }

    pub fn complete(&mut self, counts: RunCounts, at: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Completed)?;
        self.output = Some(counts);
        self.finish(at);
        Ok(())
    }

    pub fn fail(&mut self, failure: RunFailure, at: DateTime<Utc>) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.error = Some(failure);
        self.finish(at);
        Ok(())
    }

    fn finish(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
        self.duration_ms = Some((at - self.started_at).num_milliseconds().max(0) as u64);
    }
}

/// Run log query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogQuery {
    pub connection_id: Option<ConnectionId>,
    pub user_id: Option<UserId>,
    pub status: Option<RunStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for RunLogQuery {
    fn default() -> Self {
        Self {
            connection_id: None,
            user_id: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending() -> RunLog {
        RunLog::new_pending(
            UserId::new(),
            ConnectionId::new(),
            "gmail",
            RunKind::FirstSync,
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn completes_through_running() {
        let mut run = pending();
        run.mark_running().unwrap();
        let at = run.started_at + Duration::milliseconds(1500);
        run.complete(
            RunCounts {
                created: 3,
                ..Default::default()
            },
            at,
        )
        .unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.duration_ms, Some(1500));
        assert_eq!(run.output.unwrap().changed(), 3);
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut run = pending();
        // Cannot skip running.
        assert!(run.complete(RunCounts::default(), Utc::now()).is_err());
        run.mark_running().unwrap();
        assert!(run.mark_running().is_err());
        let failure = RunFailure::from_error(
            RunStage::Token,
            &Error::TokenInvalid("no refresh token".into()),
        );
        run.fail(failure, Utc::now()).unwrap();
        assert!(run.mark_running().is_err());
        assert!(run.complete(RunCounts::default(), Utc::now()).is_err());
        assert_eq!(run.error.as_ref().unwrap().kind, ErrorKind::TokenInvalid);
    }

    #[test]
    fn pending_run_can_fail_without_running() {
        let mut run = pending();
        let failure = RunFailure::from_error(
            RunStage::Start,
            &Error::BackendMessage("run log write failed".into()),
        );
        run.fail(failure, Utc::now()).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());
        assert!(run.mark_running().is_err());
    }
}
