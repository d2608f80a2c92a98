//! Follow-up work scheduled after a run that changed memories.

use crate::models::{ConnectionId, RunId, UserId};
use crate::tasks::{TaskKind, TaskQueue, TaskSubmission};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENRICHMENT_MIN_CHANGES: u64 = 1;
const ENRICHMENT_DELAY: Duration = Duration::from_secs(5 * 60);
const REORGANIZE_THRESHOLD: u64 = 50;
const REORGANIZE_DELAY: Duration = Duration::from_secs(30 * 60);

/// Thresholds on `created + updated` and the delay of each follow-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadePolicy {
    pub enrichment_min_changes: u64,
    pub enrichment_delay: Duration,
    pub reorganize_threshold: u64,
    pub reorganize_delay: Duration,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            enrichment_min_changes: ENRICHMENT_MIN_CHANGES,
            enrichment_delay: ENRICHMENT_DELAY,
            reorganize_threshold: REORGANIZE_THRESHOLD,
            reorganize_delay: REORGANIZE_DELAY,
        }
    }
}

impl CascadePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.enrichment_min_changes == 0 {
            return Err(Error::InvalidInput(
                "enrichment_min_changes must be > 0".to_string(),
            ));
        }
        if self.reorganize_threshold == 0 {
            return Err(Error::InvalidInput(
                "reorganize_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Follow-ups due for a run that changed `changed` memories.
    pub fn plan(&self, changed: u64) -> Vec<(TaskKind, Duration)> {
        let mut out = Vec::new();
        if changed >= self.enrichment_min_changes {
            out.push((TaskKind::EnrichContent, self.enrichment_delay));
        }
        if changed >= self.reorganize_threshold {
            out.push((TaskKind::ReorganizeStructure, self.reorganize_delay));
        }
        out
    }
}

/// Payload handed to downstream enrichment/reorganization jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadePayload {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub provider: String,
    pub run_id: RunId,
    pub changed: u64,
}

/// Ids of the follow-up tasks that were accepted by the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    pub enrichment_task_id: Option<String>,
    pub reorganize_task_id: Option<String>,
}

/// Submit the follow-ups `policy` calls for. Never fails the run; rejected
/// submissions are logged and left out of the outcome.
#[tracing::instrument(
    level = "info",
    skip(queue, policy, payload),
    fields(run_id = %payload.run_id, changed = payload.changed)
)]
pub async fn schedule(
    queue: &dyn TaskQueue,
    policy: &CascadePolicy,
    payload: &CascadePayload,
) -> CascadeOutcome {
    let mut outcome = CascadeOutcome::default();
    let body = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "could not encode cascade payload; skipping follow-ups");
            return outcome;
        }
    };

    for (kind, delay) in policy.plan(payload.changed) {
        let submitted = queue
            .submit(TaskSubmission {
                kind,
                payload: body.clone(),
                delay: Some(delay),
            })
            .await;
        match submitted {
            Ok(task_id) => {
                tracing::info!(kind = kind.as_str(), %task_id, delay_secs = delay.as_secs(), "scheduled follow-up");
                match kind {
                    TaskKind::EnrichContent => outcome.enrichment_task_id = Some(task_id),
                    TaskKind::ReorganizeStructure => outcome.reorganize_task_id = Some(task_id),
                    TaskKind::Sync => {}
                }
            }
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "follow-up submission failed");
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::memory::MemoryTaskQueue;

    fn payload(changed: u64) -> CascadePayload {
        CascadePayload {
            user_id: UserId::new(),
            connection_id: ConnectionId::new(),
            provider: "gmail".into(),
            run_id: RunId::new(),
            changed,
        }
    }

    #[test]
    fn plan_follows_thresholds() {
        let policy = CascadePolicy::default();
        assert!(policy.plan(0).is_empty());
        assert_eq!(
            policy.plan(3),
            vec![(TaskKind::EnrichContent, Duration::from_secs(300))]
        );
        assert_eq!(policy.plan(50).len(), 2);
    }

    #[tokio::test]
    async fn crossing_both_thresholds_schedules_each_once() {
        let queue = MemoryTaskQueue::new();
        let policy = CascadePolicy {
            reorganize_threshold: 10,
            ..Default::default()
        };
        let p = payload(25);
        let outcome = schedule(&queue, &policy, &p).await;

        let enrich = queue.tasks_of_kind(TaskKind::EnrichContent).await;
        let reorganize = queue.tasks_of_kind(TaskKind::ReorganizeStructure).await;
        assert_eq!(enrich.len(), 1);
        assert_eq!(reorganize.len(), 1);
        assert_eq!(outcome.enrichment_task_id.as_deref(), Some(enrich[0].id.as_str()));
        assert_eq!(reorganize[0].payload["changed"], 25);
        assert_eq!(
            reorganize[0].run_after - reorganize[0].submitted_at,
            chrono::Duration::minutes(30)
        );
    }

    #[tokio::test]
    async fn queue_failures_are_swallowed() {
        let queue = MemoryTaskQueue::failing();
        let outcome = schedule(&queue, &CascadePolicy::default(), &payload(100)).await;
        assert_eq!(outcome, CascadeOutcome::default());
    }
}
