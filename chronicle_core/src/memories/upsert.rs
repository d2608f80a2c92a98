use crate::memories::models::{NormalizedRecord, StoredMemory};
use crate::models::{ConnectionId, UserId};
use crate::store::SyncStore;
use crate::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Outcome counts of one reconcile pass.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileCounts {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Create / update / skip per normalized record, keyed by `(connection id, external id)`.
///
/// Never deletes. Running the same batch twice yields `skipped == batch.len()`
/// on the second pass.
#[derive(Clone)]
pub struct MemoryUpsertEngine {
    store: Arc<dyn SyncStore>,
}

enum Outcome {
    Created,
    Updated,
    Skipped,
}

impl MemoryUpsertEngine {
    pub fn new(store: Arc<dyn SyncStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(level = "info", skip(self, records), fields(records = records.len()))]
    pub async fn reconcile(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        provider: &str,
        records: Vec<NormalizedRecord>,
    ) -> Result<ReconcileCounts> {
        let mut counts = ReconcileCounts::default();
        for record in records {
            match self
                .reconcile_one(connection_id, user_id, provider, record)
                .await?
            {
                Outcome::Created => counts.created += 1,
                Outcome::Updated => counts.updated += 1,
                Outcome::Skipped => counts.skipped += 1,
            }
        }
        tracing::info!(
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            "reconcile complete"
        );
        Ok(counts)
    }

    async fn reconcile_one(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        provider: &str,
        record: NormalizedRecord,
    ) -> Result<Outcome> {
        let existing = self
            .store
            .find_memory(connection_id, &record.external_id)
            .await?;
        let existing = match existing {
            Some(existing) => existing,
            None => {
                let memory =
                    StoredMemory::from_record(connection_id, user_id, provider, record.clone(), Utc::now());
                if self.store.insert_memory(&memory).await? {
                    return Ok(Outcome::Created);
                }
                // Lost the insert race; the winner's row is now the baseline.
                self.store
                    .find_memory(connection_id, &record.external_id)
                    .await?
                    .ok_or_else(|| {
                        Error::BackendMessage(format!(
                            "memory '{}' vanished after conflicting insert",
                            record.external_id
                        ))
                    })?
            }
        };

        if is_unchanged(&existing, &record) {
            return Ok(Outcome::Skipped);
        }

        let updated = StoredMemory {
            memory_type: record.memory_type,
            title: record.title,
            body: record.body,
            occurred_at: record.occurred_at,
            metadata: record.metadata,
            payload: record.payload,
            processed: false,
            updated_at: Utc::now(),
            ..existing
        };
        self.store.update_memory(&updated).await?;
        Ok(Outcome::Updated)
    }
}

fn is_unchanged(existing: &StoredMemory, record: &NormalizedRecord) -> bool {
    existing.title == record.title
        && existing.body == record.body
        && existing.metadata.normalized() == record.metadata.normalized()
        && canonical(&existing.payload) == canonical(&record.payload)
}

/// Canonical form of a payload for comparison.
///
/// Strings holding an encoded JSON object or array are decoded; objects compare
/// key-order independent through `serde_json::Map` equality.
pub fn canonical(value: &Value) -> Value {
    match value {
        Value::String(s) => match decode_embedded(s) {
            Some(decoded) => canonical(&decoded),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

fn decode_embedded(s: &str) -> Option<Value> {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    match serde_json::from_str::<Value>(s) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}
