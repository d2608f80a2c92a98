use crate::config::{ProviderConfig, ResolvedSyncOptions};
use crate::fetch::PaginatedFetcher;
use crate::memories::models::NormalizedRecord;
use crate::models::{ConnectionId, UserId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything a connector may touch while fetching for one run.
pub struct FetchContext<'a> {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub fetcher: &'a PaginatedFetcher,
    /// Run start time. Connectors use this instead of reading the clock.
    pub now: DateTime<Utc>,
}

/// Raw provider data of one run: named item lists plus lookup tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBundle {
    pub datasets: BTreeMap<String, Vec<Value>>,
    pub lookups: BTreeMap<String, Value>,
}

impl RawBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, items: Vec<Value>) -> Self {
        self.datasets.insert(name.into(), items);
        self
    }

    pub fn with_lookup(mut self, name: impl Into<String>, value: Value) -> Self {
        self.lookups.insert(name.into(), value);
        self
    }

    /// Items of `name`, empty if the dataset was never fetched.
    pub fn dataset(&self, name: &str) -> &[Value] {
        self.datasets.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.lookups.get(name)
    }

    pub fn item_count(&self) -> usize {
        self.datasets.values().map(Vec::len).sum()
    }
}

/// A raw item that could not be normalized. The run continues without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFailure {
    pub external_id: Option<String>,
    pub message: String,
}

/// Output of `transform_to_memories`, in fetch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub records: Vec<NormalizedRecord>,
    pub failures: Vec<TransformFailure>,
}

impl Transformed {
    /// Keep a record or remember why it was dropped.
    pub fn push(&mut self, external_id: Option<&str>, result: Result<NormalizedRecord>) {
        match result {
            Ok(record) => self.records.push(record),
            Err(e) => {
                tracing::warn!(external_id, error = %e, "dropping untransformable item");
                self.failures.push(TransformFailure {
                    external_id: external_id.map(str::to_string),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// A provider integration: pulls raw data, then normalizes it into memories.
///
/// Implementations live in `chronicle_integrations` or customer code.
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    /// Stable provider id, the registry key (e.g. "gmail").
    fn id(&self) -> &'static str;

    /// Endpoints, pacing, and default fetch windows supplied at construction.
    fn config(&self) -> &ProviderConfig;

    async fn fetch_data(
        &self,
        ctx: &FetchContext<'_>,
        options: &ResolvedSyncOptions,
    ) -> Result<RawBundle>;

    /// Pure: the same bundle always yields the same output.
    fn transform_to_memories(&self, bundle: &RawBundle) -> Transformed;
}
