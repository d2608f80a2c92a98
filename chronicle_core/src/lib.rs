//! Chronicle core library: connection lifecycle, provider fetch, normalization,
//! idempotent upsert, and sync orchestration.

pub mod config;
pub mod connections;
pub mod connectors;
pub mod error;
pub mod fetch;
pub mod memories;
pub mod models;
pub mod o11y;
pub mod runs;
pub mod secrets;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod token;

pub use config::{FetchOptions, ProviderConfig, ResolvedSyncOptions, SyncConfig, SyncOptions};
pub use connections::{Connection, UsableCredential};
pub use connectors::{
    ConnectorRegistry, FetchContext, ProviderConnector, RawBundle, TransformFailure, Transformed,
};
pub use error::{Error, ErrorKind, Result};
pub use fetch::{Continuation, FetchLimits, PageEndpoint, PaginatedFetcher, ProviderClient, RawPage};
pub use memories::{
    MemoryMetadata, MemoryType, MemoryUpsertEngine, NormalizedRecord, ReconcileCounts, StoredMemory,
};
pub use models::{ConnectionId, ListQuery, MemoryId, RunId, UserId};
pub use runs::{RunCounts, RunFailure, RunKind, RunLog, RunLogQuery, RunStage, RunStatus};
pub use secrets::{AesGcmSecretsCodec, SealedSecret, SecretsCodec};
pub use store::{MemoryStore, SqliteStore, SyncStore};
pub use sync::{CascadeOutcome, CascadePolicy, RunSummary, SyncOrchestrator};
pub use tasks::memory::MemoryTaskQueue;
pub use tasks::{QueuedTask, TaskKind, TaskQueue, TaskSubmission};
pub use token::{
    BearerAuth, CredentialSession, OAuthTokenRefresher, TokenLifecycleManager, TokenRefresher,
};
