//! Sync orchestration: run lifecycle, per-connection locking, and follow-up cascade.

pub mod cascade;
pub mod engine;
pub mod lock;
pub mod models;

pub use cascade::{CascadeOutcome, CascadePayload, CascadePolicy};
pub use engine::SyncOrchestrator;
pub use lock::{RunGuard, RunLocks};
pub use models::{RunSummary, SyncTaskPayload};
