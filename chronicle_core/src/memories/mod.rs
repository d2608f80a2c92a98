pub mod models;
pub mod upsert;

pub use models::{MemoryMetadata, MemoryType, NormalizedRecord, StoredMemory};
pub use upsert::{MemoryUpsertEngine, ReconcileCounts};
