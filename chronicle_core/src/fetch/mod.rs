//! Provider HTTP access: authorized paced client and the paginated fetch loop.

pub mod client;
pub mod paginated;

pub use client::{Pacer, ProviderClient};
pub use paginated::{Continuation, FetchLimits, PageEndpoint, PaginatedFetcher, RawPage};
