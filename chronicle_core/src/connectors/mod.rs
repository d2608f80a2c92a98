pub mod registry;
pub mod traits;

pub use registry::ConnectorRegistry;
pub use traits::{FetchContext, ProviderConnector, RawBundle, TransformFailure, Transformed};
