//! OAuth credential lifecycle: up-front validation, refresh, and the reactive
//! 401 hook used by provider clients.

pub mod manager;
pub mod refresher;

pub use manager::{CredentialSession, TokenLifecycleManager};
pub use refresher::{OAuthClient, OAuthTokenRefresher, RefreshedToken, TokenRefresher};

use crate::{Error, Result};
use async_trait::async_trait;

/// Source of bearer tokens for provider calls.
#[async_trait]
pub trait BearerAuth: Send + Sync {
    async fn bearer(&self) -> Result<String>;

    /// Called after `rejected` drew a 401. Returns the token to retry with.
    async fn on_unauthorized(&self, rejected: &str) -> Result<String>;
}

/// A fixed token with no refresh path. A 401 is immediately terminal.
#[derive(Clone)]
pub struct StaticBearer(pub String);

impl std::fmt::Debug for StaticBearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticBearer(<redacted>)")
    }
}

#[async_trait]
impl BearerAuth for StaticBearer {
    async fn bearer(&self) -> Result<String> {
        Ok(self.0.clone())
    }

    async fn on_unauthorized(&self, _rejected: &str) -> Result<String> {
        Err(Error::TokenInvalid(
            "provider rejected a token that cannot be refreshed".to_string(),
        ))
    }
}
