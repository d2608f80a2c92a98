use crate::models::{ConnectionId, UserId};
use crate::secrets::SealedSecret;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A stored OAuth authorization linking one user to one provider.
///
/// Credentials are sealed; only `TokenLifecycleManager` opens them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub user_id: UserId,
    /// Provider identifier, e.g. "gmail", "google_photos", "spotify".
    pub provider: String,
    pub access_token: SealedSecret,
    pub refresh_token: Option<SealedSecret>,
    /// `None` means the provider did not report an expiry.
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: BTreeSet<String>,
    pub active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    #[tracing::instrument(level = "debug", skip(access_token, refresh_token, scopes))]
    pub fn new(
        user_id: UserId,
        provider: impl Into<String> + fmt::Debug,
        access_token: SealedSecret,
        refresh_token: Option<SealedSecret>,
        expires_at: Option<DateTime<Utc>>,
        scopes: BTreeSet<String>,
        now: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let provider = provider.into();
        if provider.trim().is_empty() {
            return Err(Error::InvalidInput("provider is empty".to_string()));
        }
        if access_token.0.is_empty() {
            return Err(Error::InvalidInput("access token is empty".to_string()));
        }
        let now = now.unwrap_or_else(Utc::now);
        Ok(Self {
            id: ConnectionId::new(),
            user_id,
            provider,
            access_token,
            refresh_token,
            expires_at,
            scopes,
            active: true,
            last_synced_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// True if the access credential is expired at `now`, counting `skew` as already expired.
    pub fn is_expired(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        match self.expires_at {
            Some(exp) => exp <= now + skew,
            None => false,
        }
    }

    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// A plaintext bearer credential that is valid for this run.
#[derive(Clone, PartialEq, Eq)]
pub struct UsableCredential {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// True if this credential was minted by a refresh during the current call.
    pub refreshed: bool,
}

impl fmt::Debug for UsableCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsableCredential")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}
