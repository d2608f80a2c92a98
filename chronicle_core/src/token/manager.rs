use super::refresher::TokenRefresher;
use super::BearerAuth;
use crate::connections::{Connection, UsableCredential};
use crate::models::ConnectionId;
use crate::secrets::SecretsCodec;
use crate::store::SyncStore;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Validates and renews OAuth credentials for connections.
///
/// The only component that opens or seals credentials, and the only writer of
/// credential fields and `last_synced_at`.
#[derive(Clone)]
pub struct TokenLifecycleManager {
    store: Arc<dyn SyncStore>,
    codec: Arc<dyn SecretsCodec>,
    refresher: Arc<dyn TokenRefresher>,
    expiry_skew: chrono::Duration,
}

impl TokenLifecycleManager {
    pub fn new(
        store: Arc<dyn SyncStore>,
        codec: Arc<dyn SecretsCodec>,
        refresher: Arc<dyn TokenRefresher>,
        expiry_skew: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            refresher,
            expiry_skew: chrono::Duration::from_std(expiry_skew)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Seal plaintext credentials for a new connection.
    pub fn seal(&self, plaintext: &str) -> Result<crate::secrets::SealedSecret> {
        self.codec.seal(plaintext)
    }

    /// Returns a credential usable right now, refreshing first if it is (about to be) expired.
    ///
    /// The returned `Connection` reflects any persisted refresh.
    #[tracing::instrument(
        level = "info",
        skip(self, connection),
        fields(connection_id = %connection.id, provider = %connection.provider)
    )]
    pub async fn ensure_usable(
        &self,
        connection: &Connection,
    ) -> Result<(Connection, UsableCredential)> {
        ensure_active(connection)?;
        let now = Utc::now();
        if !connection.is_expired(now, self.expiry_skew) {
            let access_token = self.codec.open(&connection.access_token)?;
            return Ok((
                connection.clone(),
                UsableCredential {
                    access_token,
                    expires_at: connection.expires_at,
                    refreshed: false,
                },
            ));
        }
        if connection.refresh_token.is_none() {
            return Err(Error::TokenInvalid(format!(
                "access token for connection {} expired and no refresh token is stored",
                connection.id
            )));
        }
        self.refresh(connection, now).await
    }

    /// Refresh regardless of the recorded expiry (the provider already said no).
    #[tracing::instrument(
        level = "info",
        skip(self, connection),
        fields(connection_id = %connection.id, provider = %connection.provider)
    )]
    pub async fn force_refresh(
        &self,
        connection: &Connection,
    ) -> Result<(Connection, UsableCredential)> {
        ensure_active(connection)?;
        if connection.refresh_token.is_none() {
            return Err(Error::TokenInvalid(format!(
                "provider rejected the access token for connection {} and no refresh token is stored",
                connection.id
            )));
        }
        self.refresh(connection, Utc::now()).await
    }

    async fn refresh(
        &self,
        connection: &Connection,
        now: DateTime<Utc>,
    ) -> Result<(Connection, UsableCredential)> {
        let sealed = connection
            .refresh_token
            .as_ref()
            .ok_or_else(|| Error::TokenInvalid("no refresh token".to_string()))?;
        let refresh_token = self.codec.open(sealed)?;

        let refreshed = self
            .refresher
            .refresh(&connection.provider, &refresh_token)
            .await
            .map_err(|e| match e {
                Error::TokenInvalid(_) | Error::UnsupportedProvider(_) => e,
                other => Error::TokenInvalid(format!("refresh failed: {other}")),
            })?;

        let mut updated = connection.clone();
        updated.access_token = self.codec.seal(&refreshed.access_token)?;
        if let Some(rotated) = refreshed.refresh_token.as_deref() {
            updated.refresh_token = Some(self.codec.seal(rotated)?);
        }
        updated.expires_at = refreshed
            .expires_in
            .map(|secs| now + chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64));
        updated.touch(now);
        self.store.upsert_connection(&updated).await?;

        tracing::info!(
            connection_id = %updated.id,
            provider = %updated.provider,
            rotated = refreshed.refresh_token.is_some(),
            "refreshed access token"
        );

        let credential = UsableCredential {
            access_token: refreshed.access_token,
            expires_at: updated.expires_at,
            refreshed: true,
        };
        Ok((updated, credential))
    }

    /// Stamp `last_synced_at` on the stored connection.
    ///
    /// Re-reads the row so a refresh persisted earlier in the run is kept.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn record_successful_sync(
        &self,
        connection_id: ConnectionId,
        at: DateTime<Utc>,
    ) -> Result<Connection> {
        let mut connection = self
            .store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("connection {connection_id} not found")))?;
        connection.last_synced_at = Some(at);
        connection.touch(at);
        self.store.upsert_connection(&connection).await?;
        Ok(connection)
    }

    /// Per-run bearer source backed by this manager.
    pub fn session(&self, connection: Connection, credential: UsableCredential) -> CredentialSession {
        CredentialSession {
            manager: self.clone(),
            state: Mutex::new(SessionState {
                connection,
                credential,
                refreshes: 0,
            }),
        }
    }
}

fn ensure_active(connection: &Connection) -> Result<()> {
    if !connection.active {
        return Err(Error::TokenInvalid(format!(
            "connection {} is inactive",
            connection.id
        )));
    }
    Ok(())
}

struct SessionState {
    connection: Connection,
    credential: UsableCredential,
    refreshes: u32,
}

/// The credential of one run. Reactive refreshes go through the manager.
pub struct CredentialSession {
    manager: TokenLifecycleManager,
    state: Mutex<SessionState>,
}

impl CredentialSession {
    /// Number of reactive refreshes performed so far.
    pub async fn refresh_count(&self) -> u32 {
        self.state.lock().await.refreshes
    }
}

#[async_trait]
impl BearerAuth for CredentialSession {
    async fn bearer(&self) -> Result<String> {
        Ok(self.state.lock().await.credential.access_token.clone())
    }

    async fn on_unauthorized(&self, rejected: &str) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.credential.access_token != rejected {
            // Already replaced since that request went out.
            return Ok(state.credential.access_token.clone());
        }
        let (connection, credential) = self.manager.force_refresh(&state.connection).await?;
        state.connection = connection;
        state.credential = credential;
        state.refreshes += 1;
        Ok(state.credential.access_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use crate::secrets::AesGcmSecretsCodec;
    use crate::store::MemoryStore;
    use crate::token::refresher::RefreshedToken;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRefresher {
        calls: AtomicUsize,
        fail: bool,
        rotate: bool,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, _provider: &str, refresh_token: &str) -> Result<RefreshedToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(Error::TokenInvalid("invalid_grant".to_string()));
            }
            assert_eq!(refresh_token, "refresh-0");
            Ok(RefreshedToken {
                access_token: format!("access-{n}"),
                expires_in: Some(3600),
                refresh_token: self.rotate.then(|| format!("refresh-{n}")),
            })
        }
    }

    struct Fixture {
        store: MemoryStore,
        codec: Arc<AesGcmSecretsCodec>,
        refresher: Arc<FakeRefresher>,
        manager: TokenLifecycleManager,
    }

    fn fixture(refresher: FakeRefresher) -> Fixture {
        let store = MemoryStore::new();
        let codec = Arc::new(AesGcmSecretsCodec::new(&[7u8; 32]).unwrap());
        let refresher = Arc::new(refresher);
        let manager = TokenLifecycleManager::new(
            Arc::new(store.clone()),
            codec.clone(),
            refresher.clone(),
            Duration::from_secs(60),
        );
        Fixture {
            store,
            codec,
            refresher,
            manager,
        }
    }

    fn connection(
        f: &Fixture,
        expires_in: chrono::Duration,
        with_refresh: bool,
    ) -> Connection {
        Connection::new(
            UserId::new(),
            "gmail",
            f.codec.seal("access-0").unwrap(),
            with_refresh.then(|| f.codec.seal("refresh-0").unwrap()),
            Some(Utc::now() + expires_in),
            BTreeSet::new(),
            None,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn unexpired_credential_is_returned_unchanged() {
        let f = fixture(FakeRefresher::default());
        let conn = connection(&f, chrono::Duration::hours(1), true);
        let (same, cred) = f.manager.ensure_usable(&conn).await.unwrap();
        assert_eq!(cred.access_token, "access-0");
        assert!(!cred.refreshed);
        assert_eq!(same, conn);
        assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.connection_write_count(), 0);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_is_terminal_without_network() {
        let f = fixture(FakeRefresher::default());
        let conn = connection(&f, chrono::Duration::minutes(-5), false);
        let err = f.manager.ensure_usable(&conn).await.unwrap_err();
        assert!(matches!(err, Error::TokenInvalid(_)));
        assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inactive_connection_is_rejected() {
        let f = fixture(FakeRefresher::default());
        let mut conn = connection(&f, chrono::Duration::hours(1), true);
        conn.active = false;
        assert!(matches!(
            f.manager.ensure_usable(&conn).await,
            Err(Error::TokenInvalid(_))
        ));
    }

    #[tokio::test]
    async fn refresh_persists_once_then_is_a_no_op() {
        let f = fixture(FakeRefresher {
            rotate: true,
            ..Default::default()
        });
        // Inside the skew window counts as expired.
        let conn = connection(&f, chrono::Duration::seconds(30), true);
        f.store.upsert_connection(&conn).await.unwrap();
        let writes_before = f.store.connection_write_count();

        let (updated, cred) = f.manager.ensure_usable(&conn).await.unwrap();
        assert!(cred.refreshed);
        assert_eq!(cred.access_token, "access-1");
        assert_eq!(f.store.connection_write_count(), writes_before + 1);

        let stored = f.store.get_connection(conn.id).await.unwrap().unwrap();
        assert_eq!(f.codec.open(&stored.access_token).unwrap(), "access-1");
        assert_eq!(
            f.codec.open(stored.refresh_token.as_ref().unwrap()).unwrap(),
            "refresh-1"
        );

        let (_, again) = f.manager.ensure_usable(&updated).await.unwrap();
        assert!(!again.refreshed);
        assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.connection_write_count(), writes_before + 1);
    }

    #[tokio::test]
    async fn failed_refresh_is_token_invalid() {
        let f = fixture(FakeRefresher {
            fail: true,
            ..Default::default()
        });
        let conn = connection(&f, chrono::Duration::minutes(-1), true);
        assert!(matches!(
            f.manager.ensure_usable(&conn).await,
            Err(Error::TokenInvalid(_))
        ));
        assert_eq!(f.store.connection_write_count(), 0);
    }

    #[tokio::test]
    async fn session_refreshes_once_per_rejected_token() {
        let f = fixture(FakeRefresher::default());
        let conn = connection(&f, chrono::Duration::hours(1), true);
        let (conn, cred) = f.manager.ensure_usable(&conn).await.unwrap();
        let session = f.manager.session(conn, cred);

        let fresh = session.on_unauthorized("access-0").await.unwrap();
        assert_eq!(fresh, "access-1");
        // A second caller holding the same stale token gets the new one without another refresh.
        let again = session.on_unauthorized("access-0").await.unwrap();
        assert_eq!(again, "access-1");
        assert_eq!(session.refresh_count().await, 1);
        assert_eq!(session.bearer().await.unwrap(), "access-1");
        assert_eq!(f.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn record_successful_sync_keeps_refreshed_credentials() {
        let f = fixture(FakeRefresher::default());
        let conn = connection(&f, chrono::Duration::minutes(-1), true);
        f.store.upsert_connection(&conn).await.unwrap();
        f.manager.ensure_usable(&conn).await.unwrap();

        let at = Utc::now();
        let stamped = f.manager.record_successful_sync(conn.id, at).await.unwrap();
        assert_eq!(stamped.last_synced_at, Some(at));
        assert_eq!(f.codec.open(&stamped.access_token).unwrap(), "access-1");
    }
}
