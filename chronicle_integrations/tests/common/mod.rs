#![allow(dead_code)]

use chrono::{DateTime, Utc};
use chronicle_core::{
    AesGcmSecretsCodec, Connection, ListQuery, MemoryStore, MemoryTaskQueue, OAuthTokenRefresher,
    ProviderConfig, RunLog, SecretsCodec, StoredMemory, SyncConfig, SyncOrchestrator, SyncStore,
    TokenLifecycleManager, UserId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<dyn SyncStore>,
    pub codec: Arc<AesGcmSecretsCodec>,
    pub tokens: TokenLifecycleManager,
    pub queue: Arc<MemoryTaskQueue>,
    pub orchestrator: SyncOrchestrator,
}

/// Point `config` at a fresh mock server and wire the full pipeline around it.
pub async fn harness(config: ProviderConfig) -> Harness {
    harness_with_store(config, Arc::new(MemoryStore::new())).await
}

pub async fn harness_with_store(mut config: ProviderConfig, store: Arc<dyn SyncStore>) -> Harness {
    let server = MockServer::start().await;
    config.api_base_url = server.uri();
    config.token_url = format!("{}/token", server.uri());
    config.client_id = "test-client".to_string();
    config.min_request_interval = Duration::ZERO;

    let codec = Arc::new(AesGcmSecretsCodec::new(&[7u8; 32]).unwrap());
    let refresher = Arc::new(
        OAuthTokenRefresher::from_provider_configs([&config], Duration::from_secs(5)).unwrap(),
    );
    let tokens = TokenLifecycleManager::new(
        store.clone(),
        codec.clone(),
        refresher,
        Duration::from_secs(60),
    );
    let queue = Arc::new(MemoryTaskQueue::new());
    let registry = chronicle_integrations::build_registry(&[config]).unwrap();
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        registry,
        tokens.clone(),
        queue.clone(),
        SyncConfig::default(),
    )
    .unwrap();

    Harness {
        server,
        store,
        codec,
        tokens,
        queue,
        orchestrator,
    }
}

impl Harness {
    pub async fn connect(
        &self,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Connection {
        let connection = Connection::new(
            UserId::new(),
            provider,
            self.tokens.seal(access_token).unwrap(),
            refresh_token.map(|t| self.tokens.seal(t).unwrap()),
            expires_at,
            BTreeSet::new(),
            None,
        )
        .unwrap();
        self.store.upsert_connection(&connection).await.unwrap();
        connection
    }

    pub async fn memories(&self, connection: &Connection) -> Vec<StoredMemory> {
        self.store
            .list_memories(connection.id, ListQuery::default())
            .await
            .unwrap()
    }

    pub async fn runs(&self, connection: &Connection) -> Vec<RunLog> {
        self.orchestrator
            .list_runs(connection.id, ListQuery::default())
            .await
            .unwrap()
    }

    pub async fn access_token(&self, connection: &Connection) -> String {
        let stored = self
            .store
            .get_connection(connection.id)
            .await
            .unwrap()
            .unwrap();
        self.codec.open(&stored.access_token).unwrap()
    }
}
