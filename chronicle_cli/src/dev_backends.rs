use chronicle_core::{
    AesGcmSecretsCodec, OAuthTokenRefresher, SqliteStore, SyncConfig, SyncOrchestrator,
    TokenLifecycleManager,
};
use std::path::Path;
use std::sync::Arc;

/// Everything a local CLI invocation needs, backed by files under `data_dir`.
pub struct DevBackends {
    pub store: Arc<SqliteStore>,
    pub tokens: TokenLifecycleManager,
    pub orchestrator: SyncOrchestrator,
}

/// SQLite store at `{data_dir}/chronicle.db`, master key at `{data_dir}/master.key`
/// (generated on first use), provider configs from defaults plus `CHRONICLE_*` env.
///
/// A non-empty `enabled` restricts the registry to those providers; naming one that
/// is not compiled in fails before anything is opened.
#[tracing::instrument(level = "info", skip_all, fields(data_dir = %data_dir.display()))]
pub async fn build_dev_backends(data_dir: &Path, enabled: &[String]) -> anyhow::Result<DevBackends> {
    let config = SyncConfig::from_env()?;

    let mut providers = chronicle_integrations::default_provider_configs()?;
    if !enabled.is_empty() {
        providers.retain(|p| enabled.contains(&p.provider));
    }
    let registry = chronicle_integrations::build_registry(&providers)?;
    registry.validate_configured(enabled.iter().map(String::as_str))?;

    tokio::fs::create_dir_all(data_dir).await?;
    let store = Arc::new(SqliteStore::new(data_dir.join("chronicle.db")).await?);
    let key = AesGcmSecretsCodec::generate_or_load_key(&data_dir.join("master.key"))?;
    let codec = Arc::new(AesGcmSecretsCodec::new(&key)?);

    let refresher = Arc::new(OAuthTokenRefresher::from_provider_configs(
        &providers,
        config.http_timeout,
    )?);
    let tokens = TokenLifecycleManager::new(store.clone(), codec, refresher, config.expiry_skew);

    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        registry,
        tokens.clone(),
        store.clone(),
        config,
    )?;
    tracing::info!(providers = ?orchestrator.registry().providers(), "dev backends ready");

    Ok(DevBackends {
        store,
        tokens,
        orchestrator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::{Connection, SyncStore, UserId};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn reopening_keeps_the_key_and_the_data() {
        let dir = tempfile::tempdir().unwrap();
        let first = build_dev_backends(dir.path(), &[]).await.unwrap();
        let key = std::fs::read(dir.path().join("master.key")).unwrap();
        assert_eq!(key.len(), 32);
        assert!(dir.path().join("chronicle.db").exists());

        let connection = Connection::new(
            UserId::new(),
            "gmail",
            first.tokens.seal("access").unwrap(),
            None,
            None,
            BTreeSet::new(),
            None,
        )
        .unwrap();
        first.store.upsert_connection(&connection).await.unwrap();
        drop(first);

        let again = build_dev_backends(dir.path(), &[]).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("master.key")).unwrap(), key);
        let stored = again.store.get_connection(connection.id).await.unwrap();
        assert_eq!(stored.map(|c| c.id), Some(connection.id));
    }

    #[tokio::test]
    async fn enabled_providers_limit_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let only_spotify = build_dev_backends(dir.path(), &["spotify".to_string()])
            .await
            .unwrap();
        assert_eq!(only_spotify.orchestrator.registry().providers(), vec!["spotify"]);
        assert!(only_spotify.orchestrator.registry().get("gmail").is_err());
    }

    #[tokio::test]
    async fn unknown_enabled_provider_fails_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let err = build_dev_backends(&data_dir, &["gmail".to_string(), "myspace".to_string()])
            .await
            .err()
            .unwrap();
        let err = err.downcast::<chronicle_core::Error>().unwrap();
        assert!(matches!(err, chronicle_core::Error::UnsupportedProvider(p) if p == "myspace"));
        assert!(!data_dir.exists());
    }
}
