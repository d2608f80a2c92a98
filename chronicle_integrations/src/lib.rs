//! Built-in provider connectors for Chronicle.
//!
//! Each connector is behind a cargo feature of the same name; all are on by default.

pub mod connectors;
pub mod heuristics;

use chronicle_core::{ConnectorRegistry, Error, ProviderConfig, Result};
use std::sync::Arc;

/// Default configs of every compiled-in provider, with `CHRONICLE_<PROVIDER>_*` overrides applied.
pub fn default_provider_configs() -> Result<Vec<ProviderConfig>> {
    #[allow(unused_mut)]
    let mut configs = Vec::new();
    #[cfg(feature = "gmail")]
    configs.push(connectors::GmailConnector::default_config());
    #[cfg(feature = "google_photos")]
    configs.push(connectors::GooglePhotosConnector::default_config());
    #[cfg(feature = "spotify")]
    configs.push(connectors::SpotifyConnector::default_config());
    configs
        .into_iter()
        .map(ProviderConfig::with_env_overrides)
        .collect()
}

/// Build a registry with one connector per config.
///
/// A config naming a provider that is not compiled in fails with `UnsupportedProvider`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn build_registry(configs: &[ProviderConfig]) -> Result<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    for config in configs {
        match config.provider.as_str() {
            #[cfg(feature = "gmail")]
            connectors::gmail::PROVIDER => registry.register(Arc::new(
                connectors::GmailConnector::new(config.clone())?,
            ))?,
            #[cfg(feature = "google_photos")]
            connectors::google_photos::PROVIDER => registry.register(Arc::new(
                connectors::GooglePhotosConnector::new(config.clone())?,
            ))?,
            #[cfg(feature = "spotify")]
            connectors::spotify::PROVIDER => registry.register(Arc::new(
                connectors::SpotifyConnector::new(config.clone())?,
            ))?,
            other => return Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
    tracing::debug!(providers = ?registry.providers(), "connector registry built");
    Ok(registry)
}

#[cfg(all(test, feature = "gmail", feature = "google_photos", feature = "spotify"))]
mod tests {
    use super::*;
    use chronicle_core::ErrorKind;

    #[test]
    fn registers_every_default_provider() {
        let configs = vec![
            connectors::GmailConnector::default_config(),
            connectors::GooglePhotosConnector::default_config(),
            connectors::SpotifyConnector::default_config(),
        ];
        let registry = build_registry(&configs).unwrap();
        assert_eq!(registry.providers(), vec!["gmail", "google_photos", "spotify"]);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut config = connectors::GmailConnector::default_config();
        config.provider = "myspace".to_string();
        let err = build_registry(&[config]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedProvider);
    }

    #[test]
    fn duplicate_provider_is_rejected() {
        let config = connectors::GmailConnector::default_config();
        assert!(build_registry(&[config.clone(), config]).is_err());
    }
}
