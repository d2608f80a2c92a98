use super::traits::ProviderConnector;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Provider id -> connector. Built once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn ProviderConnector>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(level = "debug", skip(self, connector), fields(provider = connector.id()))]
    pub fn register(&mut self, connector: Arc<dyn ProviderConnector>) -> Result<()> {
        let id = connector.id();
        let cfg = connector.config();
        cfg.validate()?;
        if cfg.provider != id {
            return Err(Error::InvalidInput(format!(
                "connector '{id}' was built with config for '{}'",
                cfg.provider
            )));
        }
        if self.connectors.contains_key(id) {
            return Err(Error::InvalidInput(format!(
                "connector '{id}' registered twice"
            )));
        }
        self.connectors.insert(id.to_string(), connector);
        Ok(())
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderConnector>> {
        self.connectors
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::UnsupportedProvider(provider.to_string()))
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.connectors.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    /// Fail fast if any configured provider has no connector.
    pub fn validate_configured<'a>(&self, providers: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for provider in providers {
            self.get(provider)?;
        }
        Ok(())
    }
}
