//! Explicit configuration for the sync pipeline.
//!
//! Nothing below the orchestrator reads the environment; `from_env` and
//! `with_env_overrides` are for binaries assembling these structs.

use crate::sync::cascade::CascadePolicy;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline-wide knobs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on one orchestrated run, token check through reconcile.
    pub run_timeout: Duration,
    /// Credentials expiring within this window are refreshed up front.
    pub expiry_skew: Duration,
    /// Per-request timeout for provider and token endpoint calls.
    pub http_timeout: Duration,
    pub cascade: CascadePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(600),
            expiry_skew: Duration::from_secs(60),
            http_timeout: Duration::from_secs(30),
            cascade: CascadePolicy::default(),
        }
    }
}

impl SyncConfig {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.run_timeout.is_zero() {
            return Err(Error::InvalidInput("run_timeout must be > 0".to_string()));
        }
        if self.http_timeout.is_zero() {
            return Err(Error::InvalidInput("http_timeout must be > 0".to_string()));
        }
        if self.http_timeout > self.run_timeout {
            return Err(Error::InvalidInput(
                "http_timeout must be <= run_timeout".to_string(),
            ));
        }
        self.cascade.validate()
    }

    /// Defaults overlaid with `CHRONICLE_*` variables.
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_nonempty)
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("CHRONICLE_RUN_TIMEOUT_SECS") {
            cfg.run_timeout = Duration::from_secs(parse_u64("CHRONICLE_RUN_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CHRONICLE_TOKEN_EXPIRY_SKEW_SECS") {
            cfg.expiry_skew =
                Duration::from_secs(parse_u64("CHRONICLE_TOKEN_EXPIRY_SKEW_SECS", &v)?);
        }
        if let Some(v) = lookup("CHRONICLE_HTTP_TIMEOUT_SECS") {
            cfg.http_timeout = Duration::from_secs(parse_u64("CHRONICLE_HTTP_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("CHRONICLE_ENRICH_MIN_CHANGES") {
            cfg.cascade.enrichment_min_changes = parse_u64("CHRONICLE_ENRICH_MIN_CHANGES", &v)?;
        }
        if let Some(v) = lookup("CHRONICLE_ENRICH_DELAY_SECS") {
            cfg.cascade.enrichment_delay =
                Duration::from_secs(parse_u64("CHRONICLE_ENRICH_DELAY_SECS", &v)?);
        }
        if let Some(v) = lookup("CHRONICLE_REORGANIZE_THRESHOLD") {
            cfg.cascade.reorganize_threshold = parse_u64("CHRONICLE_REORGANIZE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("CHRONICLE_REORGANIZE_DELAY_SECS") {
            cfg.cascade.reorganize_delay =
                Duration::from_secs(parse_u64("CHRONICLE_REORGANIZE_DELAY_SECS", &v)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// How much history one fetch pass covers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub lookback: Duration,
    pub max_items: usize,
    pub page_size: usize,
}

impl FetchOptions {
    pub fn new(lookback_days: u64, max_items: usize, page_size: usize) -> Self {
        Self {
            lookback: Duration::from_secs(lookback_days * 24 * 60 * 60),
            max_items,
            page_size,
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.lookback.is_zero() {
            return Err(Error::InvalidInput(format!("{label}: lookback must be > 0")));
        }
        if self.max_items == 0 {
            return Err(Error::InvalidInput(format!("{label}: max_items must be > 0")));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidInput(format!("{label}: page_size must be > 0")));
        }
        Ok(())
    }
}

/// Per-provider endpoints, OAuth client, pacing, and default fetch windows.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Minimum spacing between consecutive requests of one run.
    pub min_request_interval: Duration,
    pub first_sync: FetchOptions,
    pub incremental_sync: FetchOptions,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("api_base_url", &self.api_base_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("min_request_interval", &self.min_request_interval)
            .field("first_sync", &self.first_sync)
            .field("incremental_sync", &self.incremental_sync)
            .finish()
    }
}

impl ProviderConfig {
    #[tracing::instrument(level = "debug")]
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(Error::InvalidInput("provider is empty".to_string()));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "{}: api_base_url is empty",
                self.provider
            )));
        }
        if self.token_url.trim().is_empty() {
            return Err(Error::InvalidInput(format!("{}: token_url is empty", self.provider)));
        }
        self.first_sync.validate(&format!("{}.first_sync", self.provider))?;
        self.incremental_sync
            .validate(&format!("{}.incremental_sync", self.provider))
    }

    /// Overlay `CHRONICLE_<PROVIDER>_*` variables (API base, token URL, client credentials, pacing).
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(env_nonempty)
    }

    pub(crate) fn with_overrides_from(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let prefix = format!("CHRONICLE_{}", self.provider.to_ascii_uppercase());
        if let Some(v) = lookup(&format!("{prefix}_API_BASE_URL")) {
            self.api_base_url = v;
        }
        if let Some(v) = lookup(&format!("{prefix}_TOKEN_URL")) {
            self.token_url = v;
        }
        if let Some(v) = lookup(&format!("{prefix}_CLIENT_ID")) {
            self.client_id = v;
        }
        if let Some(v) = lookup(&format!("{prefix}_CLIENT_SECRET")) {
            self.client_secret = Some(v);
        }
        let key = format!("{prefix}_MIN_INTERVAL_MS");
        if let Some(v) = lookup(&key) {
            self.min_request_interval = Duration::from_millis(parse_u64(&key, &v)?);
        }
        self.validate()?;
        Ok(self)
    }
}

/// Caller-facing knobs for one sync. Unset fields fall back to the provider defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Defaults to "the connection has never synced".
    #[serde(default)]
    pub is_first_sync: Option<bool>,
    #[serde(default, with = "opt_secs")]
    pub lookback_window: Option<Duration>,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

/// Fully resolved fetch window handed to a connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSyncOptions {
    pub is_first_sync: bool,
    /// Oldest activity to fetch.
    pub since: DateTime<Utc>,
    pub max_items: usize,
    pub page_size: usize,
}

impl SyncOptions {
    #[tracing::instrument(level = "debug", skip(provider))]
    pub fn resolve(
        &self,
        provider: &ProviderConfig,
        last_synced_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<ResolvedSyncOptions> {
        let is_first_sync = self.is_first_sync.unwrap_or(last_synced_at.is_none());
        let base = if is_first_sync {
            provider.first_sync
        } else {
            provider.incremental_sync
        };
        let resolved = FetchOptions {
            lookback: self.lookback_window.unwrap_or(base.lookback),
            max_items: self.max_items.unwrap_or(base.max_items),
            page_size: self.page_size.unwrap_or(base.page_size),
        };
        resolved.validate("sync options")?;
        let lookback = chrono::Duration::from_std(resolved.lookback)
            .map_err(|e| Error::InvalidInput(format!("lookback_window out of range: {e}")))?;
        let since = now.checked_sub_signed(lookback).ok_or_else(|| {
            Error::InvalidInput(format!(
                "lookback_window of {}s reaches before the earliest representable time",
                resolved.lookback.as_secs()
            ))
        })?;
        Ok(ResolvedSyncOptions {
            is_first_sync,
            since,
            max_items: resolved.max_items,
            // A page never needs to be larger than the whole run.
            page_size: resolved.page_size.min(resolved.max_items),
        })
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_u64(name: &str, v: &str) -> Result<u64> {
    v.trim()
        .parse::<u64>()
        .map_err(|_| Error::InvalidInput(format!("invalid {name}: {v}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn provider() -> ProviderConfig {
        ProviderConfig {
            provider: "gmail".into(),
            api_base_url: "https://gmail.googleapis.com".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            client_id: "client".into(),
            client_secret: Some("secret".into()),
            min_request_interval: Duration::from_millis(100),
            first_sync: FetchOptions::new(90, 500, 100),
            incremental_sync: FetchOptions::new(7, 100, 50),
        }
    }

    #[test]
    fn first_sync_defaults_from_last_synced_at() {
        let now = Utc::now();
        let never = SyncOptions::default().resolve(&provider(), None, now).unwrap();
        assert!(never.is_first_sync);
        assert_eq!(never.max_items, 500);
        assert_eq!(never.since, now - chrono::Duration::days(90));

        let synced = SyncOptions::default()
            .resolve(&provider(), Some(now), now)
            .unwrap();
        assert!(!synced.is_first_sync);
        assert_eq!(synced.page_size, 50);
        assert_eq!(synced.since, now - chrono::Duration::days(7));
    }

    #[test]
    fn explicit_options_override_provider_defaults() {
        let now = Utc::now();
        let opts = SyncOptions {
            is_first_sync: Some(true),
            lookback_window: Some(Duration::from_secs(3600)),
            max_items: Some(10),
            page_size: Some(25),
        };
        let r = opts.resolve(&provider(), Some(now), now).unwrap();
        assert!(r.is_first_sync);
        assert_eq!(r.since, now - chrono::Duration::hours(1));
        assert_eq!(r.max_items, 10);
        assert_eq!(r.page_size, 10);

        let bad = SyncOptions {
            page_size: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            bad.resolve(&provider(), None, now),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn lookback_past_the_calendar_is_invalid_input() {
        let now = Utc::now();
        // About 274 million years; fits chrono::Duration but not a DateTime.
        let huge = SyncOptions {
            lookback_window: Some(Duration::from_secs(100_000_000 * 86_400)),
            ..Default::default()
        };
        assert!(matches!(
            huge.resolve(&provider(), None, now),
            Err(Error::InvalidInput(msg)) if msg.contains("lookback_window")
        ));

        let max = SyncOptions {
            lookback_window: Some(Duration::MAX),
            ..Default::default()
        };
        assert!(matches!(
            max.resolve(&provider(), None, now),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn env_overrides_apply_by_provider_prefix() {
        let vars: HashMap<&str, &str> = [
            ("CHRONICLE_GMAIL_API_BASE_URL", "http://127.0.0.1:9999"),
            ("CHRONICLE_GMAIL_MIN_INTERVAL_MS", "0"),
            ("CHRONICLE_SPOTIFY_CLIENT_ID", "ignored"),
        ]
        .into_iter()
        .collect();
        let cfg = provider()
            .with_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.api_base_url, "http://127.0.0.1:9999");
        assert_eq!(cfg.min_request_interval, Duration::ZERO);
        assert_eq!(cfg.client_id, "client");
    }

    #[test]
    fn sync_config_rejects_bad_values() {
        let cfg = SyncConfig::from_lookup(|k| {
            (k == "CHRONICLE_REORGANIZE_THRESHOLD").then(|| "75".to_string())
        })
        .unwrap();
        assert_eq!(cfg.cascade.reorganize_threshold, 75);

        assert!(SyncConfig::from_lookup(|k| {
            (k == "CHRONICLE_RUN_TIMEOUT_SECS").then(|| "soon".to_string())
        })
        .is_err());

        let debug = format!("{:?}", provider());
        assert!(!debug.contains("\"secret\""));
    }
}
