use crate::token::BearerAuth;
use crate::{Error, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const MAX_ERROR_BODY: usize = 500;

/// Enforces a minimum spacing between requests. Only the calling task sleeps.
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Authorized, paced HTTP access to one provider for the duration of a run.
///
/// A 401 triggers exactly one `BearerAuth::on_unauthorized` and one retry; a
/// second 401 is `TokenInvalid`.
pub struct ProviderClient {
    http: reqwest::Client,
    auth: Arc<dyn BearerAuth>,
    pacer: Pacer,
}

impl ProviderClient {
    pub fn new(http: reqwest::Client, auth: Arc<dyn BearerAuth>, min_interval: Duration) -> Self {
        Self {
            http,
            auth,
            pacer: Pacer::new(min_interval),
        }
    }

    /// Shared reqwest client with the pipeline's per-request timeout.
    pub fn build_http(timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend("reqwest client build", e))
    }

    #[tracing::instrument(level = "debug", skip(self, query))]
    pub async fn get_json(&self, url: &str, query: &[(String, String)]) -> Result<Value> {
        let token = self.auth.bearer().await?;
        let mut resp = self.send(url, query, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::info!(url, "provider returned 401; refreshing credential once");
            let retry_token = self.auth.on_unauthorized(&token).await?;
            resp = self.send(url, query, &retry_token).await?;
            if resp.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::TokenInvalid(format!(
                    "provider rejected the refreshed credential for {url}"
                )));
            }
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ProviderFetch {
                status: Some(status.as_u16()),
                url: url.to_string(),
                body: truncate(&body, MAX_ERROR_BODY).to_string(),
            });
        }

        resp.json::<Value>().await.map_err(|e| Error::ProviderFetch {
            status: Some(status.as_u16()),
            url: url.to_string(),
            body: format!("invalid JSON body: {e}"),
        })
    }

    async fn send(
        &self,
        url: &str,
        query: &[(String, String)],
        token: &str,
    ) -> Result<reqwest::Response> {
        self.pacer.wait().await;
        self.http
            .get(url)
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::provider_transport(url, e))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
