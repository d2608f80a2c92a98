use crate::config::ProviderConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Result of a successful `grant_type=refresh_token` exchange.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Lifetime in seconds. Absent means the provider did not say.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Present only when the provider rotates refresh tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Exchanges a refresh credential for a new access credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<RefreshedToken>;
}

/// OAuth client registration for one provider's token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Standard OAuth2 refresh over a form-encoded POST.
pub struct OAuthTokenRefresher {
    http: reqwest::Client,
    clients: HashMap<String, OAuthClient>,
}

impl OAuthTokenRefresher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::backend("reqwest client build", e))?;
        Ok(Self {
            http,
            clients: HashMap::new(),
        })
    }

    pub fn with_client(mut self, provider: impl Into<String>, client: OAuthClient) -> Self {
        self.clients.insert(provider.into(), client);
        self
    }

    pub fn from_provider_configs<'a>(
        configs: impl IntoIterator<Item = &'a ProviderConfig>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut out = Self::new(timeout)?;
        for cfg in configs {
            out = out.with_client(
                cfg.provider.clone(),
                OAuthClient {
                    token_url: cfg.token_url.clone(),
                    client_id: cfg.client_id.clone(),
                    client_secret: cfg.client_secret.clone(),
                },
            );
        }
        Ok(out)
    }
}

#[async_trait]
impl TokenRefresher for OAuthTokenRefresher {
    #[tracing::instrument(level = "debug", skip(self, refresh_token))]
    async fn refresh(&self, provider: &str, refresh_token: &str) -> Result<RefreshedToken> {
        let client = self
            .clients
            .get(provider)
            .ok_or_else(|| Error::UnsupportedProvider(format!("no OAuth client for {provider}")))?;

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", client.client_id.as_str()),
        ];
        if let Some(secret) = client.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let resp = self
            .http
            .post(&client.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::TokenInvalid(format!("token endpoint unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::TokenInvalid(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                truncate(&body, 300)
            )));
        }

        let token: RefreshedToken = resp
            .json()
            .await
            .map_err(|e| Error::TokenInvalid(format!("malformed token response: {e}")))?;
        if token.access_token.trim().is_empty() {
            return Err(Error::TokenInvalid(
                "token response has an empty access_token".to_string(),
            ));
        }
        Ok(token)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn refresher(server: &MockServer) -> OAuthTokenRefresher {
        OAuthTokenRefresher::new(Duration::from_secs(5))
            .unwrap()
            .with_client(
                "gmail",
                OAuthClient {
                    token_url: format!("{}/token", server.uri()),
                    client_id: "cid".into(),
                    client_secret: Some("csecret".into()),
                },
            )
    }

    #[tokio::test]
    async fn posts_refresh_grant_as_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .and(body_string_contains("client_secret=csecret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = refresher(&server).await.refresh("gmail", "rt-1").await.unwrap();
        assert_eq!(token.access_token, "at-2");
        assert_eq!(token.expires_in, Some(3599));
        assert!(token.refresh_token.is_none());
    }

    #[tokio::test]
    async fn rejected_grant_is_token_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let err = refresher(&server).await.refresh("gmail", "rt-1").await.unwrap_err();
        assert!(matches!(err, Error::TokenInvalid(ref m) if m.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn unknown_provider_has_no_client() {
        let server = MockServer::start().await;
        let err = refresher(&server).await.refresh("dropbox", "rt").await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedProvider(_)));
    }
}
