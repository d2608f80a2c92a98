use super::client::ProviderClient;
use crate::{Error, Result};
use futures_util::{Stream, TryStreamExt};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// How a provider hands out the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Opaque token at `pointer` in the body, echoed back as query param `param`.
    QueryToken { param: String, pointer: String },
    /// Absolute URL at `pointer` in the body, requested as-is.
    NextUrl { pointer: String },
}

impl Continuation {
    /// Google-style `pageToken` / `nextPageToken`.
    pub fn page_token() -> Self {
        Continuation::QueryToken {
            param: "pageToken".to_string(),
            pointer: "/nextPageToken".to_string(),
        }
    }

    /// Spotify-style `next` URL.
    pub fn next_url() -> Self {
        Continuation::NextUrl {
            pointer: "/next".to_string(),
        }
    }

    fn pointer(&self) -> &str {
        match self {
            Continuation::QueryToken { pointer, .. } | Continuation::NextUrl { pointer } => pointer,
        }
    }
}

/// A paginated list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEndpoint {
    pub url: String,
    pub query: Vec<(String, String)>,
    /// JSON pointer to the item array in each page body, e.g. `/messages`.
    pub items_pointer: String,
    pub page_size_param: String,
    pub continuation: Continuation,
}

impl PageEndpoint {
    pub fn new(
        url: impl Into<String>,
        items_pointer: impl Into<String>,
        page_size_param: impl Into<String>,
        continuation: Continuation,
    ) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            items_pointer: items_pointer.into(),
            page_size_param: page_size_param.into(),
            continuation,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FetchLimits {
    pub page_size: usize,
    /// Stop once this many items were yielded; the last page is truncated.
    pub max_items: Option<usize>,
}

/// One page of raw provider items.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub index: usize,
    pub items: Vec<Value>,
    pub continuation: Option<String>,
}

/// Lazy, sequential page walker over a [`ProviderClient`].
#[derive(Clone)]
pub struct PaginatedFetcher {
    client: Arc<ProviderClient>,
}

impl PaginatedFetcher {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    /// Stream pages until the provider stops returning a continuation, `max_items`
    /// is reached, or an error occurs. Nothing is requested until polled.
    pub fn fetch(
        &self,
        endpoint: PageEndpoint,
        limits: FetchLimits,
    ) -> impl Stream<Item = Result<RawPage>> + Send + 'static {
        let client = self.client.clone();
        async_stream::try_stream! {
            let mut seen: HashSet<String> = HashSet::new();
            let mut next: Option<String> = None;
            let mut fetched = 0usize;
            let mut index = 0usize;

            loop {
                let remaining = limits.max_items.map(|max| max.saturating_sub(fetched));
                let page_size = remaining
                    .map_or(limits.page_size, |r| r.min(limits.page_size))
                    .max(1);

                let (url, query) = match (&endpoint.continuation, next.as_ref()) {
                    (Continuation::NextUrl { .. }, Some(next_url)) => (next_url.clone(), Vec::new()),
                    (continuation, token) => {
                        let mut query = endpoint.query.clone();
                        query.push((endpoint.page_size_param.clone(), page_size.to_string()));
                        if let (Continuation::QueryToken { param, .. }, Some(token)) = (continuation, token) {
                            query.push((param.clone(), token.clone()));
                        }
                        (endpoint.url.clone(), query)
                    }
                };

                let body = client.get_json(&url, &query).await?;
                let mut items = page_items(&body, &endpoint.items_pointer, &url)?;

                if let Some(r) = remaining {
                    items.truncate(r);
                }
                fetched += items.len();

                let continuation = body
                    .pointer(endpoint.continuation.pointer())
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);

                if let Some(c) = continuation.as_ref() {
                    ensure_unseen(&mut seen, c, &url)?;
                }

                tracing::debug!(page = index, items = items.len(), fetched, "fetched page");
                let reached_cap = limits.max_items.is_some_and(|max| fetched >= max);
                let done = continuation.is_none() || reached_cap;
                yield RawPage { index, items, continuation: continuation.clone() };

                if done {
                    break;
                }
                next = continuation;
                index += 1;
            }
        }
    }

    /// Drain [`fetch`](Self::fetch) into one list, in page order.
    #[tracing::instrument(level = "debug", skip(self), fields(url = %endpoint.url))]
    pub async fn fetch_all(&self, endpoint: PageEndpoint, limits: FetchLimits) -> Result<Vec<Value>> {
        let stream = self.fetch(endpoint, limits);
        futures_util::pin_mut!(stream);
        let mut out = Vec::new();
        while let Some(page) = stream.try_next().await? {
            out.extend(page.items);
        }
        Ok(out)
    }
}

fn page_items(body: &Value, pointer: &str, url: &str) -> Result<Vec<Value>> {
    match body.pointer(pointer) {
        Some(Value::Array(items)) => Ok(items.clone()),
        // Providers omit the array on empty pages.
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(_) => Err(Error::ProviderFetch {
            status: None,
            url: url.to_string(),
            body: format!("expected an array at {pointer}"),
        }),
    }
}

fn ensure_unseen(seen: &mut HashSet<String>, continuation: &str, url: &str) -> Result<()> {
    if seen.insert(continuation.to_string()) {
        return Ok(());
    }
    Err(Error::ProviderFetch {
        status: None,
        url: url.to_string(),
        body: "provider repeated a continuation token".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{BearerAuth, StaticBearer};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(auth: Arc<dyn BearerAuth>) -> PaginatedFetcher {
        let http = ProviderClient::build_http(Duration::from_secs(5)).unwrap();
        PaginatedFetcher::new(Arc::new(ProviderClient::new(http, auth, Duration::ZERO)))
    }

    fn messages(server: &MockServer) -> PageEndpoint {
        PageEndpoint::new(
            format!("{}/messages", server.uri()),
            "/messages",
            "maxResults",
            Continuation::page_token(),
        )
    }

    fn limits(page_size: usize, max_items: Option<usize>) -> FetchLimits {
        FetchLimits { page_size, max_items }
    }

    #[tokio::test]
    async fn concatenates_pages_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("pageToken", "t2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "3"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "1"}, {"id": "2"}],
                "nextPageToken": "t2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch_all(messages(&server), limits(2, None))
            .await
            .unwrap();
        let ids: Vec<&str> = items.iter().filter_map(|v| v["id"].as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn stops_at_max_items_and_shrinks_last_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("pageToken", "t2"))
            .and(query_param("maxResults", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "4"}, {"id": "5"}],
                "nextPageToken": "t3"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages"))
            .and(query_param("maxResults", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "1"}, {"id": "2"}, {"id": "3"}],
                "nextPageToken": "t2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let items = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch_all(messages(&server), limits(3, Some(4)))
            .await
            .unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(items[3]["id"], "4");
    }

    #[tokio::test]
    async fn follows_next_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recent/p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 2}],
                "next": null
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/recent"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"n": 1}],
                "next": format!("{}/recent/p2", server.uri())
            })))
            .mount(&server)
            .await;

        let endpoint = PageEndpoint::new(
            format!("{}/recent", server.uri()),
            "/items",
            "limit",
            Continuation::next_url(),
        );
        let items = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch_all(endpoint, limits(50, None))
            .await
            .unwrap();
        assert_eq!(items, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    struct RotatingAuth {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl BearerAuth for RotatingAuth {
        async fn bearer(&self) -> Result<String> {
            Ok("stale".to_string())
        }

        async fn on_unauthorized(&self, rejected: &str) -> Result<String> {
            assert_eq!(rejected, "stale");
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        }
    }

    #[tokio::test]
    async fn unauthorized_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": [{"id": "1"}]})))
            .expect(1)
            .mount(&server)
            .await;

        let auth = Arc::new(RotatingAuth {
            refreshes: AtomicUsize::new(0),
        });
        let items = fetcher(auth.clone())
            .fetch_all(messages(&server), limits(10, None))
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_unauthorized_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let auth = Arc::new(RotatingAuth {
            refreshes: AtomicUsize::new(0),
        });
        let err = fetcher(auth.clone())
            .fetch_all(messages(&server), limits(10, None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TokenInvalid(_)));
        assert_eq!(auth.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_error_carries_status_url_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
            .mount(&server)
            .await;

        let err = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch_all(messages(&server), limits(10, None))
            .await
            .unwrap_err();
        match err {
            Error::ProviderFetch { status, url, body } => {
                assert_eq!(status, Some(503));
                assert!(url.ends_with("/messages"));
                assert_eq!(body, "backend unavailable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_continuation_is_an_error_not_a_loop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{"id": "x"}],
                "nextPageToken": "same"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let stream = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch(messages(&server), limits(10, None));
        futures_util::pin_mut!(stream);
        let first = stream.try_next().await.unwrap().unwrap();
        assert_eq!(first.continuation.as_deref(), Some("same"));
        assert!(matches!(
            stream.try_next().await,
            Err(Error::ProviderFetch { .. })
        ));
    }

    #[tokio::test]
    async fn nothing_is_requested_until_polled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"messages": []})))
            .expect(0)
            .mount(&server)
            .await;
        let _stream = fetcher(Arc::new(StaticBearer("tok".into())))
            .fetch(messages(&server), limits(10, None));
    }
}
