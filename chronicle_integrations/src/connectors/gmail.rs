//! Gmail connector.
//!
//! Lists messages newer than the fetch window (`q=after:<epoch>`), then pulls
//! each message in `format=full`. Auth is the run's OAuth2 bearer.

use crate::heuristics::{email_domain, Heuristics};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use chronicle_core::{
    Continuation, Error, FetchContext, FetchLimits, FetchOptions, MemoryMetadata, MemoryType,
    NormalizedRecord, PageEndpoint, ProviderConfig, ProviderConnector, RawBundle,
    ResolvedSyncOptions, Result, Transformed,
};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::instrument;

pub const PROVIDER: &str = "gmail";

const MESSAGES: &str = "messages";
const LABELS: &str = "labels";

/// Pulls mail as `message` memories.
pub struct GmailConnector {
    config: ProviderConfig,
    heuristics: Heuristics,
}

impl GmailConnector {
    pub fn default_config() -> ProviderConfig {
        ProviderConfig {
            provider: PROVIDER.to_string(),
            api_base_url: "https://gmail.googleapis.com".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: String::new(),
            client_secret: None,
            min_request_interval: Duration::from_millis(100),
            first_sync: FetchOptions::new(90, 500, 100),
            incremental_sync: FetchOptions::new(7, 100, 50),
        }
    }

    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            config,
            heuristics: Heuristics::new()?,
        })
    }

    fn user_base(&self) -> String {
        format!(
            "{}/gmail/v1/users/me",
            self.config.api_base_url.trim_end_matches('/')
        )
    }

    fn message_record(&self, msg: &Value, labels: Option<&Value>) -> Result<NormalizedRecord> {
        let id = msg["id"]
            .as_str()
            .ok_or_else(|| Error::Transform("message has no id".to_string()))?;
        let occurred_at = internal_date(msg)
            .ok_or_else(|| Error::Transform(format!("message {id} has no usable internalDate")))?;

        let headers = &msg["payload"]["headers"];
        let subject = header(headers, "Subject").unwrap_or_default();
        let from = header(headers, "From").unwrap_or_default();

        let body = plain_text(&msg["payload"])
            .or_else(|| msg["snippet"].as_str().map(str::to_string))
            .unwrap_or_default();

        let mut metadata = MemoryMetadata::default();
        for name in ["From", "To", "Cc"] {
            if let Some(value) = header(headers, name) {
                metadata
                    .people
                    .extend(self.heuristics.email_addresses(&value));
            }
        }
        for sender in self.heuristics.email_addresses(&from) {
            if let Some(category) = email_domain(&sender).and_then(|d| self.heuristics.domain_category(d)) {
                metadata.categories.insert(category.to_string());
            }
        }

        let label_names: Vec<String> = msg["labelIds"]
            .as_array()
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(|label_id| {
                        labels
                            .and_then(|l| l[label_id].as_str())
                            .unwrap_or(label_id)
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default();
        metadata
            .tags
            .extend(self.heuristics.label_tags(label_names.iter().map(String::as_str)));
        metadata
            .tags
            .extend(self.heuristics.content_tags(&format!("{subject}\n{body}")));

        let title = if subject.trim().is_empty() {
            "(no subject)".to_string()
        } else {
            subject
        };

        NormalizedRecord::new(
            id,
            MemoryType::Message,
            title,
            body,
            occurred_at,
            metadata,
            msg.clone(),
        )
    }
}

#[async_trait]
impl ProviderConnector for GmailConnector {
    fn id(&self) -> &'static str {
        PROVIDER
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    #[instrument(level = "info", skip(self, ctx), fields(connection_id = %ctx.connection_id))]
    async fn fetch_data(
        &self,
        ctx: &FetchContext<'_>,
        options: &ResolvedSyncOptions,
    ) -> Result<RawBundle> {
        let base = self.user_base();
        let client = ctx.fetcher.client();

        let labels_body = client.get_json(&format!("{base}/labels"), &[]).await?;
        let mut labels = Map::new();
        for label in labels_body["labels"].as_array().into_iter().flatten() {
            if let (Some(id), Some(name)) = (label["id"].as_str(), label["name"].as_str()) {
                labels.insert(id.to_string(), Value::String(name.to_string()));
            }
        }

        let endpoint = PageEndpoint::new(
            format!("{base}/messages"),
            "/messages",
            "maxResults",
            Continuation::page_token(),
        )
        .with_query("q", format!("after:{}", options.since.timestamp()));
        let refs = ctx
            .fetcher
            .fetch_all(
                endpoint,
                FetchLimits {
                    page_size: options.page_size.min(500),
                    max_items: Some(options.max_items),
                },
            )
            .await?;

        let mut messages = Vec::with_capacity(refs.len());
        for r in refs {
            // Refs without an id pass through so the transform reports them.
            let Some(id) = r["id"].as_str() else {
                messages.push(r);
                continue;
            };
            let detail = client
                .get_json(
                    &format!("{base}/messages/{id}"),
                    &[("format".to_string(), "full".to_string())],
                )
                .await?;
            messages.push(detail);
        }
        tracing::info!(messages = messages.len(), labels = labels.len(), "gmail fetch complete");

        Ok(RawBundle::new()
            .with_dataset(MESSAGES, messages)
            .with_lookup(LABELS, Value::Object(labels)))
    }

    fn transform_to_memories(&self, bundle: &RawBundle) -> Transformed {
        let labels = bundle.lookup(LABELS);
        let mut out = Transformed::default();
        for msg in bundle.dataset(MESSAGES) {
            out.push(msg["id"].as_str(), self.message_record(msg, labels));
        }
        out
    }
}

fn header(headers: &Value, name: &str) -> Option<String> {
    headers.as_array()?.iter().find_map(|h| {
        let matches = h["name"]
            .as_str()
            .is_some_and(|n| n.eq_ignore_ascii_case(name));
        matches.then(|| h["value"].as_str().unwrap_or_default().to_string())
    })
}

/// `internalDate` is epoch milliseconds encoded as a string.
fn internal_date(msg: &Value) -> Option<DateTime<Utc>> {
    let ms = match &msg["internalDate"] {
        Value::String(s) => s.parse::<i64>().ok()?,
        Value::Number(n) => n.as_i64()?,
        _ => return None,
    };
    Utc.timestamp_millis_opt(ms).single()
}

/// First `text/plain` part, depth first.
fn plain_text(part: &Value) -> Option<String> {
    if part["mimeType"].as_str() == Some("text/plain") {
        if let Some(text) = part["body"]["data"].as_str().and_then(decode_body) {
            return Some(text);
        }
    }
    part["parts"].as_array()?.iter().find_map(plain_text)
}

fn decode_body(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    String::from_utf8(bytes).ok()
}
