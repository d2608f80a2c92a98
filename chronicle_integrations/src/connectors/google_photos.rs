//! Google Photos Library connector.

use crate::heuristics::Heuristics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::{
    Continuation, Error, FetchContext, FetchLimits, FetchOptions, MemoryMetadata, MemoryType,
    NormalizedRecord, PageEndpoint, ProviderConfig, ProviderConnector, RawBundle,
    ResolvedSyncOptions, Result, Transformed,
};
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

pub const PROVIDER: &str = "google_photos";

const MEDIA_ITEMS: &str = "media_items";

/// Library API cap.
const MAX_MEDIA_PAGE: usize = 100;

pub struct GooglePhotosConnector {
    config: ProviderConfig,
    heuristics: Heuristics,
}

impl GooglePhotosConnector {
    pub fn default_config() -> ProviderConfig {
        ProviderConfig {
            provider: PROVIDER.to_string(),
            api_base_url: "https://photoslibrary.googleapis.com".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: String::new(),
            client_secret: None,
            min_request_interval: Duration::from_millis(200),
            first_sync: FetchOptions::new(365, 1000, 100),
            incremental_sync: FetchOptions::new(30, 200, 100),
        }
    }

    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            config,
            heuristics: Heuristics::new()?,
        })
    }

    fn media_record(&self, item: &Value) -> Result<NormalizedRecord> {
        let id = item["id"]
            .as_str()
            .ok_or_else(|| Error::Transform("media item has no id".to_string()))?;
        let media = &item["mediaMetadata"];
        let occurred_at = creation_time(item)
            .ok_or_else(|| Error::Transform(format!("media item {id} has no creationTime")))?;

        let is_video = item["mimeType"]
            .as_str()
            .is_some_and(|m| m.starts_with("video/"))
            || media.get("video").is_some();
        let (memory_type, kind_tag) = if is_video {
            (MemoryType::Video, "video")
        } else {
            (MemoryType::Photo, "photo")
        };

        let description = item["description"].as_str().unwrap_or_default().trim();
        let title = if !description.is_empty() {
            description.to_string()
        } else {
            item["filename"].as_str().unwrap_or(id).to_string()
        };

        let mut metadata = MemoryMetadata::default();
        metadata.tags.insert(kind_tag.to_string());
        metadata
            .tags
            .insert(self.heuristics.time_of_day(occurred_at).to_string());
        let camera = media["photo"]["cameraMake"]
            .as_str()
            .or_else(|| media["video"]["cameraMake"].as_str());
        if let Some(make) = camera.map(str::trim).filter(|m| !m.is_empty()) {
            metadata.tags.insert(make.to_lowercase());
        }
        metadata.tags.extend(self.heuristics.content_tags(description));

        NormalizedRecord::new(
            id,
            memory_type,
            title,
            description,
            occurred_at,
            metadata,
            item.clone(),
        )
    }
}

#[async_trait]
impl ProviderConnector for GooglePhotosConnector {
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
        let base = self.config.api_base_url.trim_end_matches('/');

        let listed = ctx
            .fetcher
            .fetch_all(
                PageEndpoint::new(
                    format!("{base}/v1/mediaItems"),
                    "/mediaItems",
                    "pageSize",
                    Continuation::page_token(),
                ),
                FetchLimits {
                    page_size: options.page_size.min(MAX_MEDIA_PAGE),
                    max_items: Some(options.max_items),
                },
            )
            .await?;
        // The list endpoint has no date filter. Undated items stay so the transform reports them.
        let total = listed.len();
        let items: Vec<Value> = listed
            .into_iter()
            .filter(|item| creation_time(item).map_or(true, |at| at >= options.since))
            .collect();
        tracing::info!(
            listed = total,
            in_window = items.len(),
            "google photos fetch complete"
        );

        Ok(RawBundle::new().with_dataset(MEDIA_ITEMS, items))
    }

    fn transform_to_memories(&self, bundle: &RawBundle) -> Transformed {
        let mut out = Transformed::default();
        for item in bundle.dataset(MEDIA_ITEMS) {
            out.push(item["id"].as_str(), self.media_record(item));
        }
        out
    }
}

fn creation_time(item: &Value) -> Option<DateTime<Utc>> {
    let raw = item["mediaMetadata"]["creationTime"].as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector() -> GooglePhotosConnector {
        GooglePhotosConnector::new(GooglePhotosConnector::default_config()).unwrap()
    }

    #[test]
    fn photos_and_videos_are_typed_and_tagged() {
        let bundle = RawBundle::new().with_dataset(
            MEDIA_ITEMS,
            vec![
                json!({
                    "id": "p1",
                    "filename": "IMG_0001.jpg",
                    "mimeType": "image/jpeg",
                    "mediaMetadata": {
                        "creationTime": "2024-05-04T08:15:00Z",
                        "photo": {"cameraMake": "Canon"}
                    }
                }),
                json!({
                    "id": "v1",
                    "description": "Birthday party in the park",
                    "filename": "VID_0002.mp4",
                    "mimeType": "video/mp4",
                    "mediaMetadata": {
                        "creationTime": "2024-05-04T19:30:00Z",
                        "video": {"fps": 30.0}
                    }
                }),
            ],
        );

        let out = connector().transform_to_memories(&bundle);
        assert!(out.failures.is_empty());

        let photo = &out.records[0];
        assert_eq!(photo.memory_type, MemoryType::Photo);
        assert_eq!(photo.title, "IMG_0001.jpg");
        assert_eq!(photo.body, "");
        for tag in ["photo", "morning", "canon"] {
            assert!(photo.metadata.tags.contains(tag), "missing tag {tag}");
        }

        let video = &out.records[1];
        assert_eq!(video.memory_type, MemoryType::Video);
        assert_eq!(video.title, "Birthday party in the park");
        for tag in ["video", "evening", "celebration"] {
            assert!(video.metadata.tags.contains(tag), "missing tag {tag}");
        }
    }

    #[test]
    fn items_without_creation_time_are_reported() {
        let bundle = RawBundle::new().with_dataset(
            MEDIA_ITEMS,
            vec![json!({"id": "p9", "mediaMetadata": {}})],
        );
        let out = connector().transform_to_memories(&bundle);
        assert!(out.records.is_empty());
        assert_eq!(out.failures[0].external_id.as_deref(), Some("p9"));
    }
}
