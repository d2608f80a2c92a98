//! Spotify Web API connector.
//!
//! Three datasets per run: recently played tracks (cursor paginated through
//! `next` URLs), the user's playlists, and top artists per time range.

use crate::heuristics::Heuristics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::{
    Continuation, Error, FetchContext, FetchLimits, FetchOptions, MemoryMetadata, MemoryType,
    NormalizedRecord, PageEndpoint, ProviderConfig, ProviderConnector, RawBundle,
    ResolvedSyncOptions, Result, Transformed,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::instrument;

pub const PROVIDER: &str = "spotify";

const RECENT: &str = "recently_played";
const PLAYLISTS: &str = "playlists";
const TOP_ARTISTS: &str = "top_artists";
const FETCHED_AT: &str = "fetched_at";

const TIME_RANGES: [&str; 3] = ["short_term", "medium_term", "long_term"];
const MAX_PAGE: usize = 50;
const TOP_ARTIST_LIMIT: usize = 20;

pub struct SpotifyConnector {
    config: ProviderConfig,
    heuristics: Heuristics,
}

impl SpotifyConnector {
    pub fn default_config() -> ProviderConfig {
        ProviderConfig {
            provider: PROVIDER.to_string(),
            api_base_url: "https://api.spotify.com".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            client_id: String::new(),
            client_secret: None,
            min_request_interval: Duration::from_millis(150),
            first_sync: FetchOptions::new(30, 200, 50),
            incremental_sync: FetchOptions::new(7, 50, 50),
        }
    }

    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            config,
            heuristics: Heuristics::new()?,
        })
    }

    fn track_record(&self, play: &Value, top: &BTreeSet<String>) -> Result<NormalizedRecord> {
        let track = &play["track"];
        let track_id = track["id"]
            .as_str()
            .ok_or_else(|| Error::Transform("played item has no track id".to_string()))?;
        let played_at_raw = play["played_at"]
            .as_str()
            .ok_or_else(|| Error::Transform(format!("track {track_id} has no played_at")))?;
        let played_at = parse_time(played_at_raw)
            .ok_or_else(|| Error::Transform(format!("track {track_id}: bad played_at {played_at_raw}")))?;

        let artists: Vec<&Value> = track["artists"].as_array().into_iter().flatten().collect();
        let artist_names: Vec<&str> = artists.iter().filter_map(|a| a["name"].as_str()).collect();
        let name = track["name"].as_str().unwrap_or(track_id);
        let title = if artist_names.is_empty() {
            name.to_string()
        } else {
            format!("{name} by {}", artist_names.join(", "))
        };

        let mut metadata = MemoryMetadata::default();
        metadata.categories.insert("music".to_string());
        metadata
            .tags
            .insert(self.heuristics.time_of_day(played_at).to_string());
        if artists
            .iter()
            .filter_map(|a| a["id"].as_str())
            .any(|id| top.contains(id))
        {
            metadata.tags.insert("top_artist".to_string());
        }

        NormalizedRecord::new(
            format!("track:{track_id}:{played_at_raw}"),
            MemoryType::Track,
            title,
            track["album"]["name"].as_str().unwrap_or_default(),
            played_at,
            metadata,
            play.clone(),
        )
    }

    fn playlist_record(&self, playlist: &Value, fetched_at: DateTime<Utc>) -> Result<NormalizedRecord> {
        let id = playlist["id"]
            .as_str()
            .ok_or_else(|| Error::Transform("playlist has no id".to_string()))?;
        let description = playlist["description"].as_str().unwrap_or_default();

        let mut metadata = MemoryMetadata::default();
        metadata.categories.insert("music".to_string());
        metadata.tags.insert("playlist".to_string());
        if playlist["collaborative"].as_bool() == Some(true) {
            metadata.tags.insert("collaborative".to_string());
        }
        if let Some(owner) = playlist["owner"]["display_name"].as_str() {
            metadata.people.insert(owner.to_string());
        }

        NormalizedRecord::new(
            format!("playlist:{id}"),
            MemoryType::Playlist,
            playlist["name"].as_str().unwrap_or(id),
            description,
            fetched_at,
            metadata,
            playlist.clone(),
        )
    }

    fn top_artists_record(&self, entry: &Value, fetched_at: DateTime<Utc>) -> Result<NormalizedRecord> {
        let range = entry["time_range"]
            .as_str()
            .ok_or_else(|| Error::Transform("top artists entry has no time_range".to_string()))?;
        let names: Vec<&str> = entry["items"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|a| a["name"].as_str())
            .collect();

        let mut metadata = MemoryMetadata::default();
        metadata.categories.insert("music".to_string());
        metadata.tags.insert("top_artists".to_string());
        metadata.tags.insert(range.to_string());

        NormalizedRecord::new(
            format!("top_artists:{range}"),
            MemoryType::Event,
            format!("Top artists ({})", range.replace('_', " ")),
            names.join(", "),
            fetched_at,
            metadata,
            entry.clone(),
        )
    }
}

#[async_trait]
impl ProviderConnector for SpotifyConnector {
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
        let base = format!("{}/v1/me", self.config.api_base_url.trim_end_matches('/'));
        let limits = FetchLimits {
            page_size: options.page_size.min(MAX_PAGE),
            max_items: Some(options.max_items),
        };

        let recent = ctx
            .fetcher
            .fetch_all(
                PageEndpoint::new(
                    format!("{base}/player/recently-played"),
                    "/items",
                    "limit",
                    Continuation::next_url(),
                )
                .with_query("after", options.since.timestamp_millis().to_string()),
                limits,
            )
            .await?;

        let playlists = ctx
            .fetcher
            .fetch_all(
                PageEndpoint::new(
                    format!("{base}/playlists"),
                    "/items",
                    "limit",
                    Continuation::next_url(),
                ),
                limits,
            )
            .await?;

        let mut top = Vec::with_capacity(TIME_RANGES.len());
        for range in TIME_RANGES {
            let body = ctx
                .fetcher
                .client()
                .get_json(
                    &format!("{base}/top/artists"),
                    &[
                        ("time_range".to_string(), range.to_string()),
                        ("limit".to_string(), TOP_ARTIST_LIMIT.to_string()),
                    ],
                )
                .await?;
            let items = body["items"].as_array().cloned().unwrap_or_default();
            top.push(json!({ "time_range": range, "items": items }));
        }
        tracing::info!(
            tracks = recent.len(),
            playlists = playlists.len(),
            "spotify fetch complete"
        );

        Ok(RawBundle::new()
            .with_dataset(RECENT, recent)
            .with_dataset(PLAYLISTS, playlists)
            .with_dataset(TOP_ARTISTS, top)
            .with_lookup(FETCHED_AT, Value::String(ctx.now.to_rfc3339())))
    }

    fn transform_to_memories(&self, bundle: &RawBundle) -> Transformed {
        let mut out = Transformed::default();
        let fetched_at = bundle
            .lookup(FETCHED_AT)
            .and_then(Value::as_str)
            .and_then(parse_time);

        let top: BTreeSet<String> = bundle
            .dataset(TOP_ARTISTS)
            .iter()
            .flat_map(|entry| entry["items"].as_array().into_iter().flatten())
            .filter_map(|a| a["id"].as_str().map(str::to_string))
            .collect();

        for play in bundle.dataset(RECENT) {
            out.push(play["track"]["id"].as_str(), self.track_record(play, &top));
        }

        // Playlists and rankings carry no timestamp of their own.
        let undated = || Error::Transform("bundle has no fetched_at".to_string());
        for playlist in bundle.dataset(PLAYLISTS) {
            let record = fetched_at
                .ok_or_else(undated)
                .and_then(|at| self.playlist_record(playlist, at));
            out.push(playlist["id"].as_str(), record);
        }
        for entry in bundle.dataset(TOP_ARTISTS) {
            let record = fetched_at
                .ok_or_else(undated)
                .and_then(|at| self.top_artists_record(entry, at));
            out.push(entry["time_range"].as_str(), record);
        }
        out
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
