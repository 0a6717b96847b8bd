//! YouTube Data API v3 client.
//!
//! Wraps the five list endpoints the engine needs (`channels.list`,
//! `playlists.list`, `playlistItems.list`, `videos.list`, `search.list`) with:
//! - per-endpoint quota accounting (search costs 100 units a page, the list
//!   endpoints 1),
//! - response caching keyed by a deterministic parameter fingerprint,
//! - exponential backoff with jitter for transient failures,
//! - a circuit breaker that fails fast on exhausted quota,
//! - minimum inter-request spacing with jitter to stay off rate limits.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, NaiveDate, Utc};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Jitter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::BoundedLru;
use crate::cache_registry::{priority, CacheRegistry};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, FailureKind};
use crate::config::Config;
use crate::error::{IngestError, Result};

/// Published per-endpoint quota unit costs.
pub mod cost {
    pub const VIDEOS_LIST: u64 = 1;
    pub const CHANNELS_LIST: u64 = 1;
    pub const PLAYLISTS_LIST: u64 = 1;
    pub const PLAYLIST_ITEMS_LIST: u64 = 1;
    pub const SEARCH_LIST: u64 = 100;
    #[allow(dead_code)]
    pub const CAPTIONS_LIST: u64 = 50;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    #[serde(default)]
    errors: Vec<ApiErrorItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApiErrorItem {
    reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    id: String,
    snippet: Option<ChannelSnippet>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChannelSnippet {
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Clone, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistListResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistSnippet {
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItemEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlaylistItemEntry {
    snippet: Option<PlaylistItemSnippet>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    published_at: Option<DateTime<Utc>>,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchItem {
    id: Option<SearchItemId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<RawVideo>,
}

/// A video resource as returned by `videos.list`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVideo {
    pub id: String,
    pub snippet: RawSnippet,
    #[serde(default)]
    pub content_details: Option<RawContentDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSnippet {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_title: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub live_broadcast_content: Option<String>,
    pub default_language: Option<String>,
    pub default_audio_language: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContentDetails {
    pub duration: Option<String>,
}

// ---------------------------------------------------------------------------
// Client-facing value types
// ---------------------------------------------------------------------------

/// A channel reference as extracted from the input URL, pre-resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Id(String),
    Handle(String),
    Custom(String),
    User(String),
}

#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    pub channel_id: String,
    pub title: String,
    pub uploads_playlist_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PlaylistMetadata {
    pub title: String,
}

/// One decoded page of a playlist listing.
#[derive(Debug, Clone)]
struct PlaylistPage {
    entries: Vec<(String, Option<DateTime<Utc>>)>,
    next_page_token: Option<String>,
}

/// One decoded page of search results.
#[derive(Debug, Clone)]
struct SearchPage {
    video_ids: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApiUsage {
    pub api_calls: u64,
    pub quota_used: u64,
}

#[derive(Debug, Clone)]
pub struct ApiClientStats {
    pub usage: ApiUsage,
    pub circuit_breaker: CircuitBreakerStats,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Inclusive UTC start of a calendar day.
pub fn utc_day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(0, 0, 0)
        .expect("midnight exists for every date")
        .and_utc()
}

/// Inclusive UTC end of a calendar day.
pub fn utc_day_end(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 59)
        .expect("23:59:59 exists for every date")
        .and_utc()
}

/// Deterministic fingerprint of request parameters, used as a cache key.
fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

fn chunk_ids(ids: &[String], batch_size: usize) -> Vec<Vec<String>> {
    ids.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
}

/// Drops duplicate IDs, keeping the first occurrence and the original order.
pub fn dedupe_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct YouTubeApiClient {
    http: Client,
    api_key: String,
    base_url: String,
    config: Arc<Config>,
    breaker: CircuitBreaker,
    limiter: DirectLimiter,
    spacing_jitter: Jitter,
    api_calls: AtomicU64,
    quota_used: AtomicU64,

    resolve_cache: Arc<BoundedLru<String, Option<String>>>,
    channel_meta_cache: Arc<BoundedLru<String, ChannelMetadata>>,
    playlist_meta_cache: Arc<BoundedLru<String, PlaylistMetadata>>,
    playlist_page_cache: Arc<BoundedLru<String, PlaylistPage>>,
    search_page_cache: Arc<BoundedLru<String, SearchPage>>,
    videos_cache: Arc<BoundedLru<String, Vec<RawVideo>>>,
}

impl YouTubeApiClient {
    pub fn new(config: Arc<Config>) -> Result<Self> {
        if config.youtube_api_key.trim().is_empty() {
            return Err(IngestError::ApiConfig(
                "YOUTUBE_API_KEY is not configured".to_string(),
            ));
        }
        if !config.api_key_looks_valid() {
            warn!(
                key = %config.obfuscated_api_key(),
                "API key format validation failed (heuristic check)"
            );
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("youtubingest/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client build failed: {e}")))?;

        let breaker = CircuitBreaker::new(
            "youtube_api",
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                open_duration: Duration::from_secs(config.circuit_breaker_open_secs),
                quota_open_duration: Duration::from_secs(config.circuit_breaker_quota_open_secs),
                ..CircuitBreakerConfig::default()
            },
        );

        // Minimum spacing between upstream calls, with jitter up to the
        // configured maximum delay.
        let spacing = Duration::from_millis(config.min_delay_ms.max(1));
        let quota = Quota::with_period(spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(10).expect("10 > 0")));
        let limiter = RateLimiter::direct(quota);
        let spread = config.max_delay_ms.saturating_sub(config.min_delay_ms);
        let spacing_jitter = Jitter::up_to(Duration::from_millis(spread.max(1)));

        let meta_ttl = Some(Duration::from_secs(config.metadata_cache_ttl_seconds));
        let page_ttl = Some(Duration::from_secs(config.page_cache_ttl_seconds));

        info!(key = %config.obfuscated_api_key(), "YouTube API client initialized");

        Ok(Self {
            http,
            api_key: config.youtube_api_key.trim().to_string(),
            base_url: config.youtube_api_base_url.trim_end_matches('/').to_string(),
            breaker,
            limiter,
            spacing_jitter,
            api_calls: AtomicU64::new(0),
            quota_used: AtomicU64::new(0),
            resolve_cache: Arc::new(BoundedLru::new(config.cache_capacity_resolve, meta_ttl)),
            channel_meta_cache: Arc::new(BoundedLru::new(config.cache_capacity_metadata, meta_ttl)),
            playlist_meta_cache: Arc::new(BoundedLru::new(config.cache_capacity_metadata, meta_ttl)),
            playlist_page_cache: Arc::new(BoundedLru::new(config.cache_capacity_pages, page_ttl)),
            search_page_cache: Arc::new(BoundedLru::new(config.cache_capacity_pages, page_ttl)),
            videos_cache: Arc::new(BoundedLru::new(config.cache_capacity_videos, page_ttl)),
            config,
        })
    }

    /// Registers this client's caches with the process-wide registry.
    pub fn register_caches(&self, registry: &CacheRegistry) {
        registry.register("channel_resolution", priority::METADATA, self.resolve_cache.clone());
        registry.register("channel_metadata", priority::METADATA, self.channel_meta_cache.clone());
        registry.register("playlist_metadata", priority::METADATA, self.playlist_meta_cache.clone());
        registry.register("playlist_pages", priority::LISTING_PAGES, self.playlist_page_cache.clone());
        registry.register("search_pages", priority::LISTING_PAGES, self.search_page_cache.clone());
        registry.register("video_batches", priority::LISTING_PAGES, self.videos_cache.clone());
    }

    pub fn usage(&self) -> ApiUsage {
        ApiUsage {
            api_calls: self.api_calls.load(Ordering::Relaxed),
            quota_used: self.quota_used.load(Ordering::Relaxed),
        }
    }

    pub fn stats(&self) -> ApiClientStats {
        ApiClientStats {
            usage: self.usage(),
            circuit_breaker: self.breaker.stats(),
        }
    }

    fn retry_schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.api_retry_base_delay_ms))
            .with_max_interval(Duration::from_secs(30))
            .with_multiplier(2.0)
            .with_randomization_factor(0.5)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Executes one logical API call with spacing, retries, and the breaker.
    async fn call_api<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        params: Vec<(&'static str, String)>,
        quota_cost: u64,
    ) -> Result<T> {
        if !self.breaker.allow_request() {
            return Err(match self.breaker.open_reason() {
                Some(FailureKind::Quota) => IngestError::QuotaExceeded(
                    "circuit breaker open after upstream quota errors".to_string(),
                ),
                _ => IngestError::ServiceUnavailable(
                    "circuit breaker open for the YouTube API".to_string(),
                ),
            });
        }

        self.limiter
            .until_ready_with_jitter(self.spacing_jitter)
            .await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let mut backoff = self.retry_schedule();
        let max_attempts = self.config.api_retry_attempts + 1;

        for attempt in 1..=max_attempts {
            debug!(endpoint, attempt, "Executing API call");

            let response = self
                .http
                .get(&url)
                .query(&params)
                .query(&[("key", self.api_key.as_str())])
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(e) => {
                    // Transport failure: nothing reached the API, so no
                    // call or quota is recorded.
                    if attempt < max_attempts && (e.is_timeout() || e.is_connect() || e.is_request()) {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(1));
                        warn!(endpoint, attempt, error = %e, "Transport error, will retry");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.breaker.record_failure(FailureKind::Transient);
                    return Err(IngestError::ServiceUnavailable(format!(
                        "request to {endpoint} failed: {e}"
                    )));
                }
            };

            // The request reached the API: it counts against the quota
            // whether it succeeded or not.
            self.api_calls.fetch_add(1, Ordering::Relaxed);
            self.quota_used.fetch_add(quota_cost, Ordering::Relaxed);

            let status = response.status();
            if status.is_success() {
                self.breaker.record_success();
                return response.json::<T>().await.map_err(|e| {
                    IngestError::Internal(format!("failed to decode {endpoint} response: {e}"))
                });
            }

            let body = response.text().await.unwrap_or_default();
            match classify_api_failure(status, &body) {
                ApiFailure::Quota(message) => {
                    self.breaker.record_failure(FailureKind::Quota);
                    return Err(IngestError::QuotaExceeded(message));
                }
                ApiFailure::NotFound(message) => {
                    return Err(IngestError::ResourceNotFound(message));
                }
                ApiFailure::BadRequest(message) => {
                    return Err(IngestError::InvalidInput(message));
                }
                ApiFailure::Auth(message) => {
                    return Err(IngestError::ApiConfig(message));
                }
                ApiFailure::Retryable(message) => {
                    if attempt < max_attempts {
                        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(1));
                        warn!(
                            endpoint,
                            attempt,
                            status = %status,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable upstream error"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.breaker.record_failure(FailureKind::Transient);
                    return Err(IngestError::ServiceUnavailable(message));
                }
            }
        }

        Err(IngestError::Internal(format!(
            "retry loop for {endpoint} exited unexpectedly"
        )))
    }

    // -----------------------------------------------------------------------
    // Channel resolution
    // -----------------------------------------------------------------------

    /// Resolves any channel reference to a canonical `UC…` channel ID.
    ///
    /// Probe order: direct ID passes through; handles use `forHandle`; legacy
    /// `/user/` names use `forUsername`; deprecated `/c/` custom URLs try
    /// handle, then username, then a `search.list type=channel` top hit.
    /// Definitive not-found results are negatively cached.
    pub async fn resolve_channel(&self, reference: &ChannelRef) -> Result<String> {
        match reference {
            ChannelRef::Id(id) => Ok(id.clone()),
            ChannelRef::Handle(name) => self
                .probe_channel("handle", name)
                .await?
                .ok_or_else(|| IngestError::ResourceNotFound(format!("channel @{name} not found"))),
            ChannelRef::User(name) => self
                .probe_channel("user", name)
                .await?
                .ok_or_else(|| {
                    IngestError::ResourceNotFound(format!("channel /user/{name} not found"))
                }),
            ChannelRef::Custom(name) => {
                if let Some(id) = self.probe_channel("handle", name).await? {
                    return Ok(id);
                }
                if let Some(id) = self.probe_channel("user", name).await? {
                    return Ok(id);
                }
                if let Some(id) = self.probe_channel("search", name).await? {
                    return Ok(id);
                }
                Err(IngestError::ResourceNotFound(format!(
                    "channel /c/{name} not found"
                )))
            }
        }
    }

    async fn probe_channel(&self, probe: &'static str, name: &str) -> Result<Option<String>> {
        let cache_key = format!("{probe}:{}", name.to_lowercase());
        if let Some(cached) = self.resolve_cache.get(&cache_key) {
            debug!(probe, name, hit = cached.is_some(), "Channel resolution cache hit");
            return Ok(cached);
        }

        let resolved = match probe {
            "handle" => {
                let handle = if name.starts_with('@') {
                    name.to_string()
                } else {
                    format!("@{name}")
                };
                let resp: ChannelListResponse = self
                    .call_api(
                        "channels",
                        vec![
                            ("part", "id".to_string()),
                            ("forHandle", handle),
                            ("fields", "items(id)".to_string()),
                        ],
                        cost::CHANNELS_LIST,
                    )
                    .await?;
                resp.items.into_iter().next().map(|item| item.id)
            }
            "user" => {
                let resp: ChannelListResponse = self
                    .call_api(
                        "channels",
                        vec![
                            ("part", "id".to_string()),
                            ("forUsername", name.to_string()),
                            ("fields", "items(id)".to_string()),
                        ],
                        cost::CHANNELS_LIST,
                    )
                    .await?;
                resp.items.into_iter().next().map(|item| item.id)
            }
            "search" => {
                let resp: SearchListResponse = self
                    .call_api(
                        "search",
                        vec![
                            ("part", "id".to_string()),
                            ("type", "channel".to_string()),
                            ("q", name.to_string()),
                            ("maxResults", "1".to_string()),
                            ("fields", "items(id/channelId)".to_string()),
                        ],
                        cost::SEARCH_LIST,
                    )
                    .await?;
                resp.items
                    .into_iter()
                    .next()
                    .and_then(|item| item.id)
                    .and_then(|id| id.channel_id)
            }
            other => {
                return Err(IngestError::Internal(format!(
                    "unknown channel probe: {other}"
                )))
            }
        };

        self.resolve_cache.put(cache_key, resolved.clone());
        Ok(resolved)
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub async fn get_channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata> {
        if let Some(cached) = self.channel_meta_cache.get(&channel_id.to_string()) {
            return Ok(cached);
        }

        let resp: ChannelListResponse = self
            .call_api(
                "channels",
                vec![
                    ("part", "snippet,contentDetails".to_string()),
                    ("id", channel_id.to_string()),
                    (
                        "fields",
                        "items(id,snippet/title,contentDetails/relatedPlaylists/uploads)".to_string(),
                    ),
                ],
                cost::CHANNELS_LIST,
            )
            .await?;

        let item = resp.items.into_iter().next().ok_or_else(|| {
            IngestError::ResourceNotFound(format!("channel {channel_id} not found"))
        })?;

        let metadata = ChannelMetadata {
            channel_id: item.id,
            title: item
                .snippet
                .and_then(|s| s.title)
                .unwrap_or_else(|| format!("Channel {channel_id}")),
            uploads_playlist_id: item
                .content_details
                .and_then(|d| d.related_playlists)
                .and_then(|p| p.uploads),
        };

        self.channel_meta_cache
            .put(channel_id.to_string(), metadata.clone());
        Ok(metadata)
    }

    pub async fn get_playlist_metadata(&self, playlist_id: &str) -> Result<PlaylistMetadata> {
        if let Some(cached) = self.playlist_meta_cache.get(&playlist_id.to_string()) {
            return Ok(cached);
        }

        let resp: PlaylistListResponse = self
            .call_api(
                "playlists",
                vec![
                    ("part", "snippet".to_string()),
                    ("id", playlist_id.to_string()),
                    ("fields", "items(snippet/title)".to_string()),
                ],
                cost::PLAYLISTS_LIST,
            )
            .await?;

        let title = resp
            .items
            .into_iter()
            .next()
            .and_then(|item| item.snippet)
            .and_then(|s| s.title)
            .ok_or_else(|| {
                IngestError::ResourceNotFound(format!("playlist {playlist_id} not found"))
            })?;

        let metadata = PlaylistMetadata { title };
        self.playlist_meta_cache
            .put(playlist_id.to_string(), metadata.clone());
        Ok(metadata)
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// Lists video IDs from a playlist in playlist order, filtering by the
    /// optional UTC date window.
    ///
    /// `playlistItems.list` takes no date parameters, so filtering happens in
    /// memory. Uploads playlists arrive newest-first; when that ordering is
    /// observed and items fall before `start_date`, pagination stops early.
    pub async fn list_playlist_video_ids(
        &self,
        playlist_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        max_items: usize,
    ) -> Result<Vec<String>> {
        let start_bound = start_date.map(utc_day_start);
        let end_bound = end_date.map(utc_day_end);

        let mut video_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut reverse_chronological = true;
        let mut previous_published: Option<DateTime<Utc>> = None;

        loop {
            let page = self.fetch_playlist_page(playlist_id, page_token.as_deref()).await?;

            let mut stop_early = false;
            for (video_id, published_at) in &page.entries {
                let Some(published_at) = published_at else {
                    continue;
                };

                if let Some(prev) = previous_published {
                    if *published_at > prev {
                        reverse_chronological = false;
                    }
                }
                previous_published = Some(*published_at);

                if let Some(start) = start_bound {
                    if *published_at < start {
                        if reverse_chronological {
                            // Everything after this point is older still.
                            stop_early = true;
                            break;
                        }
                        continue;
                    }
                }
                if let Some(end) = end_bound {
                    if *published_at > end {
                        continue;
                    }
                }

                video_ids.push(video_id.clone());
                if video_ids.len() >= max_items {
                    stop_early = true;
                    break;
                }
            }

            if stop_early {
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            playlist_id,
            count = video_ids.len(),
            "Finished listing playlist video IDs"
        );
        Ok(video_ids)
    }

    async fn fetch_playlist_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
    ) -> Result<PlaylistPage> {
        let cache_key = fingerprint(&["playlistItems", playlist_id, page_token.unwrap_or("")]);
        if let Some(cached) = self.playlist_page_cache.get(&cache_key) {
            debug!(playlist_id, page_token, "Playlist page cache hit");
            return Ok(cached);
        }

        let mut params = vec![
            ("part", "snippet".to_string()),
            ("playlistId", playlist_id.to_string()),
            ("maxResults", self.config.metadata_batch_size.to_string()),
            (
                "fields",
                "items(snippet(publishedAt,resourceId/videoId)),nextPageToken".to_string(),
            ),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let resp: PlaylistItemsResponse = self
            .call_api("playlistItems", params, cost::PLAYLIST_ITEMS_LIST)
            .await?;

        let page = PlaylistPage {
            entries: resp
                .items
                .into_iter()
                .filter_map(|item| {
                    let snippet = item.snippet?;
                    let video_id = snippet.resource_id?.video_id?;
                    Some((video_id, snippet.published_at))
                })
                .collect(),
            next_page_token: resp.next_page_token,
        };

        self.playlist_page_cache.put(cache_key, page.clone());
        Ok(page)
    }

    /// Searches for video IDs, paginating sequentially until `max_items`.
    pub async fn search_video_ids(
        &self,
        query: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        max_items: usize,
    ) -> Result<Vec<String>> {
        if max_items == 0 {
            return Ok(Vec::new());
        }

        let published_after = start_date
            .map(|d| utc_day_start(d).to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
        let published_before = end_date
            .map(|d| utc_day_end(d).to_rfc3339_opts(chrono::SecondsFormat::Secs, true));

        let mut video_ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let remaining = max_items - video_ids.len();
            let page_size = remaining.min(50);

            let cache_key = fingerprint(&[
                "search",
                query,
                published_after.as_deref().unwrap_or(""),
                published_before.as_deref().unwrap_or(""),
                &page_size.to_string(),
                page_token.as_deref().unwrap_or(""),
            ]);

            let page = if let Some(cached) = self.search_page_cache.get(&cache_key) {
                debug!(query, page_token, "Search page cache hit");
                cached
            } else {
                let mut params = vec![
                    ("part", "id".to_string()),
                    ("type", "video".to_string()),
                    ("q", query.to_string()),
                    ("maxResults", page_size.to_string()),
                    ("fields", "items(id/videoId),nextPageToken".to_string()),
                ];
                if let Some(after) = &published_after {
                    params.push(("publishedAfter", after.clone()));
                }
                if let Some(before) = &published_before {
                    params.push(("publishedBefore", before.clone()));
                }
                if let Some(token) = &page_token {
                    params.push(("pageToken", token.clone()));
                }

                let resp: SearchListResponse =
                    self.call_api("search", params, cost::SEARCH_LIST).await?;
                let page = SearchPage {
                    video_ids: resp
                        .items
                        .into_iter()
                        .filter_map(|item| item.id.and_then(|id| id.video_id))
                        .collect(),
                    next_page_token: resp.next_page_token,
                };
                self.search_page_cache.put(cache_key, page.clone());
                page
            };

            video_ids.extend(page.video_ids.iter().cloned());
            if video_ids.len() >= max_items {
                video_ids.truncate(max_items);
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(query, count = video_ids.len(), "Search completed");
        Ok(video_ids)
    }

    // -----------------------------------------------------------------------
    // Video details
    // -----------------------------------------------------------------------

    /// Fetches raw video records for `ids`, batching requests in groups of at
    /// most `metadata_batch_size`. Output preserves the input ID order;
    /// private or deleted videos are simply absent.
    pub async fn get_videos(&self, ids: &[String]) -> Result<Vec<RawVideo>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let unique = dedupe_preserving_order(ids.to_vec());
        let mut by_id: HashMap<String, RawVideo> = HashMap::with_capacity(unique.len());

        for batch in chunk_ids(&unique, self.config.metadata_batch_size) {
            let cache_key = fingerprint(
                &std::iter::once("videos")
                    .chain(batch.iter().map(|s| s.as_str()))
                    .collect::<Vec<_>>(),
            );

            let items = if let Some(cached) = self.videos_cache.get(&cache_key) {
                debug!(batch_len = batch.len(), "Video batch cache hit");
                cached
            } else {
                let resp: VideoListResponse = self
                    .call_api(
                        "videos",
                        vec![
                            ("part", "snippet,contentDetails".to_string()),
                            ("id", batch.join(",")),
                            (
                                "fields",
                                "items(id,snippet(title,description,channelId,channelTitle,publishedAt,defaultLanguage,defaultAudioLanguage,tags,liveBroadcastContent),contentDetails/duration)"
                                    .to_string(),
                            ),
                        ],
                        cost::VIDEOS_LIST,
                    )
                    .await?;
                self.videos_cache.put(cache_key, resp.items.clone());
                resp.items
            };

            for item in items {
                by_id.insert(item.id.clone(), item);
            }
        }

        Ok(unique.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

enum ApiFailure {
    Quota(String),
    NotFound(String),
    BadRequest(String),
    Auth(String),
    Retryable(String),
}

fn classify_api_failure(status: StatusCode, body: &str) -> ApiFailure {
    let detail: Option<ApiErrorDetail> = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.error);
    let reason = detail
        .as_ref()
        .and_then(|d| d.errors.first())
        .and_then(|e| e.reason.clone())
        .unwrap_or_default();
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| format!("upstream returned {status}"));

    match status {
        StatusCode::FORBIDDEN => {
            if reason.contains("quota")
                || reason == "dailyLimitExceeded"
                || reason == "servingLimitExceeded"
                || message.to_lowercase().contains("quota")
            {
                ApiFailure::Quota(message)
            } else {
                ApiFailure::Auth(message)
            }
        }
        StatusCode::UNAUTHORIZED => ApiFailure::Auth(message),
        StatusCode::NOT_FOUND => ApiFailure::NotFound(message),
        StatusCode::BAD_REQUEST => ApiFailure::BadRequest(message),
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::REQUEST_TIMEOUT => ApiFailure::Retryable(message),
        _ => ApiFailure::Retryable(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_table() {
        assert_eq!(cost::SEARCH_LIST, 100);
        assert_eq!(cost::VIDEOS_LIST, 1);
        assert_eq!(cost::CHANNELS_LIST, 1);
        assert_eq!(cost::PLAYLISTS_LIST, 1);
        assert_eq!(cost::PLAYLIST_ITEMS_LIST, 1);
    }

    #[test]
    fn test_fingerprint_determinism() {
        let a = fingerprint(&["search", "rust", "token1"]);
        let b = fingerprint(&["search", "rust", "token1"]);
        let c = fingerprint(&["search", "rust", "token2"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        // Separator keeps ["ab", "c"] distinct from ["a", "bc"]
        assert_ne!(fingerprint(&["ab", "c"]), fingerprint(&["a", "bc"]));
    }

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(
            utc_day_start(date).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2024-01-31T00:00:00Z"
        );
        assert_eq!(
            utc_day_end(date).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2024-01-31T23:59:59Z"
        );
    }

    #[test]
    fn test_dedupe_preserving_order() {
        let ids = vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
            "c".to_string(),
            "b".to_string(),
        ];
        assert_eq!(dedupe_preserving_order(ids), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_chunking() {
        let ids: Vec<String> = (0..120).map(|i| i.to_string()).collect();
        let chunks = chunk_ids(&ids, 50);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 50);
        assert_eq!(chunks[2].len(), 20);
    }

    #[test]
    fn test_classify_quota_failure() {
        let body = r#"{"error":{"code":403,"message":"The request cannot be completed because you have exceeded your quota.","errors":[{"reason":"quotaExceeded"}]}}"#;
        assert!(matches!(
            classify_api_failure(StatusCode::FORBIDDEN, body),
            ApiFailure::Quota(_)
        ));
    }

    #[test]
    fn test_classify_auth_failure() {
        let body = r#"{"error":{"code":403,"message":"API key not valid.","errors":[{"reason":"forbidden"}]}}"#;
        assert!(matches!(
            classify_api_failure(StatusCode::FORBIDDEN, body),
            ApiFailure::Auth(_)
        ));
    }

    #[test]
    fn test_classify_not_found_and_retryable() {
        assert!(matches!(
            classify_api_failure(StatusCode::NOT_FOUND, "{}"),
            ApiFailure::NotFound(_)
        ));
        assert!(matches!(
            classify_api_failure(StatusCode::SERVICE_UNAVAILABLE, ""),
            ApiFailure::Retryable(_)
        ));
        assert!(matches!(
            classify_api_failure(StatusCode::BAD_REQUEST, "{}"),
            ApiFailure::BadRequest(_)
        ));
    }

    #[test]
    fn test_video_response_parsing() {
        let json = r#"{
            "items": [{
                "id": "dQw4w9WgXcQ",
                "snippet": {
                    "title": "Test Video",
                    "description": "A description",
                    "channelId": "UC1234567890abcdefghijkl",
                    "channelTitle": "Test Channel",
                    "publishedAt": "2024-01-15T10:00:00Z",
                    "tags": ["a", "b"],
                    "liveBroadcastContent": "none"
                },
                "contentDetails": {"duration": "PT3M33S"}
            }]
        }"#;
        let resp: VideoListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 1);
        let video = &resp.items[0];
        assert_eq!(video.id, "dQw4w9WgXcQ");
        assert_eq!(video.snippet.title, "Test Video");
        assert_eq!(video.snippet.tags, vec!["a", "b"]);
        assert_eq!(
            video.content_details.as_ref().unwrap().duration.as_deref(),
            Some("PT3M33S")
        );
    }

    #[test]
    fn test_playlist_items_parsing() {
        let json = r#"{
            "items": [
                {"snippet": {"publishedAt": "2024-02-01T00:00:00Z", "resourceId": {"videoId": "aaaaaaaaaaa"}}},
                {"snippet": {"resourceId": {}}}
            ],
            "nextPageToken": "CAUQAA"
        }"#;
        let resp: PlaylistItemsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.next_page_token.as_deref(), Some("CAUQAA"));
    }

    #[test]
    fn test_channel_response_parsing() {
        let json = r#"{
            "items": [{
                "id": "UC1234567890abcdefghijkl",
                "snippet": {"title": "NeuralNine"},
                "contentDetails": {"relatedPlaylists": {"uploads": "UU1234567890abcdefghijkl"}}
            }]
        }"#;
        let resp: ChannelListResponse = serde_json::from_str(json).unwrap();
        let item = &resp.items[0];
        assert_eq!(item.id, "UC1234567890abcdefghijkl");
        assert_eq!(
            item.content_details
                .as_ref()
                .unwrap()
                .related_playlists
                .as_ref()
                .unwrap()
                .uploads
                .as_deref(),
            Some("UU1234567890abcdefghijkl")
        );
    }
}
