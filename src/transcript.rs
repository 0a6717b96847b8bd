//! Transcript retrieval, selection, and formatting.
//!
//! The transcript backend is a best-effort HTTP surface: the watch page
//! advertises the caption tracks available for a video, and each track's
//! timed-text URL serves the cues. Both steps can fail in ways the Data API
//! never does, so this module owns its own negative cache (videos known to
//! have no usable transcript), positive cache, throttling, and a single
//! retry for transport errors. A missing transcript is an outcome, not an
//! error: ingestion degrades instead of failing.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::BoundedLru;
use crate::cache_registry::{priority, CacheRegistry};
use crate::config::Config;
use crate::error::IngestError;
use crate::models::TranscriptText;
use crate::text::format_timestamp;

/// Why a video has no usable transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptMissKind {
    /// The video advertises no caption tracks.
    NoTranscript,
    /// Captions are disabled or the video is blocked in this region.
    Disabled,
    /// The backend could not be reached; not negatively cached.
    Transport,
}

pub type TranscriptOutcome = std::result::Result<TranscriptText, TranscriptMissKind>;

/// One caption cue: start, duration, text.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub text: String,
}

/// A caption track advertised by the watch page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// `"asr"` marks auto-generated tracks.
    #[serde(default)]
    pub kind: Option<String>,
}

impl CaptionTrack {
    pub fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

#[derive(Debug, Deserialize)]
struct TimedTextResponse {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs")]
    start_ms: Option<u64>,
    #[serde(rename = "dDurationMs")]
    duration_ms: Option<u64>,
    #[serde(default)]
    segs: Vec<TimedTextSegment>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSegment {
    #[serde(default)]
    utf8: String,
}

static CAPTION_TRACKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""captionTracks"\s*:\s*(\[.*?\])"#).unwrap());

static PLAYABILITY_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""playabilityStatus"\s*:\s*\{\s*"status"\s*:\s*"([A-Z_]+)""#).unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct TranscriptSource {
    http: Client,
    base_url: String,
    semaphore: Arc<Semaphore>,
    limiter: DirectLimiter,
    positive_cache: Arc<BoundedLru<String, TranscriptText>>,
    negative_cache: Arc<BoundedLru<String, TranscriptMissKind>>,
}

impl TranscriptSource {
    pub fn new(config: &Config) -> Result<Self, IngestError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("youtubingest/{}", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|e| IngestError::Internal(format!("HTTP client build failed: {e}")))?;

        // Minimum spacing between backend requests to avoid upstream blocks.
        let spacing = Duration::from_millis(config.min_delay_ms.max(1));
        let quota = Quota::with_period(spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::new(4).expect("4 > 0")));

        Ok(Self {
            http,
            base_url: config.transcript_base_url.trim_end_matches('/').to_string(),
            semaphore: Arc::new(Semaphore::new(config.transcript_concurrency.max(1))),
            limiter: RateLimiter::direct(quota),
            positive_cache: Arc::new(BoundedLru::new(
                config.cache_capacity_transcripts,
                Some(Duration::from_secs(config.transcript_cache_ttl_seconds)),
            )),
            negative_cache: Arc::new(BoundedLru::new(
                config.cache_capacity_transcripts,
                Some(Duration::from_secs(config.transcript_negative_ttl_seconds)),
            )),
        })
    }

    pub fn register_caches(&self, registry: &CacheRegistry) {
        registry.register("transcripts", priority::TRANSCRIPTS, self.positive_cache.clone());
        registry.register(
            "transcript_misses",
            priority::TRANSCRIPTS,
            self.negative_cache.clone(),
        );
    }

    /// Fetches and formats the best transcript for `video_id`.
    ///
    /// `preferred_languages` is an ordered preference list; the first match
    /// wins (see [`select_track`]). Results and definitive misses are cached.
    pub async fn fetch(
        &self,
        video_id: &str,
        interval_seconds: u32,
        preferred_languages: &[String],
    ) -> TranscriptOutcome {
        let cache_key = positive_key(video_id, interval_seconds, preferred_languages);

        if let Some(hit) = self.positive_cache.get(&cache_key) {
            debug!(video_id, "Transcript cache hit");
            return Ok(hit);
        }
        if let Some(miss) = self.negative_cache.get(&video_id.to_string()) {
            debug!(video_id, ?miss, "Transcript negative cache hit");
            return Err(miss);
        }

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(TranscriptMissKind::Transport),
        };

        let outcome = self
            .fetch_uncached(video_id, interval_seconds, preferred_languages)
            .await;

        match &outcome {
            Ok(transcript) => {
                self.positive_cache.put(cache_key, transcript.clone());
            }
            Err(kind @ (TranscriptMissKind::NoTranscript | TranscriptMissKind::Disabled)) => {
                self.negative_cache.put(video_id.to_string(), *kind);
            }
            Err(TranscriptMissKind::Transport) => {
                // Transient; leave uncached so a later request can retry.
            }
        }

        outcome
    }

    async fn fetch_uncached(
        &self,
        video_id: &str,
        interval_seconds: u32,
        preferred_languages: &[String],
    ) -> TranscriptOutcome {
        let tracks = self.list_tracks(video_id).await?;
        info!(video_id, tracks = tracks.len(), "Caption tracks listed");

        let track = match select_track(&tracks, preferred_languages) {
            Some(track) => track.clone(),
            None => return Err(TranscriptMissKind::NoTranscript),
        };
        debug!(
            video_id,
            language = %track.language_code,
            generated = track.is_generated(),
            "Selected caption track"
        );

        let cues = self.fetch_cues(&track).await?;
        if cues.is_empty() {
            return Err(TranscriptMissKind::NoTranscript);
        }

        Ok(TranscriptText {
            language: track.language_code.clone(),
            formatted_text: format_cues(&cues, interval_seconds),
        })
    }

    async fn list_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>, TranscriptMissKind> {
        let url = format!("{}/watch?v={}&hl=en", self.base_url, video_id);
        let body = self.get_text(&url).await?;

        if let Some(tracks_json) = CAPTION_TRACKS.captures(&body).and_then(|c| c.get(1)) {
            let tracks: Vec<CaptionTrack> =
                serde_json::from_str(tracks_json.as_str()).map_err(|e| {
                    warn!(video_id, error = %e, "Failed to decode caption track list");
                    TranscriptMissKind::NoTranscript
                })?;
            if !tracks.is_empty() {
                return Ok(tracks);
            }
        }

        // No track list. Distinguish "no captions" from "video unavailable".
        let status = PLAYABILITY_STATUS
            .captures(&body)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        if status.is_empty() || status == "OK" {
            Err(TranscriptMissKind::NoTranscript)
        } else {
            debug!(video_id, status = %status, "Playability blocks captions");
            Err(TranscriptMissKind::Disabled)
        }
    }

    async fn fetch_cues(&self, track: &CaptionTrack) -> Result<Vec<Cue>, TranscriptMissKind> {
        let separator = if track.base_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}fmt=json3", track.base_url, separator);
        let body = self.get_text(&url).await?;

        let response: TimedTextResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "Failed to decode timed-text response");
            TranscriptMissKind::NoTranscript
        })?;

        Ok(response
            .events
            .into_iter()
            .filter_map(|event| {
                let text = event
                    .segs
                    .iter()
                    .map(|s| s.utf8.as_str())
                    .collect::<String>();
                let text = WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned();
                if text.is_empty() {
                    return None;
                }
                Some(Cue {
                    start_seconds: event.start_ms.unwrap_or(0) as f64 / 1000.0,
                    duration_seconds: event.duration_ms.unwrap_or(0) as f64 / 1000.0,
                    text,
                })
            })
            .collect())
    }

    /// GET with throttling and one retry on transport failure.
    async fn get_text(&self, url: &str) -> Result<String, TranscriptMissKind> {
        for attempt in 0..2 {
            self.limiter.until_ready().await;

            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .text()
                        .await
                        .map_err(|_| TranscriptMissKind::Transport);
                }
                Ok(response) => {
                    let status = response.status();
                    debug!(url, status = %status, "Transcript backend refused request");
                    return if status.is_client_error() {
                        Err(TranscriptMissKind::Disabled)
                    } else {
                        Err(TranscriptMissKind::Transport)
                    };
                }
                Err(e) if attempt == 0 => {
                    warn!(url, error = %e, "Transcript transport error, retrying once");
                    tokio::time::sleep(Duration::from_millis(250)).await;
                }
                Err(e) => {
                    warn!(url, error = %e, "Transcript transport error");
                    return Err(TranscriptMissKind::Transport);
                }
            }
        }
        Err(TranscriptMissKind::Transport)
    }

    pub fn cache_stats(&self) -> (crate::cache::CacheStats, crate::cache::CacheStats) {
        (self.positive_cache.stats(), self.negative_cache.stats())
    }
}

fn positive_key(video_id: &str, interval: u32, preferred_languages: &[String]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for lang in preferred_languages {
        hasher.update(lang.as_bytes());
        hasher.update([0u8]);
    }
    format!(
        "{video_id}:{interval}:{}",
        hex::encode(&hasher.finalize()[..8])
    )
}

/// Picks the best track for an ordered language preference list.
///
/// Strategy, first match wins:
/// 1. exact language code, manual before generated;
/// 2. base-language match (`en` matches `en-US`), manual before generated —
///    within a family the first track in listing order wins;
/// 3. any manual track, English first;
/// 4. any generated track, English first.
pub fn select_track<'a>(
    tracks: &'a [CaptionTrack],
    preferred_languages: &[String],
) -> Option<&'a CaptionTrack> {
    if tracks.is_empty() {
        return None;
    }

    let manual: Vec<&CaptionTrack> = tracks.iter().filter(|t| !t.is_generated()).collect();
    let generated: Vec<&CaptionTrack> = tracks.iter().filter(|t| t.is_generated()).collect();

    for lang in preferred_languages {
        if let Some(t) = manual.iter().find(|t| t.language_code == *lang) {
            return Some(*t);
        }
        if let Some(t) = generated.iter().find(|t| t.language_code == *lang) {
            return Some(*t);
        }
    }

    let base = |code: &str| code.split('-').next().unwrap_or(code).to_lowercase();
    for lang in preferred_languages {
        let wanted = base(lang);
        if let Some(t) = manual.iter().find(|t| base(&t.language_code) == wanted) {
            return Some(*t);
        }
        if let Some(t) = generated.iter().find(|t| base(&t.language_code) == wanted) {
            return Some(*t);
        }
    }

    if let Some(t) = manual.iter().find(|t| base(&t.language_code) == "en") {
        return Some(*t);
    }
    if let Some(t) = manual.first() {
        return Some(*t);
    }
    if let Some(t) = generated.iter().find(|t| base(&t.language_code) == "en") {
        return Some(*t);
    }
    generated.first().copied()
}

/// Formats cues per the requested interval.
///
/// Interval 0 joins all cue text with single spaces. A positive interval
/// buckets cues by `floor(start / interval) * interval` and emits one
/// `[HH:MM:SS]`-prefixed line per non-empty bucket, suppressing duplicate cue
/// text within a bucket.
pub fn format_cues(cues: &[Cue], interval_seconds: u32) -> String {
    let mut ordered: Vec<&Cue> = cues.iter().filter(|c| !c.text.is_empty()).collect();
    ordered.sort_by(|a, b| {
        a.start_seconds
            .partial_cmp(&b.start_seconds)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if interval_seconds == 0 {
        let joined = ordered
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return WHITESPACE_RUN.replace_all(joined.trim(), " ").into_owned();
    }

    let interval = interval_seconds as u64;
    let mut lines: Vec<String> = Vec::new();
    let mut current_bucket: Option<u64> = None;
    let mut bucket_texts: Vec<String> = Vec::new();

    let flush = |bucket: Option<u64>, texts: &mut Vec<String>, lines: &mut Vec<String>| {
        if let Some(bucket_start) = bucket {
            if !texts.is_empty() {
                lines.push(format!(
                    "[{}] {}",
                    format_timestamp(bucket_start),
                    texts.join(" ")
                ));
            }
        }
        texts.clear();
    };

    for cue in ordered {
        let bucket = (cue.start_seconds.max(0.0) as u64 / interval) * interval;
        if current_bucket != Some(bucket) {
            flush(current_bucket, &mut bucket_texts, &mut lines);
            current_bucket = Some(bucket);
        }
        if !bucket_texts.contains(&cue.text) {
            bucket_texts.push(cue.text.clone());
        }
    }
    flush(current_bucket, &mut bucket_texts, &mut lines);

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64, text: &str) -> Cue {
        Cue {
            start_seconds: start,
            duration_seconds: 2.0,
            text: text.to_string(),
        }
    }

    fn track(lang: &str, generated: bool) -> CaptionTrack {
        CaptionTrack {
            base_url: format!("https://example.com/tt?lang={lang}"),
            language_code: lang.to_string(),
            kind: generated.then(|| "asr".to_string()),
        }
    }

    #[test]
    fn test_format_interval_zero_has_no_timestamps() {
        let cues = vec![cue(0.0, "hello"), cue(5.0, "world")];
        let out = format_cues(&cues, 0);
        assert_eq!(out, "hello world");
        assert!(!out.contains('['));
    }

    #[test]
    fn test_format_buckets_by_floor() {
        let cues = vec![
            cue(0.0, "a"),
            cue(9.9, "b"),
            cue(10.0, "c"),
            cue(25.0, "d"),
        ];
        let out = format_cues(&cues, 10);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines, vec!["[00:00:00] a b", "[00:00:10] c", "[00:00:20] d"]);
    }

    #[test]
    fn test_format_orders_cues_and_dedupes_within_bucket() {
        let cues = vec![
            cue(12.0, "repeat"),
            cue(11.0, "repeat"),
            cue(14.0, "next"),
        ];
        let out = format_cues(&cues, 30);
        assert_eq!(out, "[00:00:00] repeat next");
    }

    #[test]
    fn test_format_empty_buckets_are_skipped() {
        let cues = vec![cue(0.0, "start"), cue(120.0, "later")];
        let out = format_cues(&cues, 60);
        assert_eq!(out, "[00:00:00] start\n[00:02:00] later");
    }

    #[test]
    fn test_select_exact_match_prefers_manual() {
        let tracks = vec![track("en", true), track("en", false), track("fr", false)];
        let selected = select_track(&tracks, &["en".to_string()]).unwrap();
        assert!(!selected.is_generated());
        assert_eq!(selected.language_code, "en");
    }

    #[test]
    fn test_select_base_language_family() {
        let tracks = vec![track("en-US", false), track("en-GB", false)];
        let selected = select_track(&tracks, &["en".to_string()]).unwrap();
        // First track in listing order wins within the family
        assert_eq!(selected.language_code, "en-US");
    }

    #[test]
    fn test_select_falls_back_to_any_manual_then_generated() {
        let tracks = vec![track("de", true), track("pt", false)];
        let selected = select_track(&tracks, &["ja".to_string()]).unwrap();
        assert_eq!(selected.language_code, "pt");

        let only_generated = vec![track("de", true), track("en", true)];
        let selected = select_track(&only_generated, &["ja".to_string()]).unwrap();
        assert_eq!(selected.language_code, "en");
    }

    #[test]
    fn test_select_empty_list() {
        assert!(select_track(&[], &["en".to_string()]).is_none());
    }

    #[test]
    fn test_caption_track_parsing() {
        let json = r#"[{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=en","languageCode":"en","kind":"asr"},{"baseUrl":"https://www.youtube.com/api/timedtext?v=x&lang=fr","languageCode":"fr"}]"#;
        let tracks: Vec<CaptionTrack> = serde_json::from_str(json).unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].is_generated());
        assert!(!tracks[1].is_generated());
    }

    #[test]
    fn test_timed_text_parsing() {
        let json = r#"{"events":[{"tStartMs":0,"dDurationMs":1500,"segs":[{"utf8":"hello "},{"utf8":"there"}]},{"tStartMs":2000,"segs":[{"utf8":"\n"}]}]}"#;
        let resp: TimedTextResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.events.len(), 2);
        assert_eq!(resp.events[0].segs.len(), 2);
    }

    #[test]
    fn test_positive_key_varies_with_preferences() {
        let a = positive_key("dQw4w9WgXcQ", 10, &["en".to_string()]);
        let b = positive_key("dQw4w9WgXcQ", 10, &["fr".to_string()]);
        let c = positive_key("dQw4w9WgXcQ", 0, &["en".to_string()]);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
