//! Request, response, and internal data types for the ingestion core.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Transcript grouping intervals accepted at the request boundary.
pub const ALLOWED_INTERVALS: &[u32] = &[0, 10, 20, 30, 60];

/// Maximum accepted length of the URL or search term.
pub const MAX_INPUT_LENGTH: usize = 2000;

/// A validated ingestion request.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// YouTube URL (video, playlist, channel) or free-text search term.
    pub url: String,
    #[serde(default = "default_true")]
    pub include_transcript: bool,
    #[serde(default = "default_true")]
    pub include_description: bool,
    /// Seconds to group transcript lines by; 0 means no timestamps.
    #[serde(default = "default_interval")]
    pub transcript_interval: u32,
    /// Filter videos published on or after this UTC date.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Filter videos published on or before this UTC date.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    10
}

impl IngestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            include_transcript: true,
            include_description: true,
            transcript_interval: 10,
            start_date: None,
            end_date: None,
        }
    }

    /// Validates the request against the boundary contract.
    pub fn validate(&self) -> Result<(), IngestError> {
        let trimmed = self.url.trim();
        if trimmed.is_empty() {
            return Err(IngestError::InvalidInput(
                "URL or search term is required".to_string(),
            ));
        }
        if trimmed.len() > MAX_INPUT_LENGTH {
            return Err(IngestError::InvalidInput(format!(
                "URL or search term too long (max {MAX_INPUT_LENGTH} characters)"
            )));
        }
        if !ALLOWED_INTERVALS.contains(&self.transcript_interval) {
            return Err(IngestError::InvalidInput(format!(
                "transcript_interval must be one of {ALLOWED_INTERVALS:?}, got {}",
                self.transcript_interval
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(IngestError::InvalidInput(format!(
                    "start_date {start} is after end_date {end}"
                )));
            }
        }
        Ok(())
    }

    /// Deterministic fingerprint used for in-flight deduplication.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.url.trim().as_bytes());
        hasher.update([
            self.include_transcript as u8,
            self.include_description as u8,
        ]);
        hasher.update(self.transcript_interval.to_le_bytes());
        hasher.update(
            self.start_date
                .map(|d| d.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(
            self.end_date
                .map(|d| d.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        hex::encode(hasher.finalize())
    }
}

/// What the classifier decided the input names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Playlist,
    Channel,
    Search,
}

/// A resolved content source with a display name for the digest header.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedSource {
    pub kind: SourceKind,
    pub canonical_id: String,
    pub display_name: String,
    /// True iff resolving video IDs required `search.list` (100 units/page).
    pub high_quota_cost: bool,
}

/// A selected and formatted transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptText {
    pub language: String,
    pub formatted_text: String,
}

/// One video's metadata and content as it appears in the result.
#[derive(Debug, Clone, Serialize)]
pub struct VideoRecord {
    pub id: String,
    pub title: String,
    pub description_raw: String,
    pub description_clean: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: DateTime<Utc>,
    /// Duration in whole seconds; 0 when unparseable.
    pub duration_seconds: u64,
    pub tags: Vec<String>,
    pub transcript: Option<TranscriptText>,
    /// Position in the order the source yielded this ID.
    pub origin_index: usize,
}

impl VideoRecord {
    pub fn url(&self) -> String {
        format!("https://youtu.be/{}", self.id)
    }
}

/// The final product of one ingest operation.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub source_name: String,
    pub video_count: usize,
    pub digest_text: String,
    pub token_count: usize,
    pub videos: Vec<VideoRecord>,
    pub processing_time_ms: u64,
    pub api_call_count: u64,
    pub api_quota_used: u64,
    pub high_quota_cost: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_input() {
        let req = IngestRequest::new("   ");
        assert!(matches!(req.validate(), Err(IngestError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_input() {
        let req = IngestRequest::new("x".repeat(MAX_INPUT_LENGTH + 1));
        assert!(matches!(req.validate(), Err(IngestError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_bad_interval() {
        let mut req = IngestRequest::new("rust tutorials");
        req.transcript_interval = 15;
        assert!(matches!(req.validate(), Err(IngestError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_dates() {
        let mut req = IngestRequest::new("rust tutorials");
        req.start_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        req.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(matches!(req.validate(), Err(IngestError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_accepts_equal_dates() {
        let mut req = IngestRequest::new("rust tutorials");
        req.start_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        req.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_fingerprint_is_stable_and_flag_sensitive() {
        let req = IngestRequest::new("https://youtu.be/dQw4w9WgXcQ");
        assert_eq!(req.fingerprint(), req.fingerprint());

        let mut other = req.clone();
        other.include_transcript = false;
        assert_ne!(req.fingerprint(), other.fingerprint());

        let mut shifted = req.clone();
        shifted.transcript_interval = 30;
        assert_ne!(req.fingerprint(), shifted.fingerprint());
    }

    #[test]
    fn test_request_defaults_from_json() {
        let req: IngestRequest =
            serde_json::from_str(r#"{"url": "LLM Explained"}"#).unwrap();
        assert!(req.include_transcript);
        assert!(req.include_description);
        assert_eq!(req.transcript_interval, 10);
        assert!(req.start_date.is_none());
    }
}
