//! Input classification.
//!
//! Turns the raw `url_or_query` string into a tagged union describing what
//! the caller named: a video, a playlist, a channel in one of its URL forms,
//! or a free-text search. The probes are ordered and total; URL-shaped input
//! that matches no known YouTube pattern is rejected rather than silently
//! searched.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::error::IngestError;

/// Classification outcome. Channel variants carry the raw identifier still
/// to be resolved to a `UC…` channel ID by the API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Video(String),
    Playlist(String),
    ChannelId(String),
    ChannelHandle(String),
    ChannelCustom(String),
    ChannelUser(String),
    Search(String),
}

static VIDEO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.|m\.)?(?:youtube\.com/(?:watch\?(?:[^#\s]*&)?v=|embed/|shorts/)|youtu\.be/)(?P<id>[A-Za-z0-9_-]{11})",
    )
    .unwrap()
});

static PLAYLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.|m\.)?youtube\.com/(?:playlist|watch)\?(?:[^#\s]*&)?list=(?P<id>[A-Za-z0-9_-]+)",
    )
    .unwrap()
});

static CHANNEL_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.|m\.)?youtube\.com/channel/(?P<id>UC[A-Za-z0-9_-]{22})",
    )
    .unwrap()
});

static CHANNEL_HANDLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.|m\.)?youtube\.com/@(?P<name>[A-Za-z0-9_.-]+)").unwrap()
});

static CHANNEL_CUSTOM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.|m\.)?youtube\.com/c/(?P<name>[A-Za-z0-9_.-]+)").unwrap()
});

static CHANNEL_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.|m\.)?youtube\.com/user/(?P<name>[A-Za-z0-9_.-]+)").unwrap()
});

static RESULTS_SEARCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.|m\.)?youtube\.com/results\?(?:[^#\s]*&)?search_query=(?P<q>[^&\s]+)",
    )
    .unwrap()
});

/// Bare `UC…` channel ID pasted without a URL.
static BARE_CHANNEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^UC[A-Za-z0-9_-]{22}$").unwrap());

/// Something that looks like a URL: scheme, `www.` prefix, or `host.tld/…`.
static URL_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://|www\.)|^\S+\.[a-z]{2,}(?:/|$)").unwrap()
});

fn decode(component: &str) -> String {
    percent_decode_str(&component.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

/// Classifies a trimmed, validated input string.
///
/// The probe order matters: a `watch` URL carrying both `v=` and `list=`
/// classifies as a single video.
pub fn classify(input: &str) -> Result<Classified, IngestError> {
    let cleaned = input.trim();

    if let Some(caps) = VIDEO.captures(cleaned) {
        return Ok(Classified::Video(caps["id"].to_string()));
    }
    if let Some(caps) = PLAYLIST.captures(cleaned) {
        return Ok(Classified::Playlist(caps["id"].to_string()));
    }
    if let Some(caps) = CHANNEL_ID.captures(cleaned) {
        return Ok(Classified::ChannelId(caps["id"].to_string()));
    }
    if let Some(caps) = CHANNEL_HANDLE.captures(cleaned) {
        return Ok(Classified::ChannelHandle(caps["name"].to_string()));
    }
    if let Some(caps) = CHANNEL_CUSTOM.captures(cleaned) {
        return Ok(Classified::ChannelCustom(caps["name"].to_string()));
    }
    if let Some(caps) = CHANNEL_USER.captures(cleaned) {
        return Ok(Classified::ChannelUser(caps["name"].to_string()));
    }
    if let Some(caps) = RESULTS_SEARCH.captures(cleaned) {
        return Ok(Classified::Search(decode(&caps["q"])));
    }

    // Non-URL shorthand forms
    if BARE_CHANNEL_ID.is_match(cleaned) {
        return Ok(Classified::ChannelId(cleaned.to_string()));
    }
    if let Some(handle) = cleaned.strip_prefix('@') {
        if !handle.is_empty() && !handle.contains('/') {
            return Ok(Classified::ChannelHandle(handle.to_string()));
        }
    }

    if URL_SHAPED.is_match(cleaned) {
        return Err(IngestError::InvalidInput(format!(
            "unrecognized URL format: '{}'",
            truncate(cleaned, 100)
        )));
    }

    Ok(Classified::Search(cleaned.to_string()))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
