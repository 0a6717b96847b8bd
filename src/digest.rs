//! Digest assembly.
//!
//! The digest is a deterministic, line-based UTF-8 document built purely from
//! the ordered video records and the request flags. The same inputs always
//! produce byte-identical output.

use chrono::SecondsFormat;

use crate::models::VideoRecord;
use crate::text::format_duration;

/// Builds the digest document.
///
/// Layout: a two-line header naming the source and video count, then one
/// block per video (1-based index), blocks separated by a blank line, with a
/// trailing newline terminating the document.
pub fn build_digest(
    source_name: &str,
    videos: &[VideoRecord],
    include_description: bool,
    include_transcript: bool,
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Source: {source_name}\n"));
    out.push_str(&format!("# Videos: {}\n", videos.len()));

    for (index, video) in videos.iter().enumerate() {
        out.push('\n');
        out.push_str(&format!(
            "=== [{}] {} ({}) ===\n",
            index + 1,
            video.title,
            video.id
        ));
        out.push_str(&format!("URL: {}\n", video.url()));
        out.push_str(&format!("Channel: {}\n", video.channel_title));
        out.push_str(&format!(
            "Published: {}\n",
            video
                .published_at
                .to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
        out.push_str(&format!(
            "Duration: {}\n",
            format_duration(video.duration_seconds)
        ));
        out.push_str(&format!("Tags: {}\n", format_tags(&video.tags)));

        if include_description && !video.description_clean.is_empty() {
            out.push('\n');
            out.push_str("Description:\n");
            out.push_str(&video.description_clean);
            out.push('\n');
        }

        if include_transcript {
            if let Some(transcript) = &video.transcript {
                out.push('\n');
                out.push_str(&format!("Transcript ({}):\n", transcript.language));
                out.push_str(&transcript.formatted_text);
                out.push('\n');
            }
        }
    }

    out
}

fn format_tags(tags: &[String]) -> String {
    if tags.is_empty() {
        "None".to_string()
    } else {
        tags.join(", ")
    }
}
