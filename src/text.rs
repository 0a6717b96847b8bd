//! Text normalization and formatting helpers.
//!
//! Cleans titles and descriptions before they enter the digest: control and
//! zero-width characters are dropped, promotional trailers are cut, emoji-only
//! lines removed, and whitespace collapsed. URLs inside descriptions are left
//! untouched. Also hosts the ISO 8601 duration parser and the timestamp /
//! duration formatting used by the digest and transcript modules.

use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

static TRAILING_HASHTAGS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\s*#[\w\p{L}]+)+\s*$").unwrap());

static TRAILING_CHANNEL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\|[^|]{1,60}$").unwrap());

/// Promotional trailer lines cut from descriptions. Matched per line,
/// case-insensitively.
static PROMO_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Subscribe call-to-action
        r"(?i)^\s*(?:please\s+)?(?:don'?t forget to\s+)?(?:like[,\s&]+)?(?:and\s+)?subscribe\b.*$",
        r"(?i)^\s*(?:hit|smash)\s+(?:that\s+)?(?:like|subscribe|bell).*$",
        // Social media link lists
        r"(?i)^\s*(?:follow|find|join)\s+(?:me|us)\s+on\b.*$",
        r"(?i)^\s*(?:instagram|twitter|facebook|tiktok|discord|twitch|patreon|linkedin)\s*[:@➜→-].*$",
        // Affiliate markers
        r"(?i)^\s*(?:\*+\s*)?(?:affiliate|sponsored)\s+links?\b.*$",
        r"(?i)^\s*use\s+(?:promo\s+)?code\s+\S+.*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Removes zero-width and control characters, keeping `\t` and `\n`.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            if c == '\t' || c == '\n' {
                return true;
            }
            if c.is_control() {
                return false;
            }
            // Zero-width and BOM-like code points
            !matches!(c, '\u{200B}'..='\u{200F}' | '\u{FEFF}' | '\u{2060}')
        })
        .collect()
}

fn is_emoji_like(c: char) -> bool {
    matches!(c as u32,
        0x1F000..=0x1FAFF   // pictographs, emoticons, symbols
        | 0x2600..=0x27BF   // misc symbols, dingbats
        | 0x2B00..=0x2BFF   // arrows, stars
        | 0x1F1E6..=0x1F1FF // regional indicators
        | 0xFE0E..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
    )
}

/// True when a line consists only of emoji runs (and whitespace).
fn is_emoji_only_line(line: &str) -> bool {
    let mut saw_emoji = false;
    for c in line.chars() {
        if c.is_whitespace() {
            continue;
        }
        if is_emoji_like(c) {
            saw_emoji = true;
        } else {
            return false;
        }
    }
    saw_emoji
}

/// Collapses runs of spaces/tabs within a single line.
fn collapse_line_whitespace(line: &str) -> String {
    WHITESPACE_RUN.replace_all(line.trim(), " ").into_owned()
}

/// Cleans a video title for display in the digest.
///
/// Strips trailing hashtags, a trailing `| Channel Name` suffix, and one
/// enclosing quote pair, then normalizes whitespace.
pub fn clean_title(title: &str) -> String {
    let mut t = collapse_line_whitespace(&strip_control_chars(title).replace('\n', " "));

    t = TRAILING_HASHTAGS.replace(&t, "").trim().to_string();
    t = TRAILING_CHANNEL_SUFFIX.replace(&t, "").trim().to_string();

    // One enclosing quote pair
    for (open, close) in [('"', '"'), ('\u{201C}', '\u{201D}'), ('\'', '\'')] {
        if t.len() >= 2 && t.starts_with(open) && t.ends_with(close) {
            t = t[open.len_utf8()..t.len() - close.len_utf8()].trim().to_string();
            break;
        }
    }

    t
}

/// Cleans a video description for the digest.
///
/// Works line by line: promotional trailer lines and emoji-only lines are
/// dropped, intra-line whitespace is collapsed, and runs of blank lines
/// shrink to a single one. URLs pass through unchanged.
pub fn clean_description(description: &str) -> String {
    let stripped = strip_control_chars(description);

    let mut out: Vec<String> = Vec::new();
    let mut prev_blank = true;
    for raw_line in stripped.lines() {
        let line = collapse_line_whitespace(raw_line);

        if line.is_empty() {
            if !prev_blank {
                out.push(String::new());
                prev_blank = true;
            }
            continue;
        }
        if is_emoji_only_line(&line) {
            continue;
        }
        if PROMO_PATTERNS.iter().any(|p| p.is_match(&line)) {
            continue;
        }

        out.push(line);
        prev_blank = false;
    }

    // Trim trailing blank line
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }

    out.join("\n")
}

/// Parses an ISO 8601 duration (`PT1H2M3S`, `P1DT2H`) into whole seconds.
///
/// Returns 0 for missing, malformed, or zero-length durations, which is also
/// how live streams without a finite duration come out of the API.
pub fn parse_iso8601_duration(input: &str) -> u64 {
    let s = input.trim();
    if !s.starts_with('P') {
        return 0;
    }

    let mut seconds: u64 = 0;
    let mut number = String::new();
    let mut in_time = false;

    for c in s.chars().skip(1) {
        match c {
            'T' => {
                in_time = true;
                number.clear();
            }
            '0'..='9' => number.push(c),
            unit => {
                let value: u64 = match number.parse() {
                    Ok(v) => v,
                    Err(_) => return 0,
                };
                number.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 7 * 86_400,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('M', false) => 30 * 86_400, // months: calendar approximation
                    ('S', true) => 1,
                    ('Y', false) => 365 * 86_400,
                    _ => return 0,
                };
                seconds = seconds.saturating_add(value.saturating_mul(factor));
            }
        }
    }

    if number.is_empty() {
        seconds
    } else {
        // Trailing digits without a unit
        0
    }
}

/// Formats a duration in seconds as `H:MM:SS`, or `M:SS` under one hour.
pub fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Formats a transcript bucket boundary as `HH:MM:SS`.
pub fn format_timestamp(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_title_strips_hashtags_and_suffix() {
        assert_eq!(
            clean_title("Rust in 100 Seconds #rust #programming"),
            "Rust in 100 Seconds"
        );
        assert_eq!(
            clean_title("Understanding Lifetimes | My Channel"),
            "Understanding Lifetimes"
        );
        assert_eq!(clean_title("\"Quoted Title\""), "Quoted Title");
    }

    #[test]
    fn test_clean_title_keeps_interior_pipes() {
        // Only the trailing suffix is cut, not pipes mid-title
        assert_eq!(
            clean_title("A | B | Channel Name"),
            "A | B"
        );
    }

    #[test]
    fn test_clean_title_collapses_whitespace() {
        assert_eq!(clean_title("  too   many\tspaces  "), "too many spaces");
    }

    #[test]
    fn test_clean_description_cuts_promo_lines() {
        let desc = "Great video about Rust.\n\nDon't forget to like and subscribe!\nFollow me on twitter\nInstagram: @someone\n\nReal content continues.";
        let cleaned = clean_description(desc);
        assert!(cleaned.contains("Great video about Rust."));
        assert!(cleaned.contains("Real content continues."));
        assert!(!cleaned.to_lowercase().contains("subscribe"));
        assert!(!cleaned.to_lowercase().contains("instagram"));
    }

    #[test]
    fn test_clean_description_preserves_urls() {
        let desc = "Docs: https://doc.rust-lang.org/book/?utm=x#start";
        assert_eq!(clean_description(desc), desc);
    }

    #[test]
    fn test_clean_description_drops_emoji_only_lines() {
        let desc = "Intro line\n🔥🔥🔥\nBody with one 🔥 emoji kept";
        let cleaned = clean_description(desc);
        assert!(cleaned.contains("Intro line"));
        assert!(cleaned.contains("Body with one 🔥 emoji kept"));
        assert!(!cleaned.contains("🔥🔥🔥"));
    }

    #[test]
    fn test_clean_description_collapses_blank_runs() {
        let desc = "a\n\n\n\nb";
        assert_eq!(clean_description(desc), "a\n\nb");
    }

    #[test]
    fn test_clean_description_strips_zero_width() {
        let desc = "zero\u{200B}width";
        assert_eq!(clean_description(desc), "zerowidth");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_iso8601_duration("PT1M30S"), 90);
        assert_eq!(parse_iso8601_duration("PT2H"), 7200);
        assert_eq!(parse_iso8601_duration("P1DT1H1M1S"), 86_400 + 3661);
        assert_eq!(parse_iso8601_duration("PT0S"), 0);
        assert_eq!(parse_iso8601_duration(""), 0);
        assert_eq!(parse_iso8601_duration("garbage"), 0);
        assert_eq!(parse_iso8601_duration("PT5"), 0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(90), "1:30");
        assert_eq!(format_duration(3600), "1:00:00");
        assert_eq!(format_duration(3723), "1:02:03");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(70), "00:01:10");
        assert_eq!(format_timestamp(3661), "01:01:01");
    }
}
