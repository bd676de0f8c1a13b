//! Video URL helpers
//!
//! Pulls the 11-character video identifier out of YouTube watch, embed and
//! short links, and builds the matching thumbnail URL. Nothing here fails:
//! an unrecognized URL simply has no identifier, and the UI shows it as a
//! plain link.

use once_cell::sync::Lazy;
use regex::Regex;

/// Tried in order; the first match wins
static VIDEO_ID_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // watch?v=<id>, /embed/<id>, /shorts/<id>, youtu.be/<id>
        r"(?:v=|/)([0-9A-Za-z_-]{11})(?:\?|&|/|$)",
        // short links followed by something the first pattern rejects
        r"youtu\.be/([0-9A-Za-z_-]{11})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("Failed to compile regex pattern: {e}")))
    .collect()
});

const THUMBNAIL_HOST: &str = "https://img.youtube.com";

/// Extract the video identifier from a video URL
pub fn extract_video_id(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }

    VIDEO_ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// High-quality thumbnail for a video URL, if the identifier can be found
pub fn derive_thumbnail(url: &str) -> Option<String> {
    extract_video_id(url).map(|id| format!("{}/vi/{}/hqdefault.jpg", THUMBNAIL_HOST, id))
}
