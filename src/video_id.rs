//! Recognises the YouTube URL shapes the web form accepts.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Failure, Outcome};

/// Any 11-character id following `v=` or a path separator, used only once the
/// two explicit shapes did not match.
const FALLBACK_PATTERN: &str = r"(?:v=|/)([0-9A-Za-z_-]{11})";
const VALID_ID_PATTERN: &str = r"^[0-9A-Za-z_-]+$";

static FALLBACK_RE: OnceLock<Regex> = OnceLock::new();
static VALID_ID_RE: OnceLock<Regex> = OnceLock::new();

fn fallback_re() -> &'static Regex {
    FALLBACK_RE.get_or_init(|| Regex::new(FALLBACK_PATTERN).unwrap())
}

fn valid_id_re() -> &'static Regex {
    VALID_ID_RE.get_or_init(|| Regex::new(VALID_ID_PATTERN).unwrap())
}

/// Extracts the video id from `youtu.be/<id>` or `...v=<id>` URLs, falling
/// back to `/shorts/<id>`-like paths on YouTube hosts.
pub fn extract_video_id(url: &str) -> Outcome<String> {
    let url = url.trim();

    let candidate = if let Some((_, rest)) = url.split_once("youtu.be/") {
        rest.split(['?', '&', '#', '/']).next()
    } else if let Some((_, rest)) = url.split_once("v=") {
        rest.split(['&', '#']).next()
    } else {
        None
    };

    if let Some(id) = candidate
        && valid_id_re().is_match(id)
    {
        return Ok(id.to_owned());
    }

    if is_youtube_host(url)
        && let Some(caps) = fallback_re().captures(url)
    {
        return Ok(caps[1].to_owned());
    }

    Err(Failure::invalid_url())
}

/// Canonical watch URL handed to every upstream call.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Thumbnail URL used when no metadata source supplied one.
pub fn default_thumbnail(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{video_id}/maxresdefault.jpg")
}

fn is_youtube_host(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("youtube.com/") || lower.contains("youtube-nocookie.com/")
}
