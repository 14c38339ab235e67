//! URL helpers: share id extraction, URL joining and signed-link expiry.

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::Url;
use std::sync::LazyLock;

use crate::error::{DriveError, Result};

/// Share links look like `https://<any share host>/<id>`, optionally under `/tp/`.
static SHARE_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/\s]+/(?:tp/)?([a-zA-Z0-9_-]+)/?(?:[?#].*)?$")
        .expect("Invalid share URL regex")
});

/// Valid share id pattern (alphanumeric, underscore, hyphen).
static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("Invalid ID regex"));

/// Query parameter carrying the unix timestamp after which a direct link dies.
const EXPIRATION_PARAM: &str = "e";

/// Extract a share id from a share URL or validate a raw id.
///
/// # Examples
///
/// ```
/// use lanzou_drive::url_parser::extract_share_id;
///
/// let id = extract_share_id("https://wwop.lanzoul.com/iAbc123").unwrap();
/// assert_eq!(id, "iAbc123");
///
/// let id = extract_share_id("b0fkd8a3c").unwrap();
/// assert_eq!(id, "b0fkd8a3c");
/// ```
pub fn extract_share_id(url_or_id: &str) -> Result<String> {
    let trimmed = url_or_id.trim();

    if let Some(captures) = SHARE_URL_REGEX.captures(trimmed) {
        if let Some(id) = captures.get(1) {
            return Ok(id.as_str().to_string());
        }
    }

    if ID_REGEX.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(DriveError::InvalidUrlOrId(url_or_id.to_string()))
}

/// Join a path onto a base URL. Absolute URLs are returned unchanged, so
/// links scraped from a page can be passed through as-is.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Expiration instant encoded in a direct download URL.
///
/// Returns `None` when the URL is unparseable or carries no valid expiry
/// parameter.
pub fn expiration_from_url(url: &str) -> Option<DateTime<Utc>> {
    let parsed = Url::parse(url).ok()?;
    let value = parsed
        .query_pairs()
        .find(|(key, _)| key == EXPIRATION_PARAM)
        .map(|(_, value)| value.into_owned())?;
    let timestamp = value.parse::<i64>().ok()?;
    DateTime::from_timestamp(timestamp, 0)
}
