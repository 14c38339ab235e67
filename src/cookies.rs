//! Cookie store shared by every HTTP client of one session.

use std::sync::Arc;

use reqwest::cookie::{CookieStore as _, Jar};
use reqwest::header::HeaderValue;
use reqwest::Url;

use crate::error::{DriveError, Result};

/// URL-scoped cookie jar. Safe for concurrent reads and writes; installing a
/// cookie that already exists replaces it.
#[derive(Debug, Clone, Default)]
pub struct CookieStore {
    jar: Arc<Jar>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying jar, for wiring into `reqwest::ClientBuilder::cookie_provider`.
    pub fn jar(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }

    /// Install a single cookie for `url`.
    pub fn install(&self, url: &Url, name: &str, value: &str) {
        let cookie = format!("{}={}; Path=/", name, value);
        self.jar.add_cookie_str(&cookie, url);
    }

    /// Merge caller-supplied cookie text (`a=1; b=2`) into the store for `base_url`.
    ///
    /// Returns the number of cookies adopted.
    pub fn merge_raw(&self, base_url: &str, raw: &str) -> Result<usize> {
        let url = parse_url(base_url)?;
        let mut adopted = 0;
        for (name, value) in parse_cookie_pairs(raw)? {
            self.install(&url, name, value);
            adopted += 1;
        }
        Ok(adopted)
    }

    /// `Cookie` header value the jar would send to `url`.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_string))
    }

    /// `Cookie` header for `url` with per-request cookies appended.
    ///
    /// Per-request cookies are not stored in the jar.
    pub fn header_with(&self, url: &Url, extra: &[(String, String)]) -> Option<HeaderValue> {
        let mut parts: Vec<String> = self.header_for(url).into_iter().collect();
        parts.extend(extra.iter().map(|(name, value)| format!("{}={}", name, value)));
        if parts.is_empty() {
            return None;
        }
        HeaderValue::from_str(&parts.join("; ")).ok()
    }

    /// Cookie text for `base_url`, in the same format [`merge_raw`](Self::merge_raw) accepts.
    pub fn export(&self, base_url: &str) -> Option<String> {
        parse_url(base_url).ok().and_then(|url| self.header_for(&url))
    }
}

/// Split `a=1; b=2` into pairs. Empty segments are skipped; a segment without
/// `=` is an error.
pub fn parse_cookie_pairs(raw: &str) -> Result<Vec<(&str, &str)>> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .split_once('=')
                .map(|(name, value)| (name.trim(), value.trim()))
                .filter(|(name, _)| !name.is_empty())
                .ok_or_else(|| DriveError::InvalidConfig(format!("malformed cookie: {}", segment)))
        })
        .collect()
}

pub(crate) fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|_| DriveError::InvalidUrlOrId(url.to_string()))
}
