//! Data models for the drive's JSON envelopes and the structures built from
//! scraped pages.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Extra key: where the entry came from (`"0"` owner listing, `"1"` share page).
pub const EXTRA_TYPE: &str = "type";
/// Extra key: share id used to resolve the entry's download.
pub const EXTRA_SHARE_ID: &str = "fid";
/// Extra key: share password.
pub const EXTRA_SHARE_PWD: &str = "pwd";
/// Extra key: present once size/time were refreshed from a HEAD probe.
pub const EXTRA_REPAIRED: &str = "repair";

/// `{"info": ...}` envelope used by share lookups.
#[derive(Debug, Deserialize)]
pub struct RespInfo<T> {
    pub info: T,
}

/// A list payload. The service sends `0` or `""` instead of `[]` for an
/// exhausted page, which deserializes to an empty list.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct RespList<T> {
    #[serde(default, deserialize_with = "deserialize_lenient_vec")]
    pub text: Vec<T>,
}

fn deserialize_lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(serde::de::Error::custom))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

/// Accepts a JSON string or number and yields it as text.
fn deserialize_loose_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// A file or folder from the owner listing (`doupload.php` tasks 5 and 47).
///
/// Folders carry `fol_id` and `name`; files carry `id` and `name_all`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OwnedEntry {
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_all: String,
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub fol_id: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub time: String,
}

impl OwnedEntry {
    pub fn is_dir(&self) -> bool {
        !self.fol_id.is_empty()
    }

    pub fn into_listed(self) -> ListedEntry {
        let now = Utc::now();
        if self.is_dir() {
            ListedEntry {
                id: self.fol_id,
                name: self.name,
                kind: EntryKind::Folder,
                source: EntrySource::Owner,
                share_id: None,
                password: None,
                size: None,
                modified: None,
            }
        } else {
            ListedEntry {
                id: self.id,
                name: self.name_all,
                kind: EntryKind::File,
                source: EntrySource::Owner,
                share_id: None,
                password: None,
                size: parse_size(&self.size),
                modified: parse_time(&self.time, now),
            }
        }
    }
}

/// Share settings of an owned file or folder (`doupload.php` tasks 18 and 22).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileShare {
    #[serde(default)]
    pub pwd: String,
    /// `"1"` when the share is password protected.
    #[serde(default, deserialize_with = "deserialize_loose_string")]
    pub onof: String,
    #[serde(default)]
    pub is_newd: String,
    /// File shares only.
    #[serde(default)]
    pub f_id: String,
    /// Folder shares only.
    #[serde(default)]
    pub new_url: String,
    #[serde(default)]
    pub name: String,
}

impl FileShare {
    pub fn is_protected(&self) -> bool {
        self.onof == "1"
    }

    /// Full share link for this entry.
    pub fn share_url(&self) -> String {
        if !self.new_url.is_empty() {
            self.new_url.clone()
        } else {
            crate::url_parser::join_url(&self.is_newd, &self.f_id)
        }
    }
}

/// A file row from a shared folder page (`filemoreajax.php`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShareRow {
    pub id: String,
    #[serde(default)]
    pub name_all: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub time: String,
}

impl ShareRow {
    /// Rows inherit the password of the folder they were listed from.
    pub fn into_listed(self, password: Option<String>) -> ListedEntry {
        ListedEntry {
            id: self.id.clone(),
            name: self.name_all,
            kind: EntryKind::File,
            source: EntrySource::Share,
            share_id: Some(self.id),
            password,
            size: parse_size(&self.size),
            modified: parse_time(&self.time, Utc::now()),
        }
    }
}

/// Response of `ajaxm.php`: the staged download URL is assembled from `dom`
/// and `url`; `inf` holds the file name on the password branch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadUrlResp {
    #[serde(default)]
    pub dom: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub inf: Value,
}

impl DownloadUrlResp {
    /// The staged download URL, or `None` when the payload carried no link.
    pub fn download_url(&self) -> Option<String> {
        if self.dom.is_empty() || self.url.is_empty() {
            return None;
        }
        Some(format!("{}/file/{}", self.dom.trim_end_matches('/'), self.url))
    }

    /// `inf` as text; numeric placeholders yield `None`.
    pub fn info_text(&self) -> Option<&str> {
        self.inf.as_str().filter(|s| !s.is_empty())
    }
}

/// Response of the final `ajax.php` confirmation step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfirmResp {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// Which resolver produced an entry; decides how its link is resolved later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    Owner,
    Share,
}

impl EntrySource {
    fn as_extra(self) -> &'static str {
        match self {
            EntrySource::Owner => "0",
            EntrySource::Share => "1",
        }
    }
}

/// An entry produced by the listing or share resolver. Size and time are
/// author-reported and not trustworthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    pub source: EntrySource,
    pub share_id: Option<String>,
    pub password: Option<String>,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl ListedEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn into_object(self) -> DriveObject {
        let mut extra = BTreeMap::new();
        extra.insert(EXTRA_TYPE.to_string(), self.source.as_extra().to_string());
        if let Some(share_id) = self.share_id {
            extra.insert(EXTRA_SHARE_ID.to_string(), share_id);
        }
        if let Some(password) = self.password {
            extra.insert(EXTRA_SHARE_PWD.to_string(), password);
        }
        DriveObject {
            id: self.id,
            name: self.name,
            size: self.size.unwrap_or(0),
            modified: self.modified,
            is_folder: self.kind == EntryKind::Folder,
            extra,
        }
    }
}

/// Caller input naming one share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareTarget {
    pub share_id: String,
    pub password: Option<String>,
}

impl ShareTarget {
    pub fn new(share_id: impl Into<String>, password: Option<String>) -> Self {
        Self {
            share_id: share_id.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }

    pub fn password_or_empty(&self) -> &str {
        self.password.as_deref().unwrap_or("")
    }
}

/// A single shared file resolved down to its direct download URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFile {
    pub share_id: String,
    pub password: Option<String>,
    pub name: String,
    pub size_text: String,
    pub time_text: String,
    pub url: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResolvedFile {
    pub fn size(&self) -> Option<u64> {
        parse_size(&self.size_text)
    }

    pub fn to_listed(&self) -> ListedEntry {
        ListedEntry {
            id: self.share_id.clone(),
            name: self.name.clone(),
            kind: EntryKind::File,
            source: EntrySource::Share,
            share_id: Some(self.share_id.clone()),
            password: self.password.clone(),
            size: self.size(),
            modified: parse_time(&self.time_text, Utc::now()),
        }
    }
}

/// Object handed to the host, mirroring its generic file model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveObject {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_folder: bool,
    /// Driver-private metadata, persisted by the host between calls.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DriveObject {
    pub fn extra_value(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for DriveObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let size_str = if self.is_folder {
            "-".to_string()
        } else {
            format_size(self.size)
        };
        let kind = if self.is_folder { "dir" } else { "file" };
        let time = self
            .modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(f, "{}\t{}\t{}\t{}\t{}", self.id, size_str, kind, time, self.name)
    }
}

/// A direct link handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkResource {
    pub url: String,
    /// Headers the downloader must send for the link to stay valid.
    pub headers: Vec<(String, String)>,
    pub expiration: Option<DateTime<Utc>>,
}

/// Format bytes into human-readable size.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

static SIZE_SPLIT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9.]+)\s*([bkm]+)").expect("Invalid size regex"));

/// Parse the site's size text (`"1.2 M"`, `"500 K"`, `"12 B"`) into bytes.
pub fn parse_size(text: &str) -> Option<u64> {
    let captures = SIZE_SPLIT_REGEX.captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_ascii_uppercase();
    let multiplier = match unit.chars().next()? {
        'B' => 1.0,
        'K' => 1024.0,
        'M' => 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

static TIME_SPLIT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)\s*(秒前|分钟前|小时前|天前)$").expect("Invalid time regex")
});

/// Parse the site's upload time text relative to `now`.
///
/// Handles `N 秒前/分钟前/小时前/天前`, `昨天`, `前天` and `YYYY-MM-DD`.
pub fn parse_time(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(captures) = TIME_SPLIT_REGEX.captures(text) {
        let amount: i64 = captures.get(1)?.as_str().parse().ok()?;
        let delta = match captures.get(2)?.as_str() {
            "秒前" => Duration::seconds(amount),
            "分钟前" => Duration::minutes(amount),
            "小时前" => Duration::hours(amount),
            _ => Duration::days(amount),
        };
        return Some(now - delta);
    }

    match text {
        "昨天" => return Some(now - Duration::days(1)),
        "前天" => return Some(now - Duration::days(2)),
        _ => {}
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
