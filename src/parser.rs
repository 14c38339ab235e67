//! Stateless extraction over share, download and listing pages.
//!
//! The pages are not stable: the same data shows up under several templates.
//! Extractors are kept as ordered, named lists so a new template can be added
//! at the end without changing which pattern wins on existing pages.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::{DriveError, Result};

/// A labeled pattern. The first non-empty capture group is the extracted value.
pub struct Extractor {
    pub name: &'static str,
    pattern: Regex,
}

impl Extractor {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("Invalid extractor regex"),
        }
    }

    /// First non-empty capture of this pattern, or the whole match when the
    /// pattern has no groups.
    pub fn extract<'h>(&self, haystack: &'h str) -> Option<&'h str> {
        let captures = self.pattern.captures(haystack)?;
        if captures.len() == 1 {
            return captures.get(0).map(|m| m.as_str()).filter(|s| !s.is_empty());
        }
        captures
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str())
            .find(|s| !s.is_empty())
    }
}

/// Run extractors in order and return the first hit.
pub fn first_match<'h>(extractors: &[Extractor], haystack: &'h str) -> Option<&'h str> {
    extractors.iter().find_map(|e| e.extract(haystack))
}

/// Display-name templates, in precedence order.
pub static NAME_EXTRACTORS: LazyLock<Vec<Extractor>> = LazyLock::new(|| {
    vec![
        Extractor::new("title", r"<title>(.+?) - 蓝奏云</title>"),
        Extractor::new("filenajax", r#"id="filenajax">(.+?)</div>"#),
        Extractor::new("filename_var", r"var filename = '(.+?)';"),
        Extractor::new("font_size_div", r#"<div style="font-size.+?>([^<>].+?)</div>"#),
        Extractor::new("filethetext", r#"<div class="filethetext".+?>([^<>]+?)</div>"#),
    ]
});

pub static SIZE_EXTRACTOR: LazyLock<Extractor> =
    LazyLock::new(|| Extractor::new("size", r"(?i)大小\W*([0-9.]+\s*[bkm]+)"));

pub static TIME_EXTRACTOR: LazyLock<Extractor> = LazyLock::new(|| {
    Extractor::new("time", r"\d+\s*[秒天分小][钟时]?前|[昨前]天|\d{4}-\d{2}-\d{2}")
});

pub static FILE_ID_EXTRACTOR: LazyLock<Extractor> =
    LazyLock::new(|| Extractor::new("file_id", r"'/ajaxm\.php\?file=(\d+)'"));

pub static DOWNLOAD_PAGE_EXTRACTOR: LazyLock<Extractor> =
    LazyLock::new(|| Extractor::new("iframe_src", r#"<iframe.*?src="(.+?)""#));

static SUB_FOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:folderlink|mbxfolder).+href="/(.+?)"(?:.+filename")?>(.+?)<"#)
        .expect("Invalid sub-folder regex")
});

static FILE_PAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="fileinfo"|id="file"|文件描述"#).expect("Invalid file page regex")
});

static NOTES_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--.*?-->|([^:])//.*|/\*.*?\*/").expect("Invalid comment regex")
});

static DATA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"data[:\s]+(\{[^}]+\})").expect("Invalid data regex"));

static KV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'(.+?)':('?([^' },]*)'?)").expect("Invalid key-value regex")
});

/// Page markers.
pub const SHARE_CANCELLED_MARKER: &str = "取消分享";
pub const FILE_MISSING_MARKER: &str = "文件不存在";
const PASSWORD_MARKERS: [&str; 2] = ["pwdload", "passwddiv"];

/// Remove HTML comments, `//` line comments (not preceded by `:`, so URLs
/// survive) and single-line `/* */` blocks.
pub fn remove_notes(html: &str) -> String {
    NOTES_REGEX
        .replace_all(html, |caps: &Captures| match caps.get(1) {
            Some(kept) => kept.as_str().to_string(),
            None => "\n".to_string(),
        })
        .into_owned()
}

/// Remove JavaScript comments, leaving string literals untouched.
pub fn remove_js_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            } else if c == q || c == '\n' {
                quote = None;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('/', Some('/')) => {
                // line comment: drop up to, not including, the newline
                while let Some(&next) = chars.peek() {
                    if next == '\n' || next == '\r' {
                        break;
                    }
                    chars.next();
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            ('\'', _) | ('"', _) | ('`', _) => {
                quote = Some(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    out
}

/// Full source of `function <name>(...) { ... }` found in `html`.
pub fn find_js_function<'h>(html: &'h str, name: &str) -> Result<&'h str> {
    let declaration = Regex::new(&format!(r"function\s+{}\s*\(", regex::escape(name)))
        .map_err(|err| DriveError::ParseError(err.to_string()))?;
    for m in declaration.find_iter(html) {
        let Some(open) = html[m.end()..].find('{') else {
            continue;
        };
        if let Some(end) = matching_brace_end(html, m.end() + open) {
            return Ok(&html[m.start()..end]);
        }
    }
    Err(DriveError::ParseError(format!("not find {} function", name)))
}

/// Byte offset just past the brace block opening at `from`.
fn matching_brace_end(html: &str, from: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in html[from..].char_indices() {
        match c {
            ' ' if depth == 0 => continue,
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            _ => {}
        }
        if depth == 0 {
            return Some(from + offset + c.len_utf8());
        }
    }
    None
}

/// Flatten the first `data : { ... }` literal of `html` into a parameter map.
///
/// Quoted and numeric values are taken literally; a bare identifier is
/// resolved through its `var` declaration elsewhere in `html`.
pub fn html_json_to_map(html: &str) -> Result<BTreeMap<String, String>> {
    let data = DATA_REGEX
        .captures(html)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| DriveError::ParseError("not find data".to_string()))?;
    Ok(json_to_map(data.as_str(), html))
}

fn json_to_map(data: &str, html: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for caps in KV_REGEX.captures_iter(data) {
        let key = caps.get(1).map_or("", |m| m.as_str());
        let raw = caps.get(2).map_or("", |m| m.as_str());
        let value = caps.get(3).map_or("", |m| m.as_str());

        let resolved = if value.is_empty() || raw.contains('\'') || is_number(raw) {
            value.to_string()
        } else {
            find_js_var(value, html)
        };
        params.insert(key.to_string(), resolved);
    }
    params
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
}

/// Value of `var <name> = ...;` in `html`, empty when undeclared.
///
/// `sasign` is declared three times on some pages; the second declaration is
/// the live one.
fn find_js_var(name: &str, html: &str) -> String {
    let pattern = format!(r#"var {}\s*=\s*['"]?(.+?)['"]?;"#, regex::escape(name));
    let Ok(regex) = Regex::new(&pattern) else {
        return String::new();
    };

    let declarations: Vec<Captures> = regex.captures_iter(html).collect();
    let chosen = if name == "sasign" && declarations.len() == 3 {
        declarations.get(1)
    } else {
        declarations.first()
    };
    chosen
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

/// True when the page describes a single file rather than a folder.
pub fn is_file_page(html: &str) -> bool {
    FILE_PAGE_REGEX.is_match(html)
}

/// True when the page asks for a share password before downloading.
pub fn is_password_page(html: &str) -> bool {
    PASSWORD_MARKERS.iter().any(|marker| html.contains(marker))
}

/// Sub-folder `(share id, label)` pairs linked from a shared folder page.
pub fn find_sub_folders(html: &str) -> Vec<(String, String)> {
    SUB_FOLDER_REGEX
        .captures_iter(html)
        .filter_map(|caps| {
            let id = caps.get(1)?.as_str().to_string();
            let label = caps.get(2)?.as_str().to_string();
            Some((id, label))
        })
        .collect()
}

/// Display name from a share page, trying every name template in order.
pub fn find_file_name(html: &str) -> Option<&str> {
    first_match(&NAME_EXTRACTORS, html)
}

pub fn find_file_id(html: &str) -> Option<&str> {
    FILE_ID_EXTRACTOR.extract(html)
}

pub fn find_download_page(html: &str) -> Option<&str> {
    DOWNLOAD_PAGE_EXTRACTOR.extract(html)
}

pub fn find_size_text(html: &str) -> Option<&str> {
    SIZE_EXTRACTOR.extract(html)
}

pub fn find_time_text(html: &str) -> Option<&str> {
    TIME_EXTRACTOR.extract(html)
}
