//! HTTP session client: request profiles, content-driven retry and response
//! validation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, COOKIE, LAST_MODIFIED, LOCATION, REFERER, USER_AGENT,
};
use reqwest::multipart::{Form, Part};
use reqwest::{redirect, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::challenge::{is_challenge, ChallengeOutcome, ChallengeSolver, CHALLENGE_MARKER};
use crate::cookies::{parse_url, CookieStore};
use crate::error::{DriveError, Result};

/// JSON status code: the server is busy, try again.
pub const STATUS_BUSY: i64 = 4;
/// JSON status code: the login cookie has expired.
pub const STATUS_EXPIRED: i64 = 9;

/// Uploads are slow on the service side.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest body excerpt carried in an error message.
pub const SNIPPET_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Head,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

/// Which configured client carries a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Follows redirects, retries on challenge/busy pages.
    Standard,
    /// Like `Standard` but hands 3xx responses back to the caller.
    NoRedirect,
    /// Long timeout, never retried: a retried upload creates a duplicate file.
    Upload,
}

/// File attached to a multipart request.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// A complete description of one request, re-issued verbatim on retry.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Form body; sent as multipart text fields when `upload` is set.
    pub form: BTreeMap<String, String>,
    pub headers: Vec<(String, String)>,
    /// Per-request cookies, sent alongside the jar's but never stored.
    pub cookies: Vec<(String, String)>,
    #[serde(skip)]
    pub upload: Option<UploadPart>,
}

impl RequestSpec {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            form: BTreeMap::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            upload: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(key.into(), value.into());
        self
    }

    /// Replace the form body with a scraped parameter map.
    pub fn form(mut self, form: BTreeMap<String, String>) -> Self {
        self.form = form;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    pub fn upload(mut self, part: UploadPart) -> Self {
        self.upload = Some(part);
        self
    }
}

/// Bounded retry for challenge and busy responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            wait: Duration::from_millis(200),
            max_wait: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_retries,
            wait,
            max_wait,
        }
    }

    /// Wait before retry number `attempt + 1`: doubling, capped at `max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.wait.saturating_mul(factor).min(self.max_wait)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    Challenge,
    Busy,
}

fn retry_reason(response: &PageResponse) -> Option<RetryReason> {
    if is_challenge(&response.body) {
        Some(RetryReason::Challenge)
    } else if response.status_field() == Some(STATUS_BUSY) {
        Some(RetryReason::Busy)
    } else {
        None
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl PageResponse {
    /// The `zt` status field when the body is a JSON object carrying one.
    pub fn status_field(&self) -> Option<i64> {
        json_object(&self.body).and_then(|value| status_of(&value))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// A single field of a JSON body, as text.
    pub fn json_field(&self, name: &str) -> Option<String> {
        json_object(&self.body).and_then(|value| value_text(value.get(name)?))
    }

    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn snippet(&self, max_chars: usize) -> String {
        truncate(&self.body, max_chars)
    }
}

fn json_object(body: &str) -> Option<Value> {
    let trimmed = body.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .filter(Value::is_object)
}

/// A present but non-numeric `zt` counts as 0, an unknown code.
fn status_of(value: &Value) -> Option<i64> {
    let zt = value.get("zt")?;
    Some(match zt {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Cut `text` to `max_chars` characters, marking the cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Validate a response body.
///
/// - empty body with HTTP 200: the user agent has been blocked;
/// - `zt` 1, 2, 4: success, the payload may be deserialized;
/// - `zt` 9: the session expired;
/// - any other `zt`: a server error, message from `inf`, `info` or the body.
pub fn check_error(response: &PageResponse) -> Result<()> {
    if response.body.is_empty() && response.status == 200 {
        return Err(DriveError::Blocked);
    }

    let Some(value) = json_object(&response.body) else {
        return Ok(());
    };
    let Some(status) = status_of(&value) else {
        return Ok(());
    };

    match status {
        1 | 2 | STATUS_BUSY => Ok(()),
        STATUS_EXPIRED => Err(DriveError::SessionExpired(error_message(&value, &response.body))),
        _ => Err(DriveError::ApiError(error_message(&value, &response.body))),
    }
}

fn error_message(value: &Value, body: &str) -> String {
    ["inf", "info"]
        .iter()
        .find_map(|key| value.get(*key).and_then(value_text))
        .unwrap_or_else(|| truncate(body, 256))
}

/// What a HEAD request says about a download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
}

impl ProbeInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: HeaderName| headers.get(name).and_then(|value| value.to_str().ok());
        Self {
            size: text(CONTENT_LENGTH).and_then(|value| value.trim().parse().ok()),
            modified: text(LAST_MODIFIED)
                .and_then(|value| DateTime::parse_from_rfc2822(value.trim()).ok())
                .map(|date| date.with_timezone(&Utc)),
        }
    }
}

/// The three request profiles over one cookie store.
pub struct HttpSession {
    standard: Client,
    no_redirect: Client,
    upload: Client,
    cookies: CookieStore,
    solver: Arc<dyn ChallengeSolver>,
    retry: RetryPolicy,
}

impl HttpSession {
    /// Build the clients. Every request carries `Referer: referer` and the
    /// given user agent.
    pub fn new(referer: &str, user_agent: &str, solver: Arc<dyn ChallengeSolver>) -> Result<Self> {
        let cookies = CookieStore::new();

        let mut headers = HeaderMap::new();
        headers.insert(
            REFERER,
            HeaderValue::from_str(referer)
                .map_err(|_| DriveError::InvalidConfig(format!("bad referer: {}", referer)))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|_| DriveError::InvalidConfig(format!("bad user agent: {}", user_agent)))?,
        );

        let builder = || {
            Client::builder()
                .default_headers(headers.clone())
                .cookie_provider(cookies.jar())
        };

        Ok(Self {
            standard: builder().timeout(REQUEST_TIMEOUT).build()?,
            no_redirect: builder()
                .timeout(REQUEST_TIMEOUT)
                .redirect(redirect::Policy::none())
                .build()?,
            upload: builder().timeout(UPLOAD_TIMEOUT).build()?,
            cookies,
            solver,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cookies(&self) -> &CookieStore {
        &self.cookies
    }

    /// Send `spec`, retrying challenge and busy pages within the policy.
    ///
    /// Transport errors are returned immediately. A challenge that survives
    /// every retry is an error; a busy page that does is returned as-is.
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        profile: Profile,
        cancel: &CancellationToken,
    ) -> Result<PageResponse> {
        let budget = match profile {
            Profile::Upload => 0,
            Profile::Standard | Profile::NoRedirect => self.retry.max_retries,
        };

        let mut attempt = 0;
        loop {
            let response = self.send_once(spec, profile, cancel).await?;
            let Some(reason) = retry_reason(&response) else {
                return Ok(response);
            };

            if attempt >= budget {
                return match reason {
                    RetryReason::Challenge => Err(DriveError::ChallengeNotCleared {
                        attempts: attempt + 1,
                    }),
                    RetryReason::Busy => Ok(response),
                };
            }

            if reason == RetryReason::Challenge {
                self.answer_challenge(&spec.url, &response.body);
            }

            let wait = self.retry.backoff(attempt);
            attempt += 1;
            debug!(url = %spec.url, attempt, ?reason, ?wait, "retrying request");
            sleep_or_cancel(wait, cancel).await?;
        }
    }

    /// Retry hook: solve a challenge page and install its cookie for `url`.
    pub fn answer_challenge(&self, url: &str, body: &str) -> ChallengeOutcome {
        if !is_challenge(body) {
            return ChallengeOutcome::NotChallenge;
        }

        let value = match self.solver.solve(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, data = %truncate(body, 256), "challenge left unsolved");
                return ChallengeOutcome::Unsolved;
            }
        };

        match parse_url(url) {
            Ok(url) => {
                self.cookies.install(&url, CHALLENGE_MARKER, &value);
                ChallengeOutcome::Solved
            }
            Err(err) => {
                warn!(error = %err, "cannot scope challenge cookie");
                ChallengeOutcome::Unsolved
            }
        }
    }

    /// Real size and modification time of a download, from a HEAD request.
    ///
    /// Only cancellation is an error; anything else yields empty fields.
    pub async fn head_probe(&self, url: &str, cancel: &CancellationToken) -> Result<ProbeInfo> {
        match self.send_once(&RequestSpec::head(url), Profile::Standard, cancel).await {
            Ok(response) => Ok(ProbeInfo::from_headers(&response.headers)),
            Err(DriveError::Cancelled) => Err(DriveError::Cancelled),
            Err(err) => {
                warn!(error = %err, "HEAD probe failed");
                Ok(ProbeInfo::default())
            }
        }
    }

    async fn send_once(
        &self,
        spec: &RequestSpec,
        profile: Profile,
        cancel: &CancellationToken,
    ) -> Result<PageResponse> {
        let client = match profile {
            Profile::Standard => &self.standard,
            Profile::NoRedirect => &self.no_redirect,
            Profile::Upload => &self.upload,
        };

        let url = parse_url(&spec.url)?;
        let mut builder = client.request(spec.method.into(), url.clone());
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !spec.cookies.is_empty() {
            if let Some(header) = self.cookies.header_with(&url, &spec.cookies) {
                builder = builder.header(COOKIE, header);
            }
        }

        match &spec.upload {
            Some(part) => {
                let mut form = Form::new();
                for (key, value) in &spec.form {
                    form = form.text(key.clone(), value.clone());
                }
                let file = Part::bytes(part.bytes.clone())
                    .file_name(part.file_name.clone())
                    .mime_str(&part.mime)?;
                builder = builder.multipart(form.part(part.field.clone(), file));
            }
            None if !spec.form.is_empty() => builder = builder.form(&spec.form),
            None => {}
        }

        let send = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let body = response.text().await?;
            Ok::<_, DriveError>(PageResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriveError::Cancelled),
            result = send => result,
        }
    }
}

/// Sleep for `wait`, returning early with `Cancelled` if the token fires.
pub async fn sleep_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DriveError::Cancelled),
        _ = tokio::time::sleep(wait) => Ok(()),
    }
}
