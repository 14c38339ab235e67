//! Session authentication: credential login, cookie adoption and the
//! single-flight re-login used when a session expires mid-operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AuthMode, ConfigStore, DriverConfig};
use crate::error::{DriveError, Result};
use crate::http::{check_error, HttpSession, Profile, RequestSpec};
use crate::parser::{html_json_to_map, remove_notes};
use crate::singleflight::Group;
use crate::url_parser::join_url;

static UID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"uid=([^'"&;]+)"#).expect("Invalid uid regex"));

const LOGIN_KEY: &str = "login";

/// Tokens every owner-side request carries: the account's user id and the
/// page's verification token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens {
    pub uid: String,
    pub vei: String,
}

/// Authenticator for one session.
pub struct Authenticator {
    config: DriverConfig,
    store: Option<Arc<dyn ConfigStore>>,
    /// Bumped on every finished re-login attempt, successful or not.
    generation: AtomicU64,
    /// Outcome of the most recent re-login attempt.
    last_login: Mutex<std::result::Result<(), String>>,
    flight: Group<&'static str, std::result::Result<(), String>>,
}

impl Authenticator {
    pub fn new(config: DriverConfig, store: Option<Arc<dyn ConfigStore>>) -> Self {
        Self {
            config,
            store,
            generation: AtomicU64::new(0),
            last_login: Mutex::new(Ok(())),
            flight: Group::new(),
        }
    }

    /// Login generation. Read it before sending a request and hand it to
    /// [`ensure_authenticated`](Self::ensure_authenticated) if that request
    /// comes back expired.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Log in with account and password.
    ///
    /// A redirect means the cookies already in the store are still valid and
    /// are kept as they are.
    pub async fn login(&self, http: &HttpSession, cancel: &CancellationToken) -> Result<()> {
        let spec = RequestSpec::post(join_url(&self.config.base_url, "/mlogin.php"))
            .field("task", "3")
            .field("uid", self.config.account.as_str())
            .field("pwd", self.config.password.as_str())
            .field("setSessionId", "")
            .field("setSig", "")
            .field("setScene", "")
            .field("setTocen", "")
            .field("formhash", "");

        let response = http
            .execute(&spec, Profile::NoRedirect, cancel)
            .await
            .map_err(|err| match err {
                DriveError::Cancelled => DriveError::Cancelled,
                other => DriveError::LoginFailed(other.to_string()),
            })?;

        if response.is_redirect() {
            debug!(status = response.status, "login redirected, cookies still valid");
            return Ok(());
        }

        if response.status_field() != Some(1) {
            return Err(DriveError::LoginFailed(response.snippet(256)));
        }

        info!(account = %self.config.account, "logged in");
        Ok(())
    }

    /// Merge the configured cookie text into the session's store.
    pub fn adopt_cookie(&self, http: &HttpSession) -> Result<()> {
        let adopted = http
            .cookies()
            .merge_raw(&self.config.base_url, &self.config.cookie)?;
        debug!(adopted, "adopted configured cookies");
        Ok(())
    }

    /// Authenticate according to the configured mode. Url mode needs nothing.
    pub async fn authenticate(&self, http: &HttpSession, cancel: &CancellationToken) -> Result<()> {
        match self.config.mode {
            AuthMode::Account => self.login(http, cancel).await,
            AuthMode::Cookie => self.adopt_cookie(http),
            AuthMode::Url => Ok(()),
        }
    }

    /// Fetch `uid` and `vei` from the drive's index page.
    pub async fn fetch_tokens(
        &self,
        http: &HttpSession,
        cancel: &CancellationToken,
    ) -> Result<Tokens> {
        let spec = RequestSpec::get(join_url(&self.config.base_url, "/mydisk.php"))
            .query("item", "files")
            .query("action", "index");
        let response = http.execute(&spec, Profile::Standard, cancel).await?;
        check_error(&response)?;

        let uid = UID_REGEX
            .captures(&response.body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| DriveError::ParseError("uid variable not find".to_string()))?;

        let html = remove_notes(&response.body);
        let vei = html_json_to_map(&html)?
            .remove("vei")
            .unwrap_or_default();

        debug!(%uid, "fetched session tokens");
        Ok(Tokens { uid, vei })
    }

    /// Make sure the session is logged in after a request issued at
    /// generation `observed` came back expired.
    ///
    /// Concurrent callers share a single login and its outcome. A caller whose
    /// request predates a login attempt that has since finished gets that
    /// attempt's outcome without logging in again.
    pub async fn ensure_authenticated(
        &self,
        http: &HttpSession,
        observed: u64,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.generation() != observed {
            debug!("login attempt already finished since this request");
            return self.last_outcome().map_err(DriveError::LoginFailed);
        }

        let flight = self
            .flight
            .run(LOGIN_KEY, || self.relogin(http, observed));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriveError::Cancelled),
            outcome = flight => outcome,
        };
        outcome.map_err(DriveError::LoginFailed)
    }

    /// The shared login. It runs with its own token so that one caller's
    /// cancellation leaves the others waiting on a live login.
    async fn relogin(&self, http: &HttpSession, observed: u64) -> std::result::Result<(), String> {
        if self.generation() != observed {
            return self.last_outcome();
        }

        warn!(account = %self.config.account, "session expired, logging in again");
        let outcome = match self.login(http, &CancellationToken::new()).await {
            Ok(()) => Ok(()),
            Err(DriveError::LoginFailed(message)) => Err(message),
            Err(other) => Err(other.to_string()),
        };
        if outcome.is_ok() {
            self.persist(http);
        }

        // outcome is stored before the bump so stale callers read this attempt
        *self.last_login.lock().unwrap_or_else(PoisonError::into_inner) = outcome.clone();
        self.generation.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    fn last_outcome(&self) -> std::result::Result<(), String> {
        self.last_login
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hand the refreshed configuration to the host. Failure is logged only.
    fn persist(&self, http: &HttpSession) {
        let Some(store) = &self.store else {
            return;
        };

        let mut snapshot = self.config.clone();
        if let Some(cookie) = http.cookies().export(&self.config.base_url) {
            snapshot.cookie = cookie;
        }
        if let Err(err) = store.save(&snapshot) {
            warn!(error = %err, "failed to persist refreshed configuration");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_regex() {
        let body = r#"<a href="/mydisk.php?item=profile&uid=1234567">me</a>"#;
        let uid = UID_REGEX.captures(body).unwrap().get(1).unwrap().as_str();
        assert_eq!(uid, "1234567");
    }

    #[test]
    fn test_adopt_cookie_merges_into_store() {
        let config = DriverConfig {
            mode: AuthMode::Cookie,
            cookie: "ylogin=42; phpdisk_info=abc".to_string(),
            ..Default::default()
        };
        let auth = Authenticator::new(config.clone(), None);
        let http = HttpSession::new(
            &config.base_url,
            &config.user_agent,
            Arc::new(crate::challenge::PermuteXorSolver::default()),
        )
        .unwrap();

        auth.adopt_cookie(&http).unwrap();
        let exported = http.cookies().export(&config.base_url).unwrap();
        assert!(exported.contains("ylogin=42"));
        assert!(exported.contains("phpdisk_info=abc"));
    }

    #[tokio::test]
    async fn test_stale_generation_skips_login() {
        let config = DriverConfig {
            mode: AuthMode::Account,
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let auth = Authenticator::new(config.clone(), None);
        auth.generation.fetch_add(1, Ordering::SeqCst);
        let http = HttpSession::new(
            &config.base_url,
            &config.user_agent,
            Arc::new(crate::challenge::PermuteXorSolver::default()),
        )
        .unwrap();

        // no server is listening; a login attempt would fail
        auth.ensure_authenticated(&http, 0, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_generation_returns_failed_outcome() {
        let config = DriverConfig {
            mode: AuthMode::Account,
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        };
        let auth = Authenticator::new(config.clone(), None);
        *auth.last_login.lock().unwrap() = Err("账号异常".to_string());
        auth.generation.fetch_add(1, Ordering::SeqCst);
        let http = HttpSession::new(
            &config.base_url,
            &config.user_agent,
            Arc::new(crate::challenge::PermuteXorSolver::default()),
        )
        .unwrap();

        let err = auth
            .ensure_authenticated(&http, 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::LoginFailed(message) if message == "账号异常"));
    }
}
