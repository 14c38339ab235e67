//! An authenticated (or anonymous share-only) session against the drive.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, Tokens};
use crate::challenge::{ChallengeSolver, PermuteXorSolver};
use crate::config::{AuthMode, ConfigStore, DriverConfig};
use crate::error::{DriveError, Result};
use crate::http::{check_error, HttpSession, PageResponse, Profile, RequestSpec, RetryPolicy};
use crate::url_parser::join_url;

/// Pause between share-folder pages.
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_secs(1);

/// Tunables that are not part of the persisted configuration.
#[derive(Clone)]
pub struct SessionOptions {
    pub solver: Arc<dyn ChallengeSolver>,
    pub retry: RetryPolicy,
    pub page_delay: Duration,
    pub store: Option<Arc<dyn ConfigStore>>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            solver: Arc::new(PermuteXorSolver::default()),
            retry: RetryPolicy::default(),
            page_delay: DEFAULT_PAGE_DELAY,
            store: None,
        }
    }
}

impl SessionOptions {
    pub fn with_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = solver;
        self
    }
}

pub struct Session {
    config: DriverConfig,
    http: HttpSession,
    auth: Authenticator,
    tokens: RwLock<Option<Tokens>>,
    page_delay: Duration,
}

impl Session {
    fn build(config: DriverConfig, options: SessionOptions) -> Result<Self> {
        let mut config = config;
        config.normalize();
        config.validate()?;

        let http = HttpSession::new(&config.base_url, &config.user_agent, options.solver)?
            .with_retry_policy(options.retry);
        let auth = Authenticator::new(config.clone(), options.store);

        Ok(Self {
            config,
            http,
            auth,
            tokens: RwLock::new(None),
            page_delay: options.page_delay,
        })
    }

    /// Authenticate per the configured mode and, for owner modes, fetch the
    /// session tokens.
    pub async fn connect(
        config: DriverConfig,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let session = Self::build(config, options)?;
        session.auth.authenticate(&session.http, cancel).await?;

        if session.config.mode.is_owner() {
            let tokens = session.auth.fetch_tokens(&session.http, cancel).await?;
            session.set_tokens(Some(tokens));
        }

        info!(mode = ?session.config.mode, "session ready");
        Ok(session)
    }

    /// Rebuild a session from a stored cookie and tokens without any network
    /// call. Owner modes need `tokens`.
    pub fn resume(config: DriverConfig, options: SessionOptions, tokens: Option<Tokens>) -> Result<Self> {
        let session = Self::build(config, options)?;
        if !session.config.cookie.trim().is_empty() {
            session.auth.adopt_cookie(&session.http)?;
        }
        if session.config.mode.is_owner() && tokens.is_none() {
            return Err(DriveError::InvalidConfig(
                "owner session needs uid and vei".to_string(),
            ));
        }
        session.set_tokens(tokens);
        Ok(session)
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn mode(&self) -> AuthMode {
        self.config.mode
    }

    pub fn http(&self) -> &HttpSession {
        &self.http
    }

    pub fn page_delay(&self) -> Duration {
        self.page_delay
    }

    /// Current tokens; url-mode sessions have none.
    pub fn tokens(&self) -> Result<Tokens> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DriveError::Unsupported("owner operations need account or cookie mode"))
    }

    fn set_tokens(&self, tokens: Option<Tokens>) {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = tokens;
    }

    /// Teardown: forget the tokens. The cookies go with the session itself.
    pub fn clear(&self) {
        self.set_tokens(None);
        debug!("session tokens cleared");
    }

    /// Send a request and validate its body.
    ///
    /// In account mode an expired session triggers one shared re-login and a
    /// single retry; expiring again right after is a hard failure.
    pub async fn request(
        &self,
        spec: &RequestSpec,
        profile: Profile,
        cancel: &CancellationToken,
    ) -> Result<PageResponse> {
        let observed = self.auth.generation();
        match self.send_checked(spec, profile, cancel).await {
            Err(err) if err.is_session_expired() && self.config.mode == AuthMode::Account => {
                warn!(url = %spec.url, "request hit an expired session");
                self.auth
                    .ensure_authenticated(&self.http, observed, cancel)
                    .await?;

                match self.send_checked(spec, profile, cancel).await {
                    Err(DriveError::SessionExpired(message)) => {
                        Err(DriveError::ExpiredAfterRelogin(message))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn send_checked(
        &self,
        spec: &RequestSpec,
        profile: Profile,
        cancel: &CancellationToken,
    ) -> Result<PageResponse> {
        let response = self.http.execute(spec, profile, cancel).await?;
        check_error(&response)?;
        Ok(response)
    }

    /// POST a task form to the owner endpoint `/doupload.php`.
    pub async fn doupload(
        &self,
        form: BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<PageResponse> {
        let tokens = self.tokens()?;
        let spec = RequestSpec::post(self.base_url("/doupload.php"))
            .query("uid", tokens.uid)
            .query("vei", tokens.vei)
            .form(form);
        self.request(&spec, Profile::Standard, cancel).await
    }

    pub fn base_url(&self, path: &str) -> String {
        join_url(&self.config.base_url, path)
    }

    pub fn share_url(&self, path: &str) -> String {
        join_url(&self.config.share_url, path)
    }
}

/// Build a task form from literal pairs.
pub fn task_form<const N: usize>(pairs: [(&str, &str); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
