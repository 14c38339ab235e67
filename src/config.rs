//! Driver configuration and its persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, Result};

pub const DEFAULT_BASE_URL: &str = "https://pc.woozooo.com";
pub const DEFAULT_SHARE_URL: &str = "https://wwop.lanzoul.com";
pub const DEFAULT_ROOT_FOLDER_ID: &str = "-1";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36 Edg/141.0.0.0";

/// How the driver authenticates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Log in with account and password; expired sessions log in again.
    Account,
    /// Adopt a cookie copied from a browser session.
    Cookie,
    /// Anonymous access to a single share link.
    #[default]
    Url,
}

impl AuthMode {
    /// Account and cookie modes see the owner's drive.
    pub fn is_owner(self) -> bool {
        matches!(self, AuthMode::Account | AuthMode::Cookie)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(rename = "type", default)]
    pub mode: AuthMode,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
    /// Raw `name=value; name2=value2` cookie text, valid for about 15 days.
    #[serde(default)]
    pub cookie: String,
    /// Listing root. In url mode this is the share id.
    #[serde(default = "default_root_folder_id")]
    pub root_folder_id: String,
    #[serde(default)]
    pub share_password: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_share_url")]
    pub share_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Replace author-reported size/time with the download's real headers.
    #[serde(default = "default_repair_file_info")]
    pub repair_file_info: bool,
}

fn default_root_folder_id() -> String {
    DEFAULT_ROOT_FOLDER_ID.to_string()
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_share_url() -> String {
    DEFAULT_SHARE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_repair_file_info() -> bool {
    true
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::default(),
            account: String::new(),
            password: String::new(),
            cookie: String::new(),
            root_folder_id: default_root_folder_id(),
            share_password: String::new(),
            base_url: default_base_url(),
            share_url: default_share_url(),
            user_agent: default_user_agent(),
            repair_file_info: default_repair_file_info(),
        }
    }
}

impl DriverConfig {
    /// Load a TOML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: DriverConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Fill blank fields with their defaults.
    pub fn normalize(&mut self) {
        if self.user_agent.trim().is_empty() {
            self.user_agent = default_user_agent();
        }
        if self.root_folder_id.trim().is_empty() {
            self.root_folder_id = default_root_folder_id();
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        self.share_url = self.share_url.trim_end_matches('/').to_string();
    }

    /// Check that the fields the selected mode needs are present.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() || self.share_url.is_empty() {
            return Err(DriveError::InvalidConfig(
                "base_url and share_url are required".to_string(),
            ));
        }
        match self.mode {
            AuthMode::Account if self.account.is_empty() || self.password.is_empty() => Err(
                DriveError::InvalidConfig("account mode needs account and password".to_string()),
            ),
            AuthMode::Cookie if self.cookie.trim().is_empty() => Err(DriveError::InvalidConfig(
                "cookie mode needs a cookie".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Host-provided persistence for the configuration, called after a
/// successful re-login so the refreshed cookie survives a restart.
/// Implementations should not write the password back.
pub trait ConfigStore: Send + Sync {
    fn save(&self, config: &DriverConfig) -> Result<()>;
}

/// Writes the refreshed cookie back to a TOML file.
///
/// An existing file keeps every other field as written, so credentials
/// supplied from the environment or the command line never reach disk. A new
/// file gets the configuration without its password.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn save(&self, config: &DriverConfig) -> Result<()> {
        let snapshot = if self.path.exists() {
            DriverConfig {
                cookie: config.cookie.clone(),
                ..DriverConfig::from_file(&self.path)?
            }
        } else {
            DriverConfig {
                password: String::new(),
                ..config.clone()
            }
        };
        fs::write(&self.path, snapshot.to_toml()?)?;
        Ok(())
    }
}
