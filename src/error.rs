//! Error types for the lanzou_drive crate.

use thiserror::Error;

/// Stable classification of a [`DriveError`], used by hosts to map failures
/// onto their own error model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, DNS or TLS failure. Never retried by this crate.
    Transport,
    /// The anti-bot cookie could not be computed.
    ChallengeUnresolved,
    /// The session cookie is no longer accepted; the only recoverable kind.
    SessionExpired,
    /// The service answered, but refused the operation.
    RemoteRejected,
    /// An expected pattern or payload was missing from a page.
    ParseFailure,
    /// Local configuration or file I/O failed.
    Config,
    /// The operation is not available in the current auth mode.
    Unsupported,
    /// The caller cancelled the operation.
    Cancelled,
}

/// Errors that can occur when talking to the drive service.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("acw_sc__v2 validation error: {0}")]
    ChallengeUnresolved(String),

    #[error("anti-bot challenge still present after {attempts} attempts")]
    ChallengeNotCleared { attempts: u32 },

    #[error("cookie expiration: {0}")]
    SessionExpired(String),

    #[error("login err: {0}")]
    LoginFailed(String),

    #[error("session expired again right after re-login: {0}")]
    ExpiredAfterRelogin(String),

    #[error("page cannot be retrieved, please try using a new user agent")]
    Blocked,

    #[error("file sharing cancellation")]
    ShareCancelled,

    #[error("file does not exist")]
    FileNotExist,

    #[error("error code: {0}")]
    ApiError(String),

    #[error("get download err: code {status} content {len}({snippet})")]
    DownloadRejected {
        status: u16,
        len: usize,
        snippet: String,
    },

    #[error("download url is null")]
    MissingDownloadUrl,

    #[error("failed to parse page: {0}")]
    ParseError(String),

    #[error("failed to parse response JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("invalid URL or ID: {0}")]
    InvalidUrlOrId(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ConfigParseError(#[from] toml::de::Error),

    #[error("failed to write config: {0}")]
    ConfigSerializeError(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("operation cancelled")]
    Cancelled,
}

impl DriveError {
    /// The stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriveError::HttpError(_) => ErrorKind::Transport,
            DriveError::ChallengeUnresolved(_) => ErrorKind::ChallengeUnresolved,
            DriveError::SessionExpired(_) | DriveError::LoginFailed(_) => {
                ErrorKind::SessionExpired
            }
            DriveError::ChallengeNotCleared { .. }
            | DriveError::ExpiredAfterRelogin(_)
            | DriveError::Blocked
            | DriveError::ShareCancelled
            | DriveError::FileNotExist
            | DriveError::ApiError(_)
            | DriveError::DownloadRejected { .. }
            | DriveError::MissingDownloadUrl => ErrorKind::RemoteRejected,
            DriveError::ParseError(_)
            | DriveError::JsonError(_)
            | DriveError::InvalidUrlOrId(_) => ErrorKind::ParseFailure,
            DriveError::IoError(_)
            | DriveError::ConfigParseError(_)
            | DriveError::ConfigSerializeError(_)
            | DriveError::InvalidConfig(_) => ErrorKind::Config,
            DriveError::Unsupported(_) => ErrorKind::Unsupported,
            DriveError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True when the host should treat this as "log in again".
    ///
    /// Login failures count as well, so a first-time login failure takes the
    /// same path as an expiry observed mid-session.
    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::SessionExpired
    }

    /// True only for a server-reported expiry, the one error recovered by
    /// re-login.
    pub fn is_session_expired(&self) -> bool {
        matches!(self, DriveError::SessionExpired(_))
    }
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;
