//! lanzou_drive - A connector for the LanZou cloud drive.
//!
//! The service has no API. Everything goes through its web pages and AJAX
//! endpoints, so this library provides:
//! - A cookie-sharing HTTP session that answers the anti-bot challenge and
//!   retries busy responses
//! - Account login and cookie adoption, with a single shared re-login when
//!   a session expires
//! - Owner listings, and share resolution down to a direct download URL
//! - Folder and file management: mkdir, move, rename, remove, upload
//!
//! # Example
//!
//! ```no_run
//! use lanzou_drive::{DriverConfig, LanzouDriver, SessionOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DriverConfig::from_file("lanzou.toml")?;
//!     let cancel = CancellationToken::new();
//!     let driver = LanzouDriver::init(config, SessionOptions::default(), &cancel).await?;
//!
//!     for entry in driver.list(&driver.root(), &cancel).await? {
//!         println!("{}", entry);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod challenge;
pub mod config;
pub mod cookies;
pub mod driver;
pub mod error;
pub mod http;
pub mod listing;
pub mod models;
pub mod parser;
pub mod session;
pub mod share;
pub mod singleflight;
pub mod url_parser;

// Re-exports for convenience
pub use auth::{Authenticator, Tokens};
pub use challenge::{ChallengeOutcome, ChallengeSolver, PermuteXorSolver};
pub use config::{AuthMode, ConfigStore, DriverConfig, FileConfigStore};
pub use driver::LanzouDriver;
pub use error::{DriveError, ErrorKind, Result};
pub use http::{HttpSession, PageResponse, Profile, RequestSpec, RetryPolicy};
pub use models::{DriveObject, LinkResource, ListedEntry, ResolvedFile, ShareTarget};
pub use session::{Session, SessionOptions};
pub use share::{ShareContent, ShareResolver};
pub use url_parser::extract_share_id;
