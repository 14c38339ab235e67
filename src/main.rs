//! lanzou_drive CLI - Browse, share, download and upload on LanZou.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glob::glob;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lanzou_drive::{
    extract_share_id, AuthMode, DriverConfig, FileConfigStore, LanzouDriver, SessionOptions,
};

/// CLI tool for interacting with a LanZou drive or share link.
#[derive(Parser)]
#[command(name = "lanzou_drive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file. Refreshed cookies are written back to it.
    #[arg(long, short = 'c', env = "LANZOU_CONFIG")]
    config: Option<PathBuf>,

    /// Authentication mode, overriding the configuration file.
    #[arg(long = "type", value_parser = parse_mode)]
    mode: Option<AuthMode>,

    #[arg(long, env = "LANZOU_ACCOUNT")]
    account: Option<String>,

    #[arg(long, env = "LANZOU_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Raw browser cookie (`name=value; name2=value2`).
    #[arg(long, env = "LANZOU_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Password of the share opened in url mode.
    #[arg(long, env = "LANZOU_SHARE_PASSWORD")]
    share_password: Option<String>,

    /// Log debug output.
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a folder (or, in url mode, a share).
    List {
        /// Folder ID or share URL; defaults to the configured root.
        folder: Option<String>,
    },

    /// Print the direct download link of a file.
    Link {
        /// File ID, or share URL/ID in url mode.
        file: String,
    },

    /// Show the share link and password of an owned file or folder.
    Share {
        id: String,

        /// The ID names a folder.
        #[arg(long)]
        folder: bool,
    },

    /// Download a file to local filesystem.
    Download {
        /// File ID, or share URL/ID in url mode.
        file: String,

        /// Local destination path (file or directory).
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,
    },

    /// Upload files to a folder.
    Upload {
        /// File patterns to upload (supports glob patterns like *.tar, file_{1,2,3}.txt).
        #[arg(required = true)]
        patterns: Vec<String>,

        /// Destination folder ID; defaults to the configured root.
        #[arg(long, short = 't')]
        to: Option<String>,
    },

    /// Create a folder.
    Mkdir {
        name: String,

        /// Parent folder ID; defaults to the configured root.
        #[arg(long, short = 'p')]
        parent: Option<String>,
    },

    /// Move a file into another folder.
    Mv {
        file: String,

        /// Destination folder ID.
        #[arg(long, short = 't')]
        to: String,
    },

    /// Rename a file.
    Rename { file: String, new_name: String },

    /// Delete a file or folder.
    Rm {
        id: String,

        /// The ID names a folder.
        #[arg(long)]
        folder: bool,
    },
}

fn parse_mode(value: &str) -> std::result::Result<AuthMode, String> {
    match value {
        "account" => Ok(AuthMode::Account),
        "cookie" => Ok(AuthMode::Cookie),
        "url" => Ok(AuthMode::Url),
        other => Err(format!("unknown mode: {} (expected account, cookie or url)", other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "lanzou_drive=debug"
    } else {
        "lanzou_drive=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(&cli)?;
    let mut options = SessionOptions::default();
    if let Some(path) = &cli.config {
        options = options.with_store(Arc::new(FileConfigStore::new(path)));
    }

    // Ctrl-C cancels whatever is in flight
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let driver = LanzouDriver::init(config, options, &cancel)
        .await
        .context("Failed to initialize session")?;

    let result = run(&driver, cli.command, &cancel).await;
    driver.drop_session();
    result
}

fn load_config(cli: &Cli) -> Result<DriverConfig> {
    let mut config = match &cli.config {
        Some(path) => DriverConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => DriverConfig::default(),
    };

    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(account) = &cli.account {
        config.account = account.clone();
    }
    if let Some(password) = &cli.password {
        config.password = password.clone();
    }
    if let Some(cookie) = &cli.cookie {
        config.cookie = cookie.clone();
    }
    if let Some(share_password) = &cli.share_password {
        config.share_password = share_password.clone();
    }
    Ok(config)
}

/// Turn a CLI argument into an id: share URLs are reduced to their id.
fn to_id(driver: &LanzouDriver, arg: &str) -> Result<String> {
    if driver.session().mode() == AuthMode::Url {
        return extract_share_id(arg).with_context(|| format!("Invalid share URL or ID: {}", arg));
    }
    Ok(arg.trim().to_string())
}

async fn run(driver: &LanzouDriver, command: Commands, cancel: &CancellationToken) -> Result<()> {
    match command {
        Commands::List { folder } => {
            let dir = match folder {
                Some(folder) => driver.folder_ref(&to_id(driver, &folder)?),
                None => driver.root(),
            };

            let entries = driver
                .list(&dir, cancel)
                .await
                .with_context(|| format!("Failed to list folder: {}", dir.id))?;

            if entries.is_empty() {
                println!("No files found.");
            } else {
                println!("{:<12} {:>10} {:<5} {:<16} {}", "ID", "SIZE", "TYPE", "TIME", "NAME");
                println!("{}", "-".repeat(80));
                for entry in entries {
                    println!("{}", entry);
                }
            }
        }

        Commands::Link { file } => {
            let file = driver.file_ref(&to_id(driver, &file)?);
            let (link, updated) = driver
                .link(&file, cancel)
                .await
                .with_context(|| format!("Failed to resolve link for: {}", file.id))?;

            println!("{}", link.url);
            if !updated.name.is_empty() {
                eprintln!("name: {}", updated.name);
            }
            if let Some(expiration) = link.expiration {
                eprintln!("expires: {}", expiration.to_rfc3339());
            }
        }

        Commands::Share { id, folder } => {
            let obj = if folder {
                driver.folder_ref(&id)
            } else {
                driver.file_ref(&id)
            };
            let share = driver
                .share_info(&obj, cancel)
                .await
                .with_context(|| format!("Failed to get share info for: {}", id))?;

            println!("url: {}", share.share_url());
            if share.is_protected() {
                println!("password: {}", share.pwd);
            }
        }

        Commands::Download { file, to } => {
            let file = driver.file_ref(&to_id(driver, &file)?);

            // Ensure destination directory exists
            if to.is_dir() || to.to_string_lossy().ends_with('/') {
                std::fs::create_dir_all(&to)
                    .with_context(|| format!("Failed to create directory: {:?}", to))?;
            } else if let Some(parent) = to.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create directory: {:?}", parent))?;
                }
            }

            let (link, updated) = driver
                .link(&file, cancel)
                .await
                .with_context(|| format!("Failed to resolve link for: {}", file.id))?;

            let final_path = if to.is_dir() {
                let name = if updated.name.is_empty() {
                    updated.id.clone()
                } else {
                    updated.name.clone()
                };
                to.join(name)
            } else {
                to
            };

            print!("Downloading {}... ", updated.id);
            let written = driver
                .download(&link, &final_path, cancel)
                .await
                .with_context(|| format!("Failed to download file: {}", updated.id))?;

            println!("OK ({} bytes)", written);
            println!("Saved to: {:?}", final_path);
        }

        Commands::Upload { patterns, to } => {
            let dir = match to {
                Some(to) => driver.folder_ref(&to),
                None => driver.root(),
            };

            // Expand glob patterns
            let mut files_to_upload: Vec<PathBuf> = Vec::new();

            for pattern in &patterns {
                // Handle brace expansion manually for patterns like file_{1,2,3}.txt
                for expanded_pattern in expand_braces(pattern) {
                    let matches: Vec<PathBuf> = glob(&expanded_pattern)
                        .with_context(|| format!("Invalid glob pattern: {}", expanded_pattern))?
                        .filter_map(|r| r.ok())
                        .filter(|p| p.is_file())
                        .collect();

                    if matches.is_empty() {
                        // If no glob matches, treat as literal path
                        let path = PathBuf::from(&expanded_pattern);
                        if path.is_file() {
                            files_to_upload.push(path);
                        } else {
                            eprintln!("Warning: No files matched pattern: {}", expanded_pattern);
                        }
                    } else {
                        files_to_upload.extend(matches);
                    }
                }
            }

            files_to_upload.sort();
            files_to_upload.dedup();

            if files_to_upload.is_empty() {
                anyhow::bail!("No files to upload");
            }

            println!("Uploading {} file(s) to {}...", files_to_upload.len(), dir.id);

            for (idx, file_path) in files_to_upload.iter().enumerate() {
                let filename = file_path
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .into_owned();
                print!("[{}/{}] Uploading {}... ", idx + 1, files_to_upload.len(), filename);

                let bytes = tokio::fs::read(file_path)
                    .await
                    .with_context(|| format!("Failed to read {:?}", file_path))?;

                match driver.put(&dir, &filename, bytes, cancel).await {
                    Ok(entry) => println!("OK ({})", entry.id),
                    Err(e) => {
                        println!("FAILED");
                        eprintln!("  Error: {}", e);
                    }
                }
            }

            println!("Done.");
        }

        Commands::Mkdir { name, parent } => {
            let parent = match parent {
                Some(parent) => driver.folder_ref(&parent),
                None => driver.root(),
            };
            let folder = driver
                .make_dir(&parent, &name, cancel)
                .await
                .with_context(|| format!("Failed to create folder: {}", name))?;
            println!("{}", folder);
        }

        Commands::Mv { file, to } => {
            let moved = driver
                .move_file(&driver.file_ref(&file), &driver.folder_ref(&to), cancel)
                .await
                .with_context(|| format!("Failed to move {} to {}", file, to))?;
            println!("Moved {}", moved.id);
        }

        Commands::Rename { file, new_name } => {
            let renamed = driver
                .rename_file(&driver.file_ref(&file), &new_name, cancel)
                .await
                .with_context(|| format!("Failed to rename {}", file))?;
            println!("Renamed {} to {}", renamed.id, renamed.name);
        }

        Commands::Rm { id, folder } => {
            let obj = if folder {
                driver.folder_ref(&id)
            } else {
                driver.file_ref(&id)
            };
            driver
                .remove(&obj, cancel)
                .await
                .with_context(|| format!("Failed to remove {}", id))?;
            println!("Removed {}", id);
        }
    }

    Ok(())
}

/// Expand brace patterns like file_{1,2,3}.txt into multiple patterns.
fn expand_braces(pattern: &str) -> Vec<String> {
    if let Some(start) = pattern.find('{') {
        if let Some(end) = pattern[start..].find('}') {
            let end = start + end;
            let prefix = &pattern[..start];
            let suffix = &pattern[end + 1..];
            let alternatives = &pattern[start + 1..end];

            return alternatives
                .split(',')
                .flat_map(|alt| {
                    let expanded = format!("{}{}{}", prefix, alt.trim(), suffix);
                    expand_braces(&expanded)
                })
                .collect();
        }
    }

    vec![pattern.to_string()]
}
