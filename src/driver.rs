//! Driver facade: the operations a storage host calls.

use std::collections::BTreeMap;
use std::path::Path;

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::error::{DriveError, Result};
use crate::http::{Profile, RequestSpec, UploadPart};
use crate::listing::ListingResolver;
use crate::models::{
    DriveObject, EntryKind, EntrySource, FileShare, LinkResource, ListedEntry, OwnedEntry,
    RespList, ShareTarget, EXTRA_REPAIRED, EXTRA_SHARE_ID, EXTRA_SHARE_PWD, EXTRA_TYPE,
};
use crate::session::{task_form, Session, SessionOptions};
use crate::share::ShareResolver;

const NOT_IN_URL_MODE: &str = "only available in account or cookie mode";

pub struct LanzouDriver {
    session: Session,
}

impl LanzouDriver {
    /// Connect a new session for `config`.
    pub async fn init(
        config: DriverConfig,
        options: SessionOptions,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let session = Session::connect(config, options, cancel).await?;
        Ok(Self { session })
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Teardown. Tokens are cleared and the cookie store is released with
    /// the session.
    pub fn drop_session(self) {
        self.session.clear();
        debug!("session dropped");
    }

    /// The configured root: a folder id, or the share id in url mode.
    pub fn root(&self) -> DriveObject {
        self.folder_ref(&self.session.config().root_folder_id)
    }

    /// A folder handle for `id`.
    pub fn folder_ref(&self, id: &str) -> DriveObject {
        DriveObject {
            id: id.to_string(),
            name: String::new(),
            size: 0,
            modified: None,
            is_folder: true,
            extra: BTreeMap::new(),
        }
    }

    /// A file handle for `id` carrying the extras [`link`](Self::link) needs:
    /// an owner file id, or a share id in url mode.
    pub fn file_ref(&self, id: &str) -> DriveObject {
        let mut extra = BTreeMap::new();
        if self.session.mode().is_owner() {
            extra.insert(EXTRA_TYPE.to_string(), "0".to_string());
        } else {
            extra.insert(EXTRA_TYPE.to_string(), "1".to_string());
            extra.insert(EXTRA_SHARE_ID.to_string(), id.to_string());
            extra.insert(
                EXTRA_SHARE_PWD.to_string(),
                self.session.config().share_password.clone(),
            );
        }
        DriveObject {
            id: id.to_string(),
            name: String::new(),
            size: 0,
            modified: None,
            is_folder: false,
            extra,
        }
    }

    fn require_owner(&self) -> Result<()> {
        if self.session.mode().is_owner() {
            Ok(())
        } else {
            Err(DriveError::Unsupported(NOT_IN_URL_MODE))
        }
    }

    /// List a directory: the owner's folder, or a share in url mode.
    pub async fn list(
        &self,
        dir: &DriveObject,
        cancel: &CancellationToken,
    ) -> Result<Vec<DriveObject>> {
        let entries = if self.session.mode().is_owner() {
            ListingResolver::new(&self.session)
                .get_all(&dir.id, cancel)
                .await?
        } else {
            let password = Some(self.session.config().share_password.clone());
            let target = ShareTarget::new(dir.id.as_str(), password);
            ShareResolver::new(&self.session)
                .resolve(&target, cancel)
                .await?
                .into_entries()
        };

        Ok(entries.into_iter().map(ListedEntry::into_object).collect())
    }

    /// Resolve a file to a direct link.
    ///
    /// Returns the link and the file updated with anything learned on the
    /// way (share credentials, probed size and time); hosts should persist
    /// the latter.
    pub async fn link(
        &self,
        file: &DriveObject,
        cancel: &CancellationToken,
    ) -> Result<(LinkResource, DriveObject)> {
        let mut updated = file.clone();

        match file.extra_value(EXTRA_TYPE) {
            Some("0") => {
                if file.extra_value(EXTRA_SHARE_ID).unwrap_or_default().is_empty() {
                    let share = ListingResolver::new(&self.session)
                        .file_share_info(&file.id, cancel)
                        .await?;
                    updated.extra.insert(EXTRA_SHARE_ID.to_string(), share.f_id);
                    updated.extra.insert(EXTRA_SHARE_PWD.to_string(), share.pwd);
                }
            }
            Some("1") => {}
            _ => return Err(DriveError::ParseError("file information lost".to_string())),
        }

        let target = ShareTarget::new(
            updated.extra_value(EXTRA_SHARE_ID).unwrap_or_default(),
            updated.extra_value(EXTRA_SHARE_PWD).map(str::to_string),
        );
        let resolved = ShareResolver::new(&self.session)
            .resolve_file(&target, cancel)
            .await?;
        if updated.name.is_empty() {
            updated.name = resolved.name.clone();
        }

        if self.session.config().repair_file_info && !updated.extra.contains_key(EXTRA_REPAIRED) {
            let probe = self.session.http().head_probe(&resolved.url, cancel).await?;
            if let Some(size) = probe.size {
                updated.size = size;
            }
            if probe.modified.is_some() {
                updated.modified = probe.modified;
            }
            updated.extra.insert(EXTRA_REPAIRED.to_string(), String::new());
        }

        let link = LinkResource {
            headers: vec![(
                "User-Agent".to_string(),
                self.session.config().user_agent.clone(),
            )],
            expiration: resolved.expires_at,
            url: resolved.url,
        };
        Ok((link, updated))
    }

    /// Share link and password of an owned file or folder.
    pub async fn share_info(
        &self,
        obj: &DriveObject,
        cancel: &CancellationToken,
    ) -> Result<FileShare> {
        self.require_owner()?;
        let listing = ListingResolver::new(&self.session);
        if obj.is_folder {
            listing.folder_share_info(&obj.id, cancel).await
        } else {
            listing.file_share_info(&obj.id, cancel).await
        }
    }

    pub async fn make_dir(
        &self,
        parent: &DriveObject,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<DriveObject> {
        self.require_owner()?;
        let form = task_form([
            ("task", "2"),
            ("parent_id", parent.id.as_str()),
            ("folder_name", name),
            ("folder_description", ""),
        ]);
        let response = self.session.doupload(form, cancel).await?;
        let id = response
            .json_field("text")
            .ok_or_else(|| DriveError::ParseError("new folder id missing".to_string()))?;

        info!(%id, name, "folder created");
        Ok(ListedEntry {
            id,
            name: name.to_string(),
            kind: EntryKind::Folder,
            source: EntrySource::Owner,
            share_id: None,
            password: None,
            size: None,
            modified: None,
        }
        .into_object())
    }

    /// Move a file into `dst_dir`. Folders cannot be moved.
    pub async fn move_file(
        &self,
        src: &DriveObject,
        dst_dir: &DriveObject,
        cancel: &CancellationToken,
    ) -> Result<DriveObject> {
        self.require_owner()?;
        if src.is_folder {
            return Err(DriveError::Unsupported("moving folders"));
        }
        let form = task_form([
            ("task", "20"),
            ("folder_id", dst_dir.id.as_str()),
            ("file_id", src.id.as_str()),
        ]);
        self.session.doupload(form, cancel).await?;
        Ok(src.clone())
    }

    /// Rename a file. Folders cannot be renamed.
    pub async fn rename_file(
        &self,
        src: &DriveObject,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<DriveObject> {
        self.require_owner()?;
        if src.is_folder {
            return Err(DriveError::Unsupported("renaming folders"));
        }
        let form = task_form([
            ("task", "46"),
            ("file_id", src.id.as_str()),
            ("file_name", new_name),
            ("type", "2"),
        ]);
        self.session.doupload(form, cancel).await?;

        let mut renamed = src.clone();
        renamed.name = new_name.to_string();
        Ok(renamed)
    }

    pub async fn remove(&self, obj: &DriveObject, cancel: &CancellationToken) -> Result<()> {
        self.require_owner()?;
        let form = if obj.is_folder {
            task_form([("task", "3"), ("folder_id", obj.id.as_str())])
        } else {
            task_form([("task", "6"), ("file_id", obj.id.as_str())])
        };
        self.session.doupload(form, cancel).await?;
        Ok(())
    }

    /// Upload `bytes` as `name` into `dst_dir`. Never retried.
    pub async fn put(
        &self,
        dst_dir: &DriveObject,
        name: &str,
        bytes: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<DriveObject> {
        self.require_owner()?;
        let mime = mime_guess::from_path(name)
            .first_or_octet_stream()
            .to_string();

        let spec = RequestSpec::post(self.session.base_url("/html5up.php"))
            .field("task", "1")
            .field("vie", "2")
            .field("ve", "2")
            .field("id", "WU_FILE_0")
            .field("name", name)
            .field("folder_id_bb_n", dst_dir.id.as_str())
            .upload(UploadPart {
                field: "upload_file".to_string(),
                file_name: name.to_string(),
                mime,
                bytes,
            });
        let response = self.session.request(&spec, Profile::Upload, cancel).await?;

        let list: RespList<OwnedEntry> = response.json()?;
        let entry = list
            .text
            .into_iter()
            .next()
            .ok_or_else(|| DriveError::ParseError("upload returned no entry".to_string()))?;
        Ok(entry.into_listed().into_object())
    }

    /// Stream a resolved link into `destination`. Returns the bytes written.
    pub async fn download<P: AsRef<Path>>(
        &self,
        link: &LinkResource,
        destination: P,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let client = reqwest::Client::new();
        let mut request = client.get(&link.url);
        for (name, value) in &link.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriveError::Cancelled),
            response = request.send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriveError::DownloadRejected {
                status: status.as_u16(),
                len: body.len(),
                snippet: crate::http::truncate(&body, crate::http::SNIPPET_LEN),
            });
        }

        let mut file = File::create(destination.as_ref()).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DriveError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        Ok(written)
    }
}
