//! Owner-view listing through `/doupload.php`.
//!
//! Sizes and times in these listings are author-reported and not reliable.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::models::{FileShare, ListedEntry, OwnedEntry, RespInfo, RespList};
use crate::session::{task_form, Session};

pub struct ListingResolver<'a> {
    session: &'a Session,
}

impl<'a> ListingResolver<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Sub-folders of `folder_id` (task 47, a single page).
    pub async fn get_folders(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnedEntry>> {
        let form = task_form([("task", "47"), ("folder_id", folder_id)]);
        let response = self.session.doupload(form, cancel).await?;
        let list: RespList<OwnedEntry> = response.json()?;
        Ok(list.text)
    }

    /// Files of `folder_id` (task 5), page by page until the first empty one.
    pub async fn get_files(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<OwnedEntry>> {
        let mut files = Vec::new();
        for page in 1.. {
            let page_text = page.to_string();
            let form = task_form([("task", "5"), ("folder_id", folder_id), ("pg", page_text.as_str())]);
            let response = self.session.doupload(form, cancel).await?;
            let list: RespList<OwnedEntry> = response.json()?;
            if list.text.is_empty() {
                debug!(folder_id, pages = page - 1, files = files.len(), "file listing done");
                break;
            }
            files.extend(list.text);
        }
        Ok(files)
    }

    /// Folders then files of `folder_id`, fetched concurrently.
    pub async fn get_all(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListedEntry>> {
        let (folders, files) = futures::try_join!(
            self.get_folders(folder_id, cancel),
            self.get_files(folder_id, cancel)
        )?;

        Ok(folders
            .into_iter()
            .chain(files)
            .map(OwnedEntry::into_listed)
            .collect())
    }

    /// Share id and password of an owned file (task 22).
    pub async fn file_share_info(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FileShare> {
        let form = task_form([("task", "22"), ("file_id", file_id)]);
        let response = self.session.doupload(form, cancel).await?;
        let info: RespInfo<FileShare> = response.json()?;
        Ok(info.info)
    }

    /// Share link and password of an owned folder (task 18).
    pub async fn folder_share_info(
        &self,
        folder_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FileShare> {
        let form = task_form([("task", "18"), ("file_id", folder_id)]);
        let response = self.session.doupload(form, cancel).await?;
        let info: RespInfo<FileShare> = response.json()?;
        Ok(info.info)
    }
}
