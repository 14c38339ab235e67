//! Share resolution: a share id (and password) to either a folder listing or
//! a single file with its direct download URL.
//!
//! ```text
//! fetch page -> classify -> folder branch                -> entries
//!                        \-> file branch -> redirect tail -> resolved file
//! ```

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DriveError, Result};
use crate::http::{sleep_or_cancel, Profile, RequestSpec, SNIPPET_LEN};
use crate::models::{
    ConfirmResp, DownloadUrlResp, EntryKind, EntrySource, ListedEntry, ResolvedFile, RespList,
    ShareRow, ShareTarget,
};
use crate::parser::{
    find_download_page, find_file_id, find_file_name, find_js_function, find_size_text,
    find_sub_folders, find_time_text, html_json_to_map, is_file_page, is_password_page,
    remove_js_comments, remove_notes, FILE_MISSING_MARKER, SHARE_CANCELLED_MARKER,
};
use crate::session::Session;
use crate::url_parser::expiration_from_url;

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6";
const DOWN_IP_COOKIE: (&str, &str) = ("down_ip", "1");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    File,
    Folder,
}

/// A fetched, decommented share page.
#[derive(Debug, Clone)]
pub struct SharePage {
    html: String,
    kind: ShareKind,
}

impl SharePage {
    /// Strip comments and classify. Cancelled and missing shares are errors.
    pub fn parse(raw: &str) -> Result<Self> {
        let html = remove_notes(raw);
        if html.contains(SHARE_CANCELLED_MARKER) {
            return Err(DriveError::ShareCancelled);
        }
        if html.contains(FILE_MISSING_MARKER) {
            return Err(DriveError::FileNotExist);
        }

        let kind = if is_file_page(&html) {
            ShareKind::File
        } else {
            ShareKind::Folder
        };
        Ok(Self { html, kind })
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn kind(&self) -> ShareKind {
        self.kind
    }

    /// The page's parameter map, extracted on demand.
    pub fn params(&self) -> Result<BTreeMap<String, String>> {
        html_json_to_map(&self.html)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShareContent {
    Folder(Vec<ListedEntry>),
    File(ResolvedFile),
}

impl ShareContent {
    pub fn into_entries(self) -> Vec<ListedEntry> {
        match self {
            ShareContent::Folder(entries) => entries,
            ShareContent::File(file) => vec![file.to_listed()],
        }
    }
}

pub struct ShareResolver<'a> {
    session: &'a Session,
}

impl<'a> ShareResolver<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub async fn fetch_page(&self, share_id: &str, cancel: &CancellationToken) -> Result<SharePage> {
        let spec = RequestSpec::get(self.session.share_url(share_id));
        let response = self.session.request(&spec, Profile::Standard, cancel).await?;
        SharePage::parse(&response.body)
    }

    /// Resolve a share to whatever it points at.
    pub async fn resolve(
        &self,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> Result<ShareContent> {
        let page = self.fetch_page(&target.share_id, cancel).await?;
        match page.kind() {
            ShareKind::Folder => Ok(ShareContent::Folder(
                self.list_folder(&page, target, cancel).await?,
            )),
            ShareKind::File => Ok(ShareContent::File(
                self.resolve_page_file(&page, target, cancel).await?,
            )),
        }
    }

    /// Resolve a share known to be a single file, down to its direct URL.
    pub async fn resolve_file(
        &self,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> Result<ResolvedFile> {
        let page = self.fetch_page(&target.share_id, cancel).await?;
        self.resolve_page_file(&page, target, cancel).await
    }

    /// Sub-folders linked from the page, then file rows page by page.
    ///
    /// Pages are requested strictly in order with a pause between them; the
    /// first empty page ends the listing.
    async fn list_folder(
        &self,
        page: &SharePage,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListedEntry>> {
        let mut form = page.params()?;
        if form.is_empty() {
            return Err(DriveError::ParseError(
                "share folder page has no parameters".to_string(),
            ));
        }

        // sub-folders are never password protected
        let mut entries: Vec<ListedEntry> = find_sub_folders(page.html())
            .into_iter()
            .map(|(id, name)| ListedEntry {
                id: id.clone(),
                name,
                kind: EntryKind::Folder,
                source: EntrySource::Share,
                share_id: Some(id),
                password: None,
                size: None,
                modified: None,
            })
            .collect();

        form.insert("pwd".to_string(), target.password_or_empty().to_string());
        let url = self.session.share_url("/filemoreajax.php");

        for page_no in 1u32.. {
            form.insert("pg".to_string(), page_no.to_string());
            let spec = RequestSpec::post(url.as_str()).form(form.clone());
            let response = self.session.request(&spec, Profile::Standard, cancel).await?;
            let rows: RespList<ShareRow> = response.json()?;
            if rows.text.is_empty() {
                debug!(share_id = %target.share_id, pages = page_no - 1, "share folder listing done");
                break;
            }

            entries.extend(
                rows.text
                    .into_iter()
                    .map(|row| row.into_listed(target.password.clone())),
            );
            sleep_or_cancel(self.session.page_delay(), cancel).await?;
        }

        Ok(entries)
    }

    async fn resolve_page_file(
        &self,
        page: &SharePage,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> Result<ResolvedFile> {
        let html = remove_js_comments(page.html());

        let (name, staged) = if is_password_page(&html) {
            self.password_download(&html, target, cancel).await?
        } else {
            self.iframe_download(&html, cancel).await?
        };
        let staged = staged.ok_or(DriveError::MissingDownloadUrl)?;
        let url = self.resolve_download_redirect(&staged, cancel).await?;

        Ok(ResolvedFile {
            share_id: target.share_id.clone(),
            password: target.password.clone(),
            name,
            size_text: find_size_text(&html).unwrap_or_default().to_string(),
            time_text: find_time_text(&html).unwrap_or_default().to_string(),
            expires_at: expiration_from_url(&url),
            url,
        })
    }

    /// Password-gated page: the form lives in the `down_p` function.
    async fn password_download(
        &self,
        html: &str,
        target: &ShareTarget,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<String>)> {
        let function = find_js_function(html, "down_p")?;
        let mut form = html_json_to_map(function)?;
        form.insert("p".to_string(), target.password_or_empty().to_string());
        let file_id = find_file_id(function)
            .ok_or_else(|| DriveError::ParseError("not find file id".to_string()))?;

        let resp = self.ajaxm(file_id, form, cancel).await?;
        let name = resp.info_text().unwrap_or_default().to_string();
        Ok((name, resp.download_url()))
    }

    /// Unprotected page: the form lives in the iframe'd download page.
    async fn iframe_download(
        &self,
        html: &str,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<String>)> {
        let path = find_download_page(html)
            .ok_or_else(|| DriveError::ParseError("not find file page param".to_string()))?;
        let spec = RequestSpec::get(self.session.share_url(path));
        let response = self.session.request(&spec, Profile::Standard, cancel).await?;

        let next_page = remove_notes(&response.body);
        let form = html_json_to_map(&next_page)?;
        let file_id = find_file_id(&next_page)
            .ok_or_else(|| DriveError::ParseError("not find file id".to_string()))?;

        let resp = self.ajaxm(file_id, form, cancel).await?;
        let name = find_file_name(html).unwrap_or_default().to_string();
        Ok((name, resp.download_url()))
    }

    async fn ajaxm(
        &self,
        file_id: &str,
        form: BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<DownloadUrlResp> {
        let spec = RequestSpec::post(self.session.share_url("/ajaxm.php"))
            .query("file", file_id)
            .form(form);
        let response = self.session.request(&spec, Profile::Standard, cancel).await?;
        response.json()
    }

    /// Follow a staged download URL to the direct one.
    ///
    /// A redirect carries the URL in `Location`; a 200 is a confirmation page
    /// whose form is posted back to `/ajax.php`.
    pub async fn resolve_download_redirect(
        &self,
        staged: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let spec = RequestSpec::get(staged)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .cookie(DOWN_IP_COOKIE.0, DOWN_IP_COOKIE.1);
        let response = self.session.request(&spec, Profile::NoRedirect, cancel).await?;

        match response.status {
            301 | 302 => response
                .location()
                .filter(|location| !location.is_empty())
                .map(str::to_string)
                .ok_or(DriveError::MissingDownloadUrl),
            200 => {
                let mut form = html_json_to_map(&response.body)?;
                form.insert("el".to_string(), "2".to_string());
                let spec = RequestSpec::post(self.session.share_url("/ajax.php"))
                    .form(form)
                    .cookie(DOWN_IP_COOKIE.0, DOWN_IP_COOKIE.1);
                let confirm: ConfirmResp = self
                    .session
                    .request(&spec, Profile::Standard, cancel)
                    .await?
                    .json()?;
                if confirm.url.is_empty() {
                    Err(DriveError::MissingDownloadUrl)
                } else {
                    Ok(confirm.url)
                }
            }
            status => Err(DriveError::DownloadRejected {
                status,
                len: response.body.len(),
                snippet: response.snippet(SNIPPET_LEN),
            }),
        }
    }
}
