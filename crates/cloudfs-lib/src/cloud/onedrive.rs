//! OneDrive adapter over Microsoft Graph.
//!
//! Id-addressed like Google Drive. Uploads above 4 MB go through an upload
//! session whose chunks are PUT to a pre-authorized URL in order, each with
//! its `Content-Range`. Graph exposes no recycle-bin API, so the `.Trash`
//! entry is shown but every trash operation is unsupported.

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;

use super::command::RemoteCommand;
use super::oauth_app::OAuthApp;
use super::path_cache::{listing_target, resolve_with, PathCache};
use super::upload::{read_all, read_chunk, source_len, UploadLimits, UploadSource};
use super::{
    check, nested_error_message, normalize_path, parse_time, split_parent, stream_body,
    DiskInfo, Resource, Resources, ServiceClient, TokenSlot,
};
use crate::errors::{unsupported, CloudError, Result};
use crate::http_client::HttpClient;

// ---------------------------------------------------------------------------
// Data models
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "createdDateTime")]
    created: Option<String>,
    #[serde(rename = "lastModifiedDateTime")]
    modified: Option<String>,
    folder: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

#[derive(Debug, Deserialize)]
struct Drive {
    quota: Option<Quota>,
}

#[derive(Debug, Default, Deserialize)]
struct Quota {
    total: Option<u64>,
    used: Option<u64>,
    deleted: Option<u64>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const KEY: &str = "onedrive";
const API_BASE: &str = "https://graph.microsoft.com";
const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const SCOPE: &str = "onedrive.readwrite";
const ROOT_ID: &str = "root";
const CONFLICT_BEHAVIOR: &str = "@microsoft.graph.conflictBehavior";

/// Session chunks must be multiples of 320 KiB.
pub const UPLOAD_LIMITS: UploadLimits = UploadLimits::new(4_000_000, 12 * 320 * 1024);

fn conflict_behavior(overwrite: bool) -> &'static str {
    if overwrite {
        "replace"
    } else {
        "fail"
    }
}

// ---------------------------------------------------------------------------
// OneDriveClient
// ---------------------------------------------------------------------------

pub struct OneDriveClient {
    http: HttpClient,
    token: TokenSlot,
    oauth: OAuthApp,
    api_base: String,
    limits: UploadLimits,
    items: RwLock<PathCache>,
}

impl OneDriveClient {
    /// No client id is built in; one must come from the connection.
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            token: TokenSlot::default(),
            oauth: OAuthApp::new(AUTH_URL, Some(SCOPE), ""),
            api_base: API_BASE.to_string(),
            limits: UPLOAD_LIMITS,
            items: RwLock::new(PathCache::new(ROOT_ID)),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_upload_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.token.get(KEY).await?;
        let client = self.http.get_client().await;
        Ok(client.request(method, url).bearer_auth(&token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        check(req.send().await?, nested_error_message).await
    }

    /// `<base>/v1.0/me/drive/<segments...>`, each segment percent-encoded.
    fn drive_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| CloudError::Config(format!("Invalid Graph base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CloudError::Config(format!("Invalid Graph base URL: {}", self.api_base)))?
            .pop_if_empty()
            .extend(["v1.0", "me", "drive"])
            .extend(segments);
        Ok(url)
    }

    /// Path-relative addressing of a child: `items/{parent}:/{name}:/<action>`.
    fn child_url(&self, parent_id: &str, name: &str, action: &str) -> Result<Url> {
        self.drive_url(&[
            "items",
            &format!("{parent_id}:"),
            &format!("{name}:"),
            action,
        ])
    }

    async fn resolve_id(&self, path: &str) -> Result<String> {
        resolve_with(&self.items, path, move |dir| async move {
            self.get_resources(&dir, false).await.map(drop)
        })
        .await
    }

    async fn parent_id(&self, parent: &str) -> Result<String> {
        match self.resolve_id(parent).await {
            Ok(id) => Ok(id),
            Err(CloudError::NotFound(_)) => {
                tracing::warn!(service = KEY, path = %parent, "Parent folder not found, using root");
                Ok(ROOT_ID.to_string())
            }
            Err(err) => Err(err),
        }
    }

    /// Cache the item Graph returned under `parent`, by the name Graph
    /// gave it. A `rename` conflict behavior can pick a different name.
    async fn register(&self, parent: &str, resp: reqwest::Response) -> Result<()> {
        let item: DriveItem = resp.json().await?;
        self.items
            .write()
            .await
            .insert_child(parent, &item.name, item.id);
        Ok(())
    }

    async fn upload_session(
        &self,
        parent_id: &str,
        parent: &str,
        name: &str,
        source: &mut dyn UploadSource,
        size: u64,
        overwrite: bool,
    ) -> Result<()> {
        let url = self.child_url(parent_id, name, "createUploadSession")?;
        let req = self
            .request(Method::POST, url)
            .await?
            .json(&json!({ "item": { CONFLICT_BEHAVIOR: conflict_behavior(overwrite) } }));
        let session: UploadSession = self.send(req).await?.json().await?;
        tracing::debug!(service = KEY, parent = %parent, name = %name, size, "Opened upload session");

        // The upload URL is pre-authorized; Graph rejects a bearer token on it.
        let client = self.http.get_client().await;
        for chunk in self.limits.plan(size) {
            let body = read_chunk(source, chunk.len).await?;
            let resp = client
                .put(&session.upload_url)
                .header(
                    CONTENT_RANGE,
                    format!("bytes {}-{}/{}", chunk.offset, chunk.end() - 1, size),
                )
                .body(body)
                .send()
                .await?;
            let resp = check(resp, nested_error_message).await?;
            tracing::debug!(service = KEY, offset = chunk.end(), size, "Uploaded chunk");
            if chunk.last {
                self.register(parent, resp).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceClient for OneDriveClient {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "OneDrive"
    }

    fn oauth(&self) -> Option<&OAuthApp> {
        Some(&self.oauth)
    }

    async fn set_oauth_token(&self, token: &str) -> Result<()> {
        self.token.set(token).await
    }

    async fn reset_session(&self) {
        *self.items.write().await = PathCache::new(ROOT_ID);
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let req = self.request(Method::GET, self.drive_url(&[])?).await?;
        let drive: Drive = self.send(req).await?.json().await?;
        let quota = drive.quota.unwrap_or_default();
        Ok(DiskInfo {
            total: quota.total,
            used: quota.used,
            trash: quota.deleted,
        })
    }

    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources> {
        if is_trash {
            return Err(unsupported(KEY, "trash"));
        }
        let path = normalize_path(path);
        let (folder_id, cacheable) = listing_target(&self.items, &path, move |dir| async move {
            self.get_resources(&dir, false).await.map(drop)
        })
        .await?;

        let mut next = Some(self.drive_url(&["items", &folder_id, "children"])?);
        let mut resources = Resources::new();
        while let Some(url) = next.take() {
            let page: ChildrenPage = self
                .send(self.request(Method::GET, url).await?)
                .await?
                .json()
                .await?;

            let mut cache = self.items.write().await;
            for item in page.value {
                if cacheable {
                    cache.insert_child(&path, &item.name, item.id);
                }
                let created = parse_time(item.created.as_deref());
                let modified = parse_time(item.modified.as_deref());
                resources.push(if item.folder.is_some() {
                    Resource::dir(item.name, created, modified)
                } else {
                    Resource::file(item.name, item.size, created, modified)
                });
            }
            drop(cache);

            next = match page.next_link {
                Some(link) => Some(
                    Url::parse(&link)
                        .map_err(|e| CloudError::InvalidResponse(format!("bad nextLink: {e}")))?,
                ),
                None => None,
            };
        }

        if path == "/" {
            resources.push(Resource::trash_dir());
        }
        tracing::debug!(service = KEY, path = %path, count = resources.len(), "Listed folder");
        Ok(resources)
    }

    async fn make_folder(&self, path: &str) -> Result<()> {
        let (parent, name) = split_parent(path);
        let parent_id = self.parent_id(&parent).await?;
        let url = self.drive_url(&["items", &parent_id, "children"])?;
        let req = self.request(Method::POST, url).await?.json(&json!({
            "name": name,
            "folder": {},
            CONFLICT_BEHAVIOR: "rename",
        }));
        let resp = self.send(req).await?;
        self.register(&parent, resp).await
    }

    async fn remove_resource(&self, path: &str) -> Result<()> {
        let id = self.resolve_id(path).await?;
        let url = self.drive_url(&["items", &id])?;
        self.send(self.request(Method::DELETE, url).await?).await?;
        self.items.write().await.forget(path);
        Ok(())
    }

    async fn download_file(
        &self,
        path: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let id = self.resolve_id(path).await?;
        let url = self.drive_url(&["items", &id, "content"])?;
        let resp = self.send(self.request(Method::GET, url).await?).await?;
        stream_body(resp, out).await
    }

    async fn upload_file(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()> {
        let (parent, name) = split_parent(path);
        let parent_id = self.parent_id(&parent).await?;
        let size = source_len(source).await?;

        if self.limits.is_chunked(size) {
            return self
                .upload_session(&parent_id, &parent, &name, source, size, overwrite)
                .await;
        }

        let mut url = self.child_url(&parent_id, &name, "content")?;
        url.query_pairs_mut()
            .append_pair(CONFLICT_BEHAVIOR, conflict_behavior(overwrite));
        let body = read_all(source).await?;
        let req = self
            .request(Method::PUT, url)
            .await?
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let resp = self.send(req).await?;
        self.register(&parent, resp).await
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let id = self.resolve_id(from).await?;
        let (new_parent, new_name) = split_parent(to);
        let new_parent_id = self.parent_id(&new_parent).await?;

        let mut url = self.drive_url(&["items", &id])?;
        url.query_pairs_mut()
            .append_pair(CONFLICT_BEHAVIOR, conflict_behavior(overwrite));
        let req = self.request(Method::PATCH, url).await?.json(&json!({
            "parentReference": { "id": new_parent_id },
            "name": new_name,
        }));
        self.send(req).await?;

        let mut cache = self.items.write().await;
        cache.forget(from);
        cache.insert(to, id);
        Ok(())
    }

    /// Graph copies asynchronously (202); the new id is learnt on the next listing.
    async fn copy_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let id = self.resolve_id(from).await?;
        let (new_parent, new_name) = split_parent(to);
        let new_parent_id = self.parent_id(&new_parent).await?;

        let mut url = self.drive_url(&["items", &id, "copy"])?;
        url.query_pairs_mut()
            .append_pair(CONFLICT_BEHAVIOR, conflict_behavior(overwrite));
        let req = self.request(Method::POST, url).await?.json(&json!({
            "parentReference": { "id": new_parent_id },
            "name": new_name,
        }));
        self.send(req).await?;
        self.items.write().await.forget(to);
        Ok(())
    }

    async fn run_command(&self, _path: &str, args: &[String]) -> Result<()> {
        match RemoteCommand::parse(args)? {
            RemoteCommand::TrashClean => self.clean_trash().await,
            RemoteCommand::Download { .. } => Err(unsupported(KEY, "save_from_url")),
            RemoteCommand::Zip { .. } => Err(unsupported(KEY, "zip")),
            other => Err(CloudError::CommandNotSupported(other.verb().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
