//! Google Drive v3 adapter.
//!
//! Drive addresses everything by opaque file id, so virtual paths are
//! resolved through a [`PathCache`] that listings fill in. A path that was
//! never listed is resolved by listing its ancestors from the root down.
//! Trashed items are browsed under `.Trash` with a cache of their own.

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;

use super::command::RemoteCommand;
use super::oauth_app::OAuthApp;
use super::path_cache::{listing_target, resolve_with, PathCache};
use super::upload::{read_all, UploadSource};
use super::{
    check, nested_error_message, normalize_path, parse_time, split_parent,
    stream_body, DiskInfo, Resource, Resources, ServiceClient, TokenSlot,
};
use crate::errors::{unsupported, CloudError, Result};
use crate::http_client::HttpClient;

// ---------------------------------------------------------------------------
// Data models
// ---------------------------------------------------------------------------

/// Metadata for a Google Drive file or folder.
#[derive(Debug, Clone, Deserialize)]
struct GDriveFile {
    id: String,
    name: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "createdTime", default)]
    created_time: Option<String>,
    #[serde(rename = "modifiedTime", default)]
    modified_time: Option<String>,
}

impl GDriveFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    fn into_resource(self) -> Resource {
        if self.is_folder() {
            let now = chrono::Utc::now();
            return Resource::dir(self.name, now, now);
        }
        let size = self.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0);
        Resource::file(
            self.name,
            size,
            parse_time(self.created_time.as_deref()),
            parse_time(self.modified_time.as_deref()),
        )
    }
}

/// Response from the files.list API.
#[derive(Debug, Deserialize)]
struct GDriveFileList {
    #[serde(default)]
    files: Vec<GDriveFile>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

/// Request body for creating or copying a file.
#[derive(Debug, Serialize)]
struct GDriveCreateRequest<'a> {
    name: &'a str,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GDriveId {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GDriveAbout {
    #[serde(rename = "storageQuota")]
    storage_quota: GDriveQuota,
}

#[derive(Debug, Deserialize)]
struct GDriveQuota {
    limit: Option<String>,
    usage: Option<String>,
    #[serde(rename = "usageInDriveTrash")]
    usage_in_drive_trash: Option<String>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const KEY: &str = "gdrive";
const API_BASE: &str = "https://www.googleapis.com";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
const CLIENT_ID: &str = "1019190623375-06j9q3kgqnborccd85fudtf0f7rk7138.apps.googleusercontent.com";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,createdTime,modifiedTime)";
const ROOT_ID: &str = "root";
const PAGE_SIZE: u32 = 1000;

fn parse_quota(raw: Option<String>) -> Option<u64> {
    raw.and_then(|s| s.parse().ok())
}

// ---------------------------------------------------------------------------
// GDriveClient
// ---------------------------------------------------------------------------

pub struct GDriveClient {
    http: HttpClient,
    token: TokenSlot,
    oauth: OAuthApp,
    api_base: String,
    page_size: u32,
    files: RwLock<PathCache>,
    trash: RwLock<PathCache>,
}

impl GDriveClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            token: TokenSlot::default(),
            oauth: OAuthApp::new(GOOGLE_AUTH_URL, Some(DRIVE_SCOPE), CLIENT_ID),
            api_base: API_BASE.to_string(),
            page_size: PAGE_SIZE,
            files: RwLock::new(PathCache::new(ROOT_ID)),
            trash: RwLock::new(PathCache::new(ROOT_ID)),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn request(&self, method: Method, url: String) -> Result<RequestBuilder> {
        let token = self.token.get(KEY).await?;
        let client = self.http.get_client().await;
        Ok(client.request(method, url).bearer_auth(&token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        check(req.send().await?, nested_error_message).await
    }

    #[cfg(test)]
    pub(crate) async fn remember(&self, path: &str, id: &str) {
        self.files.write().await.insert(path, id);
    }

    #[cfg(test)]
    pub(crate) async fn cached_id(&self, path: &str) -> Option<String> {
        self.files.read().await.lookup(path).map(str::to_string)
    }

    fn files_url(&self, suffix: &str) -> String {
        format!("{}/drive/v3/files{}", self.api_base, suffix)
    }

    // -----------------------------------------------------------------------
    // Id resolution
    // -----------------------------------------------------------------------

    /// Id of `path`, listing uncached ancestors as needed.
    async fn resolve_id(&self, path: &str) -> Result<String> {
        resolve_with(&self.files, path, move |dir| async move {
            self.get_resources(&dir, false).await.map(drop)
        })
        .await
    }

    /// Id of an existing item at `path`, or `None` when nothing is there.
    async fn existing_id(&self, path: &str) -> Result<Option<String>> {
        match self.resolve_id(path).await {
            Ok(id) => Ok(Some(id)),
            Err(CloudError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Folder id for new children of `parent`. Unresolvable parents fall back to the root.
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

    /// Make `to` free for a write. Existing items conflict unless `overwrite`.
    async fn claim_target(&self, to: &str, overwrite: bool) -> Result<Option<String>> {
        let existing = self.existing_id(to).await?;
        match existing {
            Some(_) if !overwrite => Err(CloudError::Api {
                status: 409,
                message: format!("Resource already exists: {}", normalize_path(to)),
            }),
            other => Ok(other),
        }
    }

    async fn delete_by_id(&self, id: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, self.files_url(&format!("/{id}")))
            .await?;
        self.send(req).await?;
        Ok(())
    }

    /// Trash the item an overwriting move or copy displaced.
    ///
    /// Drive allows duplicate names, so this runs after the new item is in
    /// place and the old one stays recoverable from the trash.
    async fn retire_replaced(&self, replaced: Option<String>, kept: &str) -> Result<()> {
        let Some(old) = replaced.filter(|old| old != kept) else {
            return Ok(());
        };
        let req = self
            .request(Method::PATCH, self.files_url(&format!("/{old}")))
            .await?
            .json(&json!({ "trashed": true }));
        self.send(req).await?;
        tracing::debug!(service = KEY, id = %old, "Trashed replaced item");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    async fn list_query(&self, q: &str) -> Result<Vec<GDriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        let size = self.page_size.to_string();

        loop {
            let mut params: Vec<(&str, &str)> = vec![
                ("q", q),
                ("pageSize", size.as_str()),
                ("fields", LIST_FIELDS),
            ];
            if let Some(pt) = page_token.as_deref() {
                params.push(("pageToken", pt));
            }

            let req = self
                .request(Method::GET, self.files_url(""))
                .await?
                .query(&params);
            let page: GDriveFileList = self.send(req).await?.json().await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl ServiceClient for GDriveClient {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "Google Drive"
    }

    fn oauth(&self) -> Option<&OAuthApp> {
        Some(&self.oauth)
    }

    async fn set_oauth_token(&self, token: &str) -> Result<()> {
        self.token.set(token).await
    }

    async fn reset_session(&self) {
        *self.files.write().await = PathCache::new(ROOT_ID);
        *self.trash.write().await = PathCache::new(ROOT_ID);
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let req = self
            .request(Method::GET, format!("{}/drive/v3/about", self.api_base))
            .await?
            .query(&[("fields", "storageQuota")]);
        let about: GDriveAbout = self.send(req).await?.json().await?;
        let quota = about.storage_quota;
        Ok(DiskInfo {
            total: parse_quota(quota.limit),
            used: parse_quota(quota.usage),
            trash: parse_quota(quota.usage_in_drive_trash),
        })
    }

    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources> {
        let path = normalize_path(path);
        let cache = if is_trash { &self.trash } else { &self.files };

        let (q, cacheable) = if is_trash && path == "/" {
            ("trashed = true".to_string(), true)
        } else {
            let (folder_id, cacheable) = if is_trash {
                match cache.read().await.lookup(&path) {
                    Some(id) => (id.to_string(), true),
                    None => (ROOT_ID.to_string(), false),
                }
            } else {
                listing_target(cache, &path, move |dir| async move {
                    self.get_resources(&dir, false).await.map(drop)
                })
                .await?
            };
            (format!("'{folder_id}' in parents and trashed = {is_trash}"), cacheable)
        };

        let files = self.list_query(&q).await?;

        let mut resources = Resources::new();
        {
            let mut cache = cache.write().await;
            for file in files {
                if cacheable {
                    cache.insert_child(&path, &file.name, file.id.clone());
                }
                resources.push(file.into_resource());
            }
        }

        if path == "/" && !is_trash {
            resources.push(Resource::trash_dir());
        }
        tracing::debug!(service = KEY, path = %path, trash = is_trash, count = resources.len(), "Listed folder");
        Ok(resources)
    }

    async fn make_folder(&self, path: &str) -> Result<()> {
        let (parent, name) = split_parent(path);
        let parent_id = self.parent_id(&parent).await?;
        let body = GDriveCreateRequest {
            name: &name,
            mime_type: Some(FOLDER_MIME_TYPE),
            parents: vec![parent_id],
        };

        let req = self
            .request(Method::POST, self.files_url(""))
            .await?
            .json(&body);
        let created: GDriveId = self.send(req).await?.json().await?;
        self.files.write().await.insert_child(&parent, &name, created.id);
        Ok(())
    }

    async fn remove_resource(&self, path: &str) -> Result<()> {
        let id = self.resolve_id(path).await?;
        self.delete_by_id(&id).await?;
        self.files.write().await.forget(path);
        Ok(())
    }

    async fn download_file(
        &self,
        path: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let id = self.resolve_id(path).await?;
        let req = self
            .request(Method::GET, self.files_url(&format!("/{id}")))
            .await?
            .query(&[("alt", "media")]);
        let resp = self.send(req).await?;
        stream_body(resp, out).await
    }

    async fn upload_file(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()> {
        let (parent, name) = split_parent(path);

        if let Some(existing) = self.claim_target(path, overwrite).await? {
            let body = read_all(source).await?;
            let req = self
                .request(
                    Method::PATCH,
                    format!("{}/upload/drive/v3/files/{existing}", self.api_base),
                )
                .await?
                .query(&[("uploadType", "media")])
                .body(body);
            self.send(req).await?;
            return Ok(());
        }

        let parent_id = self.parent_id(&parent).await?;
        let metadata = GDriveCreateRequest {
            name: &name,
            mime_type: None,
            parents: vec![parent_id],
        };
        let req = self
            .request(Method::POST, format!("{}/upload/drive/v3/files", self.api_base))
            .await?
            .query(&[("uploadType", "resumable")])
            .json(&metadata);
        let resp = self.send(req).await?;
        let session = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| CloudError::InvalidResponse("Cannot find Location header".into()))?;

        let body = read_all(source).await?;
        let req = self
            .request(Method::PUT, session)
            .await?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        let created: GDriveId = self.send(req).await?.json().await?;
        self.files.write().await.insert_child(&parent, &name, created.id);
        Ok(())
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let id = self.resolve_id(from).await?;
        let (old_parent, _) = split_parent(from);
        let (new_parent, new_name) = split_parent(to);

        let replaced = self.claim_target(to, overwrite).await?;
        let old_parent_id = self.parent_id(&old_parent).await?;
        let new_parent_id = self.parent_id(&new_parent).await?;

        let req = self
            .request(Method::PATCH, self.files_url(&format!("/{id}")))
            .await?
            .query(&[
                ("addParents", new_parent_id.as_str()),
                ("removeParents", old_parent_id.as_str()),
            ])
            .json(&json!({ "name": new_name }));
        self.send(req).await?;

        {
            let mut cache = self.files.write().await;
            cache.forget(from);
            cache.insert(to, id.clone());
        }
        self.retire_replaced(replaced, &id).await
    }

    async fn copy_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let id = self.resolve_id(from).await?;
        let (new_parent, new_name) = split_parent(to);

        let replaced = self.claim_target(to, overwrite).await?;
        let body = GDriveCreateRequest {
            name: &new_name,
            mime_type: None,
            parents: vec![self.parent_id(&new_parent).await?],
        };

        let req = self
            .request(Method::POST, self.files_url(&format!("/{id}/copy")))
            .await?
            .json(&body);
        let copied: GDriveId = self.send(req).await?.json().await?;
        self.files.write().await.insert(to, copied.id.clone());
        self.retire_replaced(replaced, &copied.id).await
    }

    async fn clean_trash(&self) -> Result<()> {
        let req = self.request(Method::DELETE, self.files_url("/trash")).await?;
        self.send(req).await?;
        *self.trash.write().await = PathCache::new(ROOT_ID);
        Ok(())
    }

    async fn delete_from_trash(&self, path: &str) -> Result<()> {
        let id = self
            .trash
            .read()
            .await
            .lookup(path)
            .filter(|_| normalize_path(path) != "/")
            .map(str::to_string)
            .ok_or_else(|| CloudError::NotFound(format!("Cannot find file ID: {path}")))?;
        self.delete_by_id(&id).await?;
        self.trash.write().await.forget(path);
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io::Cursor;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn make_test_client(server: &MockServer) -> GDriveClient {
        let client = GDriveClient::new(HttpClient::from_defaults().unwrap()).with_api_base(server.uri());
        client.set_oauth_token("g-token").await.unwrap();
        client
    }

    fn file(id: &str, name: &str, folder: bool) -> Value {
        if folder {
            json!({"id": id, "name": name, "mimeType": FOLDER_MIME_TYPE})
        } else {
            json!({"id": id, "name": name, "mimeType": "text/plain", "size": "42",
                   "createdTime": "2022-03-01T00:00:00Z", "modifiedTime": "2022-03-02T00:00:00Z"})
        }
    }

    async fn mount_listing(server: &MockServer, q: &str, files: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", q))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": files })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_root_listing_paginates_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'root' in parents and trashed = false"))
            .and(query_param("pageToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [file("id-b", "b.txt", false)]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'root' in parents and trashed = false"))
            .and(header("Authorization", "Bearer g-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [file("id-docs", "docs", true)], "nextPageToken": "p2"
            })))
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let res = client.get_resources("/", false).await.unwrap();

        assert_eq!(res.names(), vec!["docs", "b.txt", ".Trash"]);
        assert!(res.get(0).unwrap().is_dir);
        assert_eq!(res.get(1).unwrap().size, 42);

        let cache = client.files.read().await;
        assert_eq!(cache.lookup("/docs"), Some("id-docs"));
        assert_eq!(cache.lookup("/b.txt"), Some("id-b"));
    }

    #[tokio::test]
    async fn test_uncached_path_is_resolved_by_walking() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-docs", "docs", true)]).await;
        mount_listing(&server, "'id-docs' in parents and trashed = false", vec![file("id-a", "a.txt", false)]).await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/id-a"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"drive".to_vec()))
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let mut out = Vec::new();
        client.download_file("/docs/a.txt", &mut out).await.unwrap();
        assert_eq!(out, b"drive");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![]).await;

        let client = make_test_client(&server).await;
        let err = client.remove_resource("/ghost.txt").await.unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("Cannot find file ID"));
    }

    #[tokio::test]
    async fn test_make_folder_registers_new_id() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-docs", "docs", true)]).await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .and(body_json(json!({"name": "new", "mimeType": FOLDER_MIME_TYPE, "parents": ["id-docs"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-new"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        client.make_folder("/docs/new").await.unwrap();
        assert_eq!(client.files.read().await.lookup("/docs/new"), Some("id-new"));
    }

    #[tokio::test]
    async fn test_upload_conflict_and_overwrite() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-a", "a.txt", false)]).await;
        Mock::given(method("PATCH"))
            .and(path("/upload/drive/v3/files/id-a"))
            .and(query_param("uploadType", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-a"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let mut src = Cursor::new(b"v2".to_vec());
        let err = client.upload_file("/a.txt", &mut src, false).await.unwrap_err();
        assert!(err.is_conflict());

        let mut src = Cursor::new(b"v2".to_vec());
        client.upload_file("/a.txt", &mut src, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_upload_uses_resumable_session() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![]).await;
        Mock::given(method("POST"))
            .and(path("/upload/drive/v3/files"))
            .and(query_param("uploadType", "resumable"))
            .and(body_json(json!({"name": "n.txt", "parents": ["root"]})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/upload/session/xyz", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/upload/session/xyz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-n"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let mut src = Cursor::new(b"new".to_vec());
        client.upload_file("/n.txt", &mut src, false).await.unwrap();
        assert_eq!(client.files.read().await.lookup("/n.txt"), Some("id-n"));
    }

    #[tokio::test]
    async fn test_move_patches_parents_and_updates_cache() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            "'root' in parents and trashed = false",
            vec![file("id-a", "a.txt", false), file("id-docs", "docs", true)],
        )
        .await;
        mount_listing(&server, "'id-docs' in parents and trashed = false", vec![]).await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/id-a"))
            .and(query_param("addParents", "id-docs"))
            .and(query_param("removeParents", "root"))
            .and(body_json(json!({"name": "b.txt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-a"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        client.move_resource("/a.txt", "/docs/b.txt", false).await.unwrap();

        let cache = client.files.read().await;
        assert_eq!(cache.lookup("/a.txt"), None);
        assert_eq!(cache.lookup("/docs/b.txt"), Some("id-a"));
    }

    #[tokio::test]
    async fn test_overwriting_move_trashes_old_target_afterwards() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            "'root' in parents and trashed = false",
            vec![file("id-a", "a.txt", false), file("id-b", "b.txt", false)],
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/id-a"))
            .and(body_json(json!({"name": "b.txt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-a"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/id-b"))
            .and(body_json(json!({"trashed": true})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-b"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        client.move_resource("/a.txt", "/b.txt", true).await.unwrap();
        assert_eq!(client.files.read().await.lookup("/b.txt"), Some("id-a"));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() != "DELETE"));
        let order: Vec<&str> = requests
            .iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .map(|r| r.url.path())
            .collect();
        assert_eq!(order, vec!["/drive/v3/files/id-a", "/drive/v3/files/id-b"]);
    }

    #[tokio::test]
    async fn test_failed_overwriting_move_keeps_target() {
        let server = MockServer::start().await;
        mount_listing(
            &server,
            "'root' in parents and trashed = false",
            vec![file("id-a", "a.txt", false), file("id-b", "b.txt", false)],
        )
        .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/id-a"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": {"code": 500, "message": "Backend Error"}
            })))
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let err = client.move_resource("/a.txt", "/b.txt", true).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(client.files.read().await.lookup("/b.txt"), Some("id-b"));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.url.path() != "/drive/v3/files/id-b"));
    }

    #[tokio::test]
    async fn test_overwrite_with_missing_source_keeps_target() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-b", "b.txt", false)]).await;

        let client = make_test_client(&server).await;
        let err = client.copy_resource("/gone.txt", "/b.txt", true).await.unwrap_err();
        assert_eq!(err.status(), Some(404));

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
    }

    #[tokio::test]
    async fn test_listing_unvisited_folder_resolves_ancestors() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-docs", "docs", true)]).await;
        mount_listing(&server, "'id-docs' in parents and trashed = false", vec![file("id-a", "a.txt", false)]).await;

        let client = make_test_client(&server).await;
        let res = client.get_resources("/docs", false).await.unwrap();
        assert_eq!(res.names(), vec!["a.txt"]);
        assert_eq!(client.files.read().await.lookup("/docs/a.txt"), Some("id-a"));
    }

    #[tokio::test]
    async fn test_listing_missing_folder_does_not_cache_root_children() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-a", "a.txt", false)]).await;

        let client = make_test_client(&server).await;
        let res = client.get_resources("/ghost", false).await.unwrap();
        assert_eq!(res.names(), vec!["a.txt"]);

        let cache = client.files.read().await;
        assert_eq!(cache.lookup("/ghost/a.txt"), None);
        assert_eq!(cache.lookup("/a.txt"), Some("id-a"));
    }

    #[tokio::test]
    async fn test_reset_session_forgets_learnt_ids() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-docs", "docs", true)]).await;

        let client = make_test_client(&server).await;
        client.get_resources("/", false).await.unwrap();
        assert_eq!(client.cached_id("/docs").await.as_deref(), Some("id-docs"));

        client.reset_session().await;
        assert_eq!(client.cached_id("/docs").await, None);
        assert_eq!(client.cached_id("/").await.as_deref(), Some(ROOT_ID));
    }

    #[tokio::test]
    async fn test_copy_posts_to_copy_endpoint() {
        let server = MockServer::start().await;
        mount_listing(&server, "'root' in parents and trashed = false", vec![file("id-a", "a.txt", false)]).await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files/id-a/copy"))
            .and(body_json(json!({"name": "c.txt", "parents": ["root"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "id-c"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        client.copy_resource("/a.txt", "/c.txt", false).await.unwrap();
        assert_eq!(client.files.read().await.lookup("/c.txt"), Some("id-c"));
    }

    #[tokio::test]
    async fn test_trash_listing_and_permanent_delete() {
        let server = MockServer::start().await;
        mount_listing(&server, "trashed = true", vec![file("id-old", "old.txt", false)]).await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/id-old"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let res = client.get_resources("/", true).await.unwrap();
        assert_eq!(res.names(), vec!["old.txt"]);

        client.delete_from_trash("/old.txt").await.unwrap();
        assert!(matches!(
            client.delete_from_trash("/old.txt").await.unwrap_err(),
            CloudError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_clean_trash() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/trash"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        client
            .run_command("/", &["trash".to_string(), "clean".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_api_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "Insufficient Permission"}
            })))
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let err = client.get_resources("/", false).await.unwrap_err();
        assert_eq!(err.to_string(), "Error code: 403; Insufficient Permission");
    }

    #[tokio::test]
    async fn test_disk_info_parses_string_quota() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/about"))
            .and(query_param("fields", "storageQuota"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "storageQuota": {"limit": "1000", "usage": "300", "usageInDriveTrash": "7"}
            })))
            .mount(&server)
            .await;

        let client = make_test_client(&server).await;
        let info = client.disk_info().await.unwrap();
        assert_eq!(info, DiskInfo { total: Some(1000), used: Some(300), trash: Some(7) });
    }

    #[test]
    fn test_auth_page_url_has_scope() {
        let client = GDriveClient::new(HttpClient::from_defaults().unwrap());
        let url = client.auth_page_url().unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fdrive"));
    }
}
