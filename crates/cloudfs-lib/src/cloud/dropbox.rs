//! Dropbox API v2 adapter.
//!
//! Path-addressed like Yandex, but every call is an RPC-style POST. Content
//! endpoints live on a second host and take their arguments as JSON in the
//! `Dropbox-API-Arg` header. Dropbox has no trash endpoint.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncWrite;

use super::command::RemoteCommand;
use super::oauth_app::OAuthApp;
use super::operation::{self, OperationStatus, DROPBOX_MAX_POLLS, POLL_INTERVAL};
use super::upload::{read_all, read_chunk, source_len, UploadLimits, UploadSource};
use super::{
    api_error, join_path, normalize_path, parse_time, stream_body, DiskInfo, Resource, Resources,
    ServiceClient, TokenSlot,
};
use crate::errors::{CloudError, Result};
use crate::fileops;
use crate::http_client::HttpClient;

// ---------------------------------------------------------------------------
// Data models
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DropboxEntry {
    #[serde(rename = ".tag")]
    tag: String,
    name: String,
    #[serde(default)]
    size: u64,
    client_modified: Option<String>,
    server_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListFolderResult {
    entries: Vec<DropboxEntry>,
    cursor: String,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct UploadSessionStart {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SpaceUsage {
    used: Option<u64>,
    allocation: Option<SpaceAllocation>,
}

#[derive(Debug, Deserialize)]
struct SpaceAllocation {
    allocated: Option<u64>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const KEY: &str = "dropbox";
const API_BASE: &str = "https://api.dropboxapi.com";
const CONTENT_BASE: &str = "https://content.dropboxapi.com";
const AUTH_URL: &str = "https://www.dropbox.com/oauth2/authorize";
const CLIENT_ID: &str = "ovy1encsqm627kl";
const API_ARG: &str = "Dropbox-API-Arg";
const LIST_LIMIT: u32 = 2000;

/// Single-shot uploads are limited to 150 MB.
pub const UPLOAD_LIMITS: UploadLimits = UploadLimits::new(150_000_000, 32 * 1024 * 1024);

fn dropbox_message(v: &Value) -> Option<String> {
    v.get("error_summary")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Dropbox answers 409 for every endpoint-specific error. Only the
/// `.../conflict/...` family means "already exists"; the rest are remapped
/// so that conflict checks stay meaningful.
fn remap_endpoint_error(err: CloudError) -> CloudError {
    match err {
        CloudError::Api { status: 409, message } if !message.contains("conflict") => {
            let status = if message.contains("not_found") { 404 } else { 400 };
            CloudError::Api { status, message }
        }
        other => other,
    }
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII, so
/// everything else is written as `\uXXXX` escapes.
fn api_arg(value: &Value) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}

/// Dropbox spells the root as an empty string.
fn dropbox_path(path: &str) -> String {
    let path = normalize_path(path);
    if path == "/" {
        String::new()
    } else {
        path
    }
}

fn write_mode(overwrite: bool) -> &'static str {
    if overwrite {
        "overwrite"
    } else {
        "add"
    }
}

// ---------------------------------------------------------------------------
// DropboxClient
// ---------------------------------------------------------------------------

pub struct DropboxClient {
    http: HttpClient,
    token: TokenSlot,
    oauth: OAuthApp,
    api_base: String,
    content_base: String,
    limits: UploadLimits,
    poll_interval: Duration,
}

impl DropboxClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            token: TokenSlot::default(),
            oauth: OAuthApp::new(AUTH_URL, None, CLIENT_ID),
            api_base: API_BASE.to_string(),
            content_base: CONTENT_BASE.to_string(),
            limits: UPLOAD_LIMITS,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_content_base(mut self, base: impl Into<String>) -> Self {
        self.content_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_upload_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn authorized(&self, url: String) -> Result<RequestBuilder> {
        let token = self.token.get(KEY).await?;
        let client = self.http.get_client().await;
        Ok(client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {token}")))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        let resp = req.send().await?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(remap_endpoint_error(
                api_error(resp, dropbox_message).await,
            ))
        }
    }

    /// JSON RPC on the API host.
    async fn rpc(&self, endpoint: &str, body: Value) -> Result<reqwest::Response> {
        let req = self
            .authorized(format!("{}/2/{}", self.api_base, endpoint))
            .await?
            .json(&body);
        self.send(req).await
    }

    /// Content call: argument in the header, raw bytes in the body.
    async fn content(
        &self,
        endpoint: &str,
        arg: Value,
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let req = self
            .authorized(format!("{}/2/{}", self.content_base, endpoint))
            .await?
            .header(API_ARG, api_arg(&arg))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body);
        self.send(req).await
    }

    async fn upload_session(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        size: u64,
        overwrite: bool,
    ) -> Result<()> {
        let started: UploadSessionStart = self
            .content("files/upload_session/start", json!({ "close": false }), Vec::new())
            .await?
            .json()
            .await?;
        tracing::debug!(service = KEY, path = %path, size, "Opened upload session");

        for chunk in self.limits.plan(size) {
            let body = read_chunk(source, chunk.len).await?;
            let cursor = json!({ "session_id": started.session_id, "offset": chunk.offset });
            if chunk.last {
                let arg = json!({
                    "cursor": cursor,
                    "commit": {
                        "path": normalize_path(path),
                        "mode": write_mode(overwrite),
                        "autorename": false,
                    }
                });
                self.content("files/upload_session/finish", arg, body).await?;
            } else {
                let arg = json!({ "cursor": cursor, "close": false });
                self.content("files/upload_session/append_v2", arg, body).await?;
            }
            tracing::debug!(service = KEY, offset = chunk.end(), size, "Uploaded chunk");
        }
        Ok(())
    }

    /// Make room for an overwriting move or copy. A missing target is fine.
    ///
    /// The source is checked first so a bad source never costs the target.
    async fn clear_target(&self, from: &str, to: &str) -> Result<()> {
        self.rpc("files/get_metadata", json!({ "path": normalize_path(from) }))
            .await?;
        match self.remove_resource(to).await {
            Err(err) if err.status() == Some(404) => Ok(()),
            other => other,
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<OperationStatus> {
        let status: Value = self
            .rpc("files/save_url/check_job_status", json!({ "async_job_id": job_id }))
            .await?
            .json()
            .await?;
        Ok(match status.get(".tag").and_then(Value::as_str) {
            Some("complete") => OperationStatus::Success,
            Some("failed") => OperationStatus::Failed(
                status
                    .get("failed")
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "save_url failed".into()),
            ),
            _ => OperationStatus::InProgress,
        })
    }

    /// Download folder `path` as a zip archive into a new local file.
    pub async fn download_zip(&self, path: &str, dest: &Path) -> Result<u64> {
        let mut file = fileops::create_new_file(dest).await?;
        let result = async {
            let resp = self
                .content("files/download_zip", json!({ "path": normalize_path(path) }), Vec::new())
                .await?;
            stream_body(resp, &mut file).await
        }
        .await;

        if result.is_err() {
            drop(file);
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

#[async_trait]
impl ServiceClient for DropboxClient {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "Dropbox"
    }

    fn oauth(&self) -> Option<&OAuthApp> {
        Some(&self.oauth)
    }

    async fn set_oauth_token(&self, token: &str) -> Result<()> {
        self.token.set(token).await
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let req = self
            .authorized(format!("{}/2/users/get_space_usage", self.api_base))
            .await?;
        let usage: SpaceUsage = self.send(req).await?.json().await?;
        Ok(DiskInfo {
            total: usage.allocation.and_then(|a| a.allocated),
            used: usage.used,
            trash: None,
        })
    }

    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources> {
        if is_trash {
            return Err(crate::errors::unsupported(KEY, "trash"));
        }

        let mut page: ListFolderResult = self
            .rpc(
                "files/list_folder",
                json!({ "path": dropbox_path(path), "recursive": false, "limit": LIST_LIMIT }),
            )
            .await?
            .json()
            .await?;

        let mut resources = Resources::new();
        loop {
            for entry in page.entries {
                match entry.tag.as_str() {
                    "file" => resources.push(Resource::file(
                        entry.name,
                        entry.size,
                        parse_time(entry.client_modified.as_deref()),
                        parse_time(entry.server_modified.as_deref()),
                    )),
                    "folder" => {
                        let now = chrono::Utc::now();
                        resources.push(Resource::dir(entry.name, now, now));
                    }
                    _ => {}
                }
            }
            if !page.has_more {
                break;
            }
            page = self
                .rpc("files/list_folder/continue", json!({ "cursor": page.cursor }))
                .await?
                .json()
                .await?;
        }

        tracing::debug!(service = KEY, path = %path, count = resources.len(), "Listed folder");
        Ok(resources)
    }

    async fn make_folder(&self, path: &str) -> Result<()> {
        self.rpc(
            "files/create_folder_v2",
            json!({ "path": normalize_path(path), "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn remove_resource(&self, path: &str) -> Result<()> {
        self.rpc("files/delete_v2", json!({ "path": normalize_path(path) }))
            .await?;
        Ok(())
    }

    async fn download_file(
        &self,
        path: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let req = self
            .authorized(format!("{}/2/files/download", self.content_base))
            .await?
            .header(API_ARG, api_arg(&json!({ "path": normalize_path(path) })));
        let resp = self.send(req).await?;
        stream_body(resp, out).await
    }

    async fn upload_file(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()> {
        let size = source_len(source).await?;
        if self.limits.is_chunked(size) {
            return self.upload_session(path, source, size, overwrite).await;
        }

        let arg = json!({
            "path": normalize_path(path),
            "mode": write_mode(overwrite),
            "autorename": false,
        });
        let body = read_all(source).await?;
        self.content("files/upload", arg, body).await?;
        Ok(())
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        if overwrite {
            self.clear_target(from, to).await?;
        }
        self.rpc(
            "files/move_v2",
            json!({ "from_path": normalize_path(from), "to_path": normalize_path(to), "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn copy_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        if overwrite {
            self.clear_target(from, to).await?;
        }
        self.rpc(
            "files/copy_v2",
            json!({ "from_path": normalize_path(from), "to_path": normalize_path(to), "autorename": false }),
        )
        .await?;
        Ok(())
    }

    async fn save_from_url(&self, url: &str, path: &str) -> Result<()> {
        let started: Value = self
            .rpc("files/save_url", json!({ "path": normalize_path(path), "url": url }))
            .await?
            .json()
            .await?;

        let Some(job_id) = started.get("async_job_id").and_then(Value::as_str) else {
            return Ok(());
        };
        tracing::debug!(service = KEY, job = %job_id, "Waiting for save_url job");
        operation::wait_for(self.poll_interval, DROPBOX_MAX_POLLS, || self.job_status(job_id)).await
    }

    async fn run_command(&self, path: &str, args: &[String]) -> Result<()> {
        match RemoteCommand::parse(args)? {
            RemoteCommand::Download { url, name } => {
                self.save_from_url(&url, &join_path(path, &name)).await
            }
            RemoteCommand::Zip { source, dest } => {
                let source = source.unwrap_or_else(|| path.to_string());
                let written = self.download_zip(&source, Path::new(&dest)).await?;
                tracing::info!(service = KEY, source = %source, dest = %dest, bytes = written, "Saved zip archive");
                Ok(())
            }
            other => Err(CloudError::CommandNotSupported(other.verb().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
