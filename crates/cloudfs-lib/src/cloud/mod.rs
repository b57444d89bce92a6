//! Provider-neutral storage contract and the pieces every adapter shares.
//!
//! Each provider (Yandex Disk, Dropbox, Google Drive, OneDrive, plus the
//! no-op Dummy) implements [`ServiceClient`]. Path-addressed providers pass
//! virtual paths straight through; id-addressed ones resolve them through a
//! [`path_cache::PathCache`] filled while listing.

pub mod command;
pub mod dropbox;
pub mod dummy;
pub mod gdrive;
pub mod oauth_app;
pub mod onedrive;
pub mod operation;
pub mod path_cache;
pub mod registry;
pub mod upload;
pub mod yandex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

use crate::errors::{unsupported, CloudError, Result};
use oauth_app::OAuthApp;
pub use upload::UploadSource;

/// Name of the synthetic root entry that leads into provider trash.
pub const TRASH_DIR: &str = ".Trash";

// ---------------------------------------------------------------------------
// Data models
// ---------------------------------------------------------------------------

/// A remote file or folder, rebuilt from every listing response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Resource {
    pub fn file(
        name: impl Into<String>,
        size: u64,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            created,
            modified,
        }
    }

    pub fn dir(name: impl Into<String>, created: DateTime<Utc>, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            created,
            modified,
        }
    }

    /// The `.Trash` gateway entry.
    pub fn trash_dir() -> Self {
        let now = Utc::now();
        Self::dir(TRASH_DIR, now, now)
    }
}

/// Listing result: appended to while pages arrive, then consumed one entry
/// at a time through [`Resources::next_unread`].
#[derive(Debug, Clone, Default)]
pub struct Resources {
    items: Vec<Resource>,
    cursor: usize,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, resource: Resource) {
        self.items.push(resource);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Resource> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.items.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|r| r.name.as_str()).collect()
    }

    /// Index of the next entry [`Self::next_unread`] will return.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Return the entry under the cursor and advance past it.
    pub fn next_unread(&mut self) -> Option<&Resource> {
        let item = self.items.get(self.cursor)?;
        self.cursor += 1;
        Some(item)
    }

    pub fn into_vec(self) -> Vec<Resource> {
        self.items
    }
}

impl FromIterator<Resource> for Resources {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
            cursor: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Resources {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Storage quota summary. Providers omit what they do not report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiskInfo {
    pub total: Option<u64>,
    pub used: Option<u64>,
    pub trash: Option<u64>,
}

// ---------------------------------------------------------------------------
// ServiceClient trait
// ---------------------------------------------------------------------------

/// Uniform operation set over one authenticated cloud-storage account.
///
/// Paths are provider-relative and absolute (`/dir/file`). Errors carry the
/// provider status where there is one, so callers can tell a conflict (409)
/// from other failures.
#[async_trait]
pub trait ServiceClient: Send + Sync {
    /// Registry key, e.g. `"yandex"`.
    fn key(&self) -> &'static str;

    /// Display name, e.g. `"Yandex Disk"`.
    fn display_name(&self) -> &'static str;

    /// OAuth application settings; `None` for providers without OAuth.
    fn oauth(&self) -> Option<&OAuthApp> {
        None
    }

    /// Whether a token must be bound before use.
    fn requires_token(&self) -> bool {
        self.oauth().is_some()
    }

    /// The provider's authorize URL with client id, scope and the loopback redirect.
    fn auth_page_url(&self) -> Result<String> {
        match self.oauth() {
            Some(app) => app.authorize_url(),
            None => Err(unsupported(self.key(), "oauth")),
        }
    }

    fn set_client_id(&self, client_id: &str) {
        if let Some(app) = self.oauth() {
            app.set_client_id(client_id);
        }
    }

    fn set_port(&self, port: u16) {
        if let Some(app) = self.oauth() {
            app.set_port(port);
        }
    }

    fn port(&self) -> u16 {
        self.oauth()
            .map(OAuthApp::port)
            .unwrap_or(crate::config::settings::DEFAULT_OAUTH_PORT)
    }

    /// Install the credential used by every later call. Empty tokens are rejected.
    async fn set_oauth_token(&self, token: &str) -> Result<()>;

    /// Drop state learnt under the previously bound account, such as cached
    /// path ids. Called when a different connection takes over the adapter.
    async fn reset_session(&self) {}

    async fn disk_info(&self) -> Result<DiskInfo>;

    /// List the immediate children of `path`, draining all pages.
    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources>;

    async fn make_folder(&self, path: &str) -> Result<()>;

    async fn remove_resource(&self, path: &str) -> Result<()>;

    /// Stream the file body into `out`; returns the number of bytes written.
    async fn download_file(
        &self,
        path: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    async fn upload_file(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()>;

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()>;

    async fn copy_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()>;

    /// Ask the provider to fetch `url` into `path` server-side.
    async fn save_from_url(&self, _url: &str, _path: &str) -> Result<()> {
        Err(unsupported(self.key(), "save_from_url"))
    }

    async fn clean_trash(&self) -> Result<()> {
        Err(unsupported(self.key(), "clean_trash"))
    }

    async fn delete_from_trash(&self, _path: &str) -> Result<()> {
        Err(unsupported(self.key(), "delete_from_trash"))
    }

    /// Provider-specific verbs; `args[0]` is the verb. See [`command::RemoteCommand`].
    async fn run_command(&self, path: &str, args: &[String]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Bearer credential slot shared by the adapters.
#[derive(Debug, Default)]
pub struct TokenSlot(RwLock<Option<String>>);

impl TokenSlot {
    pub async fn set(&self, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(CloudError::InvalidArgument("empty oauth token".into()));
        }
        *self.0.write().await = Some(token.trim().to_string());
        Ok(())
    }

    pub async fn get(&self, service: &str) -> Result<String> {
        self.0
            .read()
            .await
            .clone()
            .ok_or_else(|| CloudError::Auth(format!("{service}: no token bound")))
    }
}

/// Extracts the human-readable message from a provider's JSON error body.
pub type MessageFn = fn(&Value) -> Option<String>;

/// Message at `error.message`, used by Google and Microsoft Graph.
pub fn nested_error_message(v: &Value) -> Option<String> {
    v.pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Turn a non-success response into [`CloudError::Api`], preferring the
/// provider message and falling back to the raw body.
pub async fn api_error(resp: reqwest::Response, message_of: MessageFn) -> CloudError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| message_of(&v))
        .unwrap_or(body);
    CloudError::Api { status, message }
}

/// Pass successful responses through; convert the rest with [`api_error`].
pub async fn check(resp: reqwest::Response, message_of: MessageFn) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(api_error(resp, message_of).await)
    }
}

/// Copy a response body into `out` chunk by chunk.
pub async fn stream_body(
    resp: reqwest::Response,
    out: &mut (dyn AsyncWrite + Send + Unpin),
) -> Result<u64> {
    let mut stream = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(written)
}

/// RFC 3339 timestamp, or the Unix epoch when absent or malformed.
pub fn parse_time(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// Leading slash, no trailing slash, `/` for the root.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// `parent + "/" + name`, without doubling the slash at the root.
pub fn join_path(parent: &str, name: &str) -> String {
    let parent = normalize_path(parent);
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Split into (parent, last component). The root splits into (`/`, ``).
pub fn split_parent(path: &str) -> (String, String) {
    let path = normalize_path(path);
    match path.rfind('/') {
        Some(0) => ("/".to_string(), path[1..].to_string()),
        Some(idx) => (path[..idx].to_string(), path[idx + 1..].to_string()),
        None => ("/".to_string(), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_resources_cursor() {
        let now = Utc::now();
        let mut res: Resources = ["a", "b"]
            .into_iter()
            .map(|n| Resource::dir(n, now, now))
            .collect();
        assert_eq!(res.cursor(), 0);
        assert_eq!(res.next_unread().map(|r| r.name.clone()), Some("a".into()));
        assert_eq!(res.next_unread().map(|r| r.name.clone()), Some("b".into()));
        assert!(res.next_unread().is_none());
        assert_eq!(res.cursor(), 2);
        assert_eq!(res.len(), 2);
    }

    #[test]
    fn test_trash_dir_entry() {
        let t = Resource::trash_dir();
        assert_eq!(t.name, TRASH_DIR);
        assert!(t.is_dir);
    }

    #[tokio::test]
    async fn test_token_slot_rejects_empty() {
        let slot = TokenSlot::default();
        assert!(matches!(
            slot.set("  ").await.unwrap_err(),
            CloudError::InvalidArgument(_)
        ));
        assert!(matches!(slot.get("x").await.unwrap_err(), CloudError::Auth(_)));
        slot.set("abc").await.unwrap();
        assert_eq!(slot.get("x").await.unwrap(), "abc");
    }

    #[test]
    fn test_nested_error_message() {
        let v = serde_json::json!({"error": {"code": 404, "message": "File not found"}});
        assert_eq!(nested_error_message(&v), Some("File not found".into()));
        assert_eq!(nested_error_message(&serde_json::json!({})), None);
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time(Some("2019-04-08T10:00:00+03:00"));
        assert_eq!(t.to_rfc3339(), "2019-04-08T07:00:00+00:00");
        assert_eq!(parse_time(None).timestamp(), 0);
        assert_eq!(parse_time(Some("yesterday")).timestamp(), 0);
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize_path(""), "/");
        assert_eq!(normalize_path("a/b/"), "/a/b");
        assert_eq!(join_path("/", "x"), "/x");
        assert_eq!(join_path("/a", "x"), "/a/x");
        assert_eq!(split_parent("/a/b"), ("/a".into(), "b".into()));
        assert_eq!(split_parent("/b"), ("/".into(), "b".into()));
        assert_eq!(split_parent("/"), ("/".into(), "".into()));
    }

    proptest! {
        #[test]
        fn split_then_join_round_trips(parts in prop::collection::vec("[a-zA-Z0-9 ._-]{1,12}", 1..5)) {
            prop_assume!(parts.iter().all(|p| !p.trim_matches('/').is_empty()));
            let path = format!("/{}", parts.join("/"));
            let (parent, name) = split_parent(&path);
            prop_assert_eq!(join_path(&parent, &name), path);
        }
    }
}
