//! Yandex Disk REST adapter.
//!
//! Path-addressed: virtual paths go to the API unchanged. Listings page
//! with `offset`/`limit`; move, copy, delete and server-side fetches may
//! answer 202 with an operation link that is polled until it settles.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWrite;

use super::command::RemoteCommand;
use super::oauth_app::OAuthApp;
use super::operation::{self, OperationStatus, POLL_INTERVAL, YANDEX_MAX_POLLS};
use super::upload::{read_all, UploadSource};
use super::{
    check, join_path, normalize_path, parse_time, stream_body, DiskInfo, Resource, Resources,
    ServiceClient, TokenSlot,
};
use crate::errors::{unsupported, CloudError, Result};
use crate::http_client::HttpClient;

// ---------------------------------------------------------------------------
// Data models
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct YandexItem {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: u64,
    created: Option<String>,
    modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YandexEmbedded {
    #[serde(default)]
    items: Vec<YandexItem>,
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct YandexResource {
    #[serde(rename = "_embedded")]
    embedded: Option<YandexEmbedded>,
}

/// Operation or transfer link returned by several endpoints.
#[derive(Debug, Deserialize)]
struct YandexLink {
    href: String,
}

#[derive(Debug, Deserialize)]
struct YandexOperation {
    status: String,
}

#[derive(Debug, Deserialize)]
struct YandexDisk {
    total_space: Option<u64>,
    used_space: Option<u64>,
    trash_size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const KEY: &str = "yandex";
const API_BASE: &str = "https://cloud-api.yandex.net";
const AUTH_URL: &str = "https://oauth.yandex.ru/authorize";
const CLIENT_ID: &str = "bc2f272cc37349b7a1320b9ac7826ebf";
const PAGE_SIZE: u32 = 1000;

fn yandex_message(v: &Value) -> Option<String> {
    v.get("description")
        .and_then(Value::as_str)
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// YandexClient
// ---------------------------------------------------------------------------

pub struct YandexClient {
    http: HttpClient,
    token: TokenSlot,
    oauth: OAuthApp,
    api_base: String,
    page_size: u32,
    poll_interval: Duration,
}

impl YandexClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            token: TokenSlot::default(),
            oauth: OAuthApp::new(AUTH_URL, None, CLIENT_ID),
            api_base: API_BASE.to_string(),
            page_size: PAGE_SIZE,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Point the adapter at another host (a proxy or a mock server).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[cfg(test)]
    fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn request(&self, method: Method, endpoint: &str) -> Result<RequestBuilder> {
        let token = self.token.get(KEY).await?;
        let client = self.http.get_client().await;
        Ok(client
            .request(method, format!("{}/v1/disk{}", self.api_base, endpoint))
            .header(AUTHORIZATION, format!("OAuth {token}")))
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response> {
        check(req.send().await?, yandex_message).await
    }

    /// Wait for a 202 answer's operation; other success codes are final.
    async fn settle(&self, resp: reqwest::Response) -> Result<()> {
        if resp.status() != StatusCode::ACCEPTED {
            return Ok(());
        }
        let link: YandexLink = resp.json().await?;
        let endpoint = operation_endpoint(&link.href)?;
        tracing::debug!(service = KEY, operation = %endpoint, "Waiting for remote operation");
        operation::wait_for(self.poll_interval, YANDEX_MAX_POLLS, move || {
            self.operation_status(endpoint)
        })
        .await
    }

    async fn operation_status(&self, endpoint: &str) -> Result<OperationStatus> {
        let resp = self.send(self.request(Method::GET, endpoint).await?).await?;
        let op: YandexOperation = resp.json().await?;
        Ok(match op.status.as_str() {
            "success" => OperationStatus::Success,
            "failed" | "failure" => OperationStatus::Failed(format!("operation {endpoint} failed")),
            _ => OperationStatus::InProgress,
        })
    }

    async fn transfer(&self, action: &str, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("/resources/{action}"))
            .await?
            .query(&[
                ("from", normalize_path(from)),
                ("path", normalize_path(to)),
                ("overwrite", overwrite.to_string()),
            ]);
        let resp = self.send(req).await?;
        self.settle(resp).await
    }
}

/// Strip an operation href down to the part after the API host.
fn operation_endpoint(href: &str) -> Result<&str> {
    href.find("/v1/disk")
        .map(|idx| &href[idx + "/v1/disk".len()..])
        .ok_or_else(|| CloudError::InvalidResponse(format!("unexpected operation link: {href}")))
}

#[async_trait]
impl ServiceClient for YandexClient {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "Yandex Disk"
    }

    fn oauth(&self) -> Option<&OAuthApp> {
        Some(&self.oauth)
    }

    async fn set_oauth_token(&self, token: &str) -> Result<()> {
        self.token.set(token).await
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        let resp = self.send(self.request(Method::GET, "").await?).await?;
        let disk: YandexDisk = resp.json().await?;
        Ok(DiskInfo {
            total: disk.total_space,
            used: disk.used_space,
            trash: disk.trash_size,
        })
    }

    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources> {
        let path = normalize_path(path);
        let endpoint = if is_trash { "/trash/resources" } else { "/resources" };
        let mut resources = Resources::new();
        let mut offset: u64 = 0;

        loop {
            let req = self.request(Method::GET, endpoint).await?.query(&[
                ("path", path.clone()),
                ("limit", self.page_size.to_string()),
                ("offset", offset.to_string()),
            ]);
            let page: YandexResource = self.send(req).await?.json().await?;
            let Some(embedded) = page.embedded else {
                return Err(CloudError::InvalidResponse(format!("{path} is not a folder")));
            };

            let fetched = embedded.items.len() as u64;
            for item in embedded.items {
                let created = parse_time(item.created.as_deref());
                let modified = parse_time(item.modified.as_deref());
                resources.push(if item.kind == "file" {
                    Resource::file(item.name, item.size, created, modified)
                } else {
                    Resource::dir(item.name, created, modified)
                });
            }

            offset += fetched;
            if fetched == 0 || offset >= embedded.total {
                break;
            }
        }

        if path == "/" && !is_trash {
            resources.push(Resource::trash_dir());
        }
        tracing::debug!(service = KEY, path = %path, count = resources.len(), "Listed folder");
        Ok(resources)
    }

    async fn make_folder(&self, path: &str) -> Result<()> {
        let req = self
            .request(Method::PUT, "/resources")
            .await?
            .query(&[("path", normalize_path(path))]);
        self.send(req).await?;
        Ok(())
    }

    async fn remove_resource(&self, path: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, "/resources")
            .await?
            .query(&[("path", normalize_path(path))]);
        let resp = self.send(req).await?;
        self.settle(resp).await
    }

    async fn download_file(
        &self,
        path: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let req = self
            .request(Method::GET, "/resources/download")
            .await?
            .query(&[("path", normalize_path(path))]);
        let link: YandexLink = self.send(req).await?.json().await?;

        let client = self.http.get_client().await;
        let resp = check(client.get(&link.href).send().await?, yandex_message).await?;
        stream_body(resp, out).await
    }

    async fn upload_file(
        &self,
        path: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()> {
        let req = self.request(Method::GET, "/resources/upload").await?.query(&[
            ("path", normalize_path(path)),
            ("overwrite", overwrite.to_string()),
        ]);
        let link: YandexLink = self.send(req).await?.json().await?;

        let body = read_all(source).await?;
        let client = self.http.get_client().await;
        check(client.put(&link.href).body(body).send().await?, yandex_message).await?;
        Ok(())
    }

    async fn move_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        self.transfer("move", from, to, overwrite).await
    }

    async fn copy_resource(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        self.transfer("copy", from, to, overwrite).await
    }

    async fn save_from_url(&self, url: &str, path: &str) -> Result<()> {
        let req = self
            .request(Method::POST, "/resources/upload")
            .await?
            .query(&[("url", url.to_string()), ("path", normalize_path(path))]);
        let resp = self.send(req).await?;
        self.settle(resp).await
    }

    async fn clean_trash(&self) -> Result<()> {
        let resp = self
            .send(self.request(Method::DELETE, "/trash/resources").await?)
            .await?;
        self.settle(resp).await
    }

    async fn delete_from_trash(&self, path: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, "/trash/resources")
            .await?
            .query(&[("path", normalize_path(path))]);
        let resp = self.send(req).await?;
        self.settle(resp).await
    }

    async fn run_command(&self, path: &str, args: &[String]) -> Result<()> {
        match RemoteCommand::parse(args)? {
            RemoteCommand::Download { url, name } => {
                self.save_from_url(&url, &join_path(path, &name)).await
            }
            RemoteCommand::TrashClean => self.clean_trash().await,
            RemoteCommand::Zip { .. } => Err(unsupported(KEY, "zip")),
            other => Err(CloudError::CommandNotSupported(other.verb().to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
