//! Shared HTTP client with connection pooling.
//!
//! Wraps `reqwest::Client`; clones share one pool. Every provider adapter
//! created by the registry receives a clone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::Settings;
use crate::errors::{CloudError, Result};

const USER_AGENT: &str = concat!("cloudfs/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<RwLock<reqwest::Client>>,
}

impl HttpClient {
    /// Build a new `HttpClient` configured from `settings`.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Self::build_client(settings)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(client)),
        })
    }

    /// Build an `HttpClient` using `Settings::default()`.
    pub fn from_defaults() -> Result<Self> {
        Self::new(&Settings::default())
    }

    /// Get a clone of the current `reqwest::Client`.
    pub async fn get_client(&self) -> reqwest::Client {
        self.inner.read().await.clone()
    }

    /// Rebuild the inner client, e.g. after timeouts change.
    pub async fn rebuild(&self, settings: &Settings) -> Result<()> {
        let new_client = Self::build_client(settings)?;
        *self.inner.write().await = new_client;
        Ok(())
    }

    /// Redirects are followed by default; Yandex and OneDrive downloads rely on it.
    /// A per-read timeout instead of a total one keeps large transfers alive.
    fn build_client(settings: &Settings) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .read_timeout(Duration::from_secs(settings.read_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(settings.pool_idle_timeout_secs))
            .build()
            .map_err(CloudError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_defaults() {
        let client = HttpClient::from_defaults().expect("should build from defaults");
        let _inner = client.get_client().await;
    }

    #[tokio::test]
    async fn test_rebuild_is_visible_through_clones() {
        let client = HttpClient::from_defaults().expect("should build");
        let cloned = client.clone();

        let settings = Settings {
            read_timeout_secs: 5,
            pool_max_idle_per_host: 1,
            ..Settings::default()
        };
        client.rebuild(&settings).await.expect("should rebuild");

        assert!(Arc::ptr_eq(&client.inner, &cloned.inner));
        let _inner = cloned.get_client().await;
    }
}
