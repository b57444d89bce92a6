//! Provider key to adapter lookup.
//!
//! One adapter instance per provider, created on first use and shared by
//! every connection of that provider.

use std::sync::Arc;

use tokio::sync::OnceCell;

use super::dropbox::DropboxClient;
use super::dummy::DummyClient;
use super::gdrive::GDriveClient;
use super::onedrive::OneDriveClient;
use super::yandex::YandexClient;
use super::ServiceClient;
use crate::errors::{CloudError, Result};
use crate::http_client::HttpClient;

/// Known provider keys and their display names, in presentation order.
pub const PROVIDERS: &[(&str, &str)] = &[
    ("yandex", "Yandex Disk"),
    ("dropbox", "Dropbox"),
    ("gdrive", "Google Drive"),
    ("onedrive", "OneDrive"),
    ("dummy", "Dummy"),
];

/// Display name for `key`, if it is a known provider.
pub fn display_name(key: &str) -> Option<&'static str> {
    PROVIDERS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, name)| *name)
}

/// Central holder for lazily-initialized provider adapters.
///
/// Created once at startup. Adapters are built on first request, so an
/// unused provider never touches the network or its OAuth settings.
pub struct ServiceRegistry {
    pub http_client: HttpClient,
    yandex: OnceCell<Arc<YandexClient>>,
    dropbox: OnceCell<Arc<DropboxClient>>,
    gdrive: OnceCell<Arc<GDriveClient>>,
    onedrive: OnceCell<Arc<OneDriveClient>>,
    dummy: OnceCell<Arc<DummyClient>>,
}

impl ServiceRegistry {
    /// Create a new `ServiceRegistry`. No adapters are initialized yet.
    pub fn new(http_client: HttpClient) -> Self {
        Self {
            http_client,
            yandex: OnceCell::new(),
            dropbox: OnceCell::new(),
            gdrive: OnceCell::new(),
            onedrive: OnceCell::new(),
            dummy: OnceCell::new(),
        }
    }

    /// The shared adapter for provider `key`.
    ///
    /// Unknown keys are an error rather than a silent fallback.
    pub async fn get(&self, key: &str) -> Result<Arc<dyn ServiceClient>> {
        let client: Arc<dyn ServiceClient> = match key {
            "yandex" => self.yandex().await?.clone(),
            "dropbox" => self.dropbox().await?.clone(),
            "gdrive" => self.gdrive().await?.clone(),
            "onedrive" => self.onedrive().await?.clone(),
            "dummy" => self.dummy().await?.clone(),
            other => return Err(CloudError::UnknownProvider(other.to_string())),
        };
        Ok(client)
    }

    pub async fn yandex(&self) -> Result<&Arc<YandexClient>> {
        self.yandex
            .get_or_try_init(|| async {
                tracing::debug!(service = "yandex", "Initializing adapter");
                Ok(Arc::new(YandexClient::new(self.http_client.clone())))
            })
            .await
    }

    pub async fn dropbox(&self) -> Result<&Arc<DropboxClient>> {
        self.dropbox
            .get_or_try_init(|| async {
                tracing::debug!(service = "dropbox", "Initializing adapter");
                Ok(Arc::new(DropboxClient::new(self.http_client.clone())))
            })
            .await
    }

    pub async fn gdrive(&self) -> Result<&Arc<GDriveClient>> {
        self.gdrive
            .get_or_try_init(|| async {
                tracing::debug!(service = "gdrive", "Initializing adapter");
                Ok(Arc::new(GDriveClient::new(self.http_client.clone())))
            })
            .await
    }

    pub async fn onedrive(&self) -> Result<&Arc<OneDriveClient>> {
        self.onedrive
            .get_or_try_init(|| async {
                tracing::debug!(service = "onedrive", "Initializing adapter");
                Ok(Arc::new(OneDriveClient::new(self.http_client.clone())))
            })
            .await
    }

    pub async fn dummy(&self) -> Result<&Arc<DummyClient>> {
        self.dummy
            .get_or_try_init(|| async { Ok(Arc::new(DummyClient::new())) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry() -> ServiceRegistry {
        ServiceRegistry::new(HttpClient::from_defaults().unwrap())
    }

    #[tokio::test]
    async fn test_every_listed_provider_resolves() {
        let registry = make_registry();
        for (key, name) in PROVIDERS {
            let client = registry.get(key).await.unwrap();
            assert_eq!(client.key(), *key);
            assert_eq!(client.display_name(), *name);
        }
    }

    #[tokio::test]
    async fn test_same_instance_per_provider() {
        let registry = make_registry();
        let a = registry.get("yandex").await.unwrap();
        let b = registry.get("yandex").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_an_error() {
        let registry = make_registry();
        let err = registry.get("box").await.err().unwrap();
        assert!(matches!(err, CloudError::UnknownProvider(ref k) if k == "box"));
    }

    #[test]
    fn test_display_name_lookup() {
        assert_eq!(display_name("gdrive"), Some("Google Drive"));
        assert_eq!(display_name("nope"), None);
    }
}
