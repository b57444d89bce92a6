//! No-op provider for exercising the host without an account.

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWrite;

use super::upload::UploadSource;
use super::{normalize_path, DiskInfo, Resource, Resources, ServiceClient};
use crate::errors::{CloudError, Result};

const KEY: &str = "dummy";

/// Three fixed folders at the root, nothing anywhere else. Writes succeed
/// without effect. Needs no token.
#[derive(Debug, Default)]
pub struct DummyClient;

impl DummyClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceClient for DummyClient {
    fn key(&self) -> &'static str {
        KEY
    }

    fn display_name(&self) -> &'static str {
        "Dummy"
    }

    async fn set_oauth_token(&self, _token: &str) -> Result<()> {
        Ok(())
    }

    async fn disk_info(&self) -> Result<DiskInfo> {
        Ok(DiskInfo::default())
    }

    async fn get_resources(&self, path: &str, is_trash: bool) -> Result<Resources> {
        if is_trash {
            return Err(crate::errors::unsupported(KEY, "trash"));
        }
        if normalize_path(path) != "/" {
            return Ok(Resources::new());
        }
        let now = Utc::now();
        Ok(["dummy1", "dummy2", "dummy3"]
            .into_iter()
            .map(|name| Resource {
                size: 200,
                ..Resource::dir(name, now, now)
            })
            .collect())
    }

    async fn make_folder(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_resource(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn download_file(
        &self,
        _path: &str,
        _out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        Ok(0)
    }

    async fn upload_file(
        &self,
        _path: &str,
        _source: &mut dyn UploadSource,
        _overwrite: bool,
    ) -> Result<()> {
        Ok(())
    }

    async fn move_resource(&self, _from: &str, _to: &str, _overwrite: bool) -> Result<()> {
        Ok(())
    }

    async fn copy_resource(&self, _from: &str, _to: &str, _overwrite: bool) -> Result<()> {
        Ok(())
    }

    async fn run_command(&self, _path: &str, args: &[String]) -> Result<()> {
        let verb = args.first().cloned().unwrap_or_default();
        Err(CloudError::CommandNotSupported(verb))
    }
}
