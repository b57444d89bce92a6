//! Host-facing virtual filesystem.
//!
//! `/` lists connections, `/<conn>` is a connection's remote root, and
//! `/<conn>/.Trash/...` browses that provider's trash. Connection-level
//! mkdir, rmdir and rename manage the connection records themselves.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::auth::ConnectionManager;
use crate::cloud::command::RemoteCommand;
use crate::cloud::registry;
use crate::cloud::upload::UploadSource;
use crate::cloud::{normalize_path, DiskInfo, Resource, Resources, ServiceClient, TRASH_DIR};
use crate::config::Connection;
use crate::errors::{CloudError, Result};
use crate::fileops;

/// Result code reported back to the host for a filesystem operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsStatus {
    Ok,
    Exists,
    ReadError,
    WriteError,
    UserAbort,
    NotSupported,
}

impl FsStatus {
    pub fn from_error(err: &CloudError, write: bool) -> Self {
        if err.is_conflict() {
            FsStatus::Exists
        } else if err.is_auth() {
            FsStatus::UserAbort
        } else if err.is_unsupported() || matches!(err, CloudError::CommandNotSupported(_)) {
            FsStatus::NotSupported
        } else if write {
            FsStatus::WriteError
        } else {
            FsStatus::ReadError
        }
    }

    pub fn of<T>(result: &Result<T>, write: bool) -> Self {
        match result {
            Ok(_) => FsStatus::Ok,
            Err(e) => FsStatus::from_error(e, write),
        }
    }
}

/// Split `/conn/a/b` into `("conn", "/a/b")`. The root has no connection.
pub fn split_virtual_path(path: &str) -> Option<(String, String)> {
    let normalized = normalize_path(path);
    let trimmed = normalized.trim_start_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('/') {
        Some((conn, rest)) => Some((conn.to_string(), normalize_path(rest))),
        None => Some((trimmed.to_string(), "/".to_string())),
    }
}

/// `/.Trash/x` is `/x` inside the trash.
fn trash_relative(remote: &str) -> Option<String> {
    let rest = remote.strip_prefix('/')?.strip_prefix(TRASH_DIR)?;
    if rest.is_empty() {
        Some("/".to_string())
    } else if rest.starts_with('/') {
        Some(normalize_path(rest))
    } else {
        None
    }
}

enum Target {
    Root,
    Connection(String),
    Remote { conn: String, path: String },
}

fn target(path: &str) -> Target {
    match split_virtual_path(path) {
        None => Target::Root,
        Some((conn, remote)) if remote == "/" => Target::Connection(conn),
        Some((conn, path)) => Target::Remote { conn, path },
    }
}

/// What `execute` asks the host to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Done,
    /// Navigate to this virtual path.
    Symlink(String),
}

/// Options for a transfer between the local disk and a connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferFlags {
    pub overwrite: bool,
    /// Continue a partial transfer. Always refused.
    pub resume: bool,
    /// Delete the source after a successful transfer.
    pub move_source: bool,
}

/// Maps host operations onto connections and their adapters.
pub struct CloudFs {
    manager: Arc<ConnectionManager>,
}

impl CloudFs {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// List `path`. The root lists connections as directories.
    pub async fn list(&self, path: &str) -> Result<Resources> {
        let (conn, remote) = match split_virtual_path(path) {
            None => return Ok(self.connection_entries().await),
            Some(parts) => parts,
        };
        let client = self.manager.client_for(&conn).await?;
        match trash_relative(&remote) {
            Some(inner) => client.get_resources(&inner, true).await,
            None => client.get_resources(&remote, false).await,
        }
    }

    async fn connection_entries(&self) -> Resources {
        let now = Utc::now();
        self.manager
            .store()
            .list()
            .await
            .into_iter()
            .map(|c| Resource::dir(c.name, now, now))
            .collect()
    }

    /// Create a folder, or a connection when `path` is `/<name>`.
    ///
    /// `service` is the provider key for a new connection.
    pub async fn mkdir(&self, path: &str, service: Option<&str>) -> Result<()> {
        match target(path) {
            Target::Root => Err(CloudError::InvalidArgument("cannot create /".into())),
            Target::Connection(name) => {
                let service = service.ok_or_else(|| {
                    CloudError::InvalidArgument(format!(
                        "a provider is required to create connection {name}"
                    ))
                })?;
                if registry::display_name(service).is_none() {
                    return Err(CloudError::UnknownProvider(service.to_string()));
                }
                self.manager
                    .store()
                    .add(Connection::new(name, service))
                    .await
            }
            Target::Remote { conn, path } => {
                if trash_relative(&path).is_some() {
                    return Err(CloudError::InvalidArgument(
                        "cannot create folders in the trash".into(),
                    ));
                }
                self.manager.client_for(&conn).await?.make_folder(&path).await
            }
        }
    }

    /// Remove a folder, or the connection record for `/<name>`.
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        match target(path) {
            Target::Root => Err(CloudError::InvalidArgument("cannot remove /".into())),
            Target::Connection(name) => {
                self.manager.store().remove(&name).await?;
                self.manager.forget(&name).await;
                tracing::info!(connection = %name, "Connection removed");
                Ok(())
            }
            Target::Remote { .. } => self.remove(path).await,
        }
    }

    /// Delete a remote resource. Under `.Trash` this erases it permanently.
    pub async fn remove(&self, path: &str) -> Result<()> {
        let Target::Remote { conn, path } = target(path) else {
            return Err(CloudError::InvalidArgument(
                "use rmdir to remove a connection".into(),
            ));
        };
        let client = self.manager.client_for(&conn).await?;
        match trash_relative(&path) {
            Some(inner) if inner == "/" => Err(CloudError::InvalidArgument(
                "cannot remove the trash itself".into(),
            )),
            Some(inner) => client.delete_from_trash(&inner).await,
            None => client.remove_resource(&path).await,
        }
    }

    /// Rename a connection (`/a` to `/b`) or move a remote resource.
    pub async fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        match (target(from), target(to)) {
            (Target::Connection(old), Target::Connection(new)) => {
                self.manager.store().rename(&old, &new).await?;
                self.manager.rename(&old, &new).await;
                Ok(())
            }
            _ => self.move_remote(from, to, overwrite).await,
        }
    }

    pub async fn move_remote(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let (client, from, to) = self.same_connection(from, to).await?;
        client.move_resource(&from, &to, overwrite).await
    }

    pub async fn copy_remote(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        let (client, from, to) = self.same_connection(from, to).await?;
        client.copy_resource(&from, &to, overwrite).await
    }

    async fn same_connection(
        &self,
        from: &str,
        to: &str,
    ) -> Result<(Arc<dyn ServiceClient>, String, String)> {
        match (target(from), target(to)) {
            (
                Target::Remote { conn: a, path: from },
                Target::Remote { conn: b, path: to },
            ) if a == b => {
                if trash_relative(&from).is_some() || trash_relative(&to).is_some() {
                    return Err(CloudError::InvalidArgument(
                        "cannot move or copy inside the trash".into(),
                    ));
                }
                Ok((self.manager.client_for(&a).await?, from, to))
            }
            (Target::Remote { .. }, Target::Remote { .. }) => Err(CloudError::InvalidArgument(
                "cannot move or copy between connections".into(),
            )),
            _ => Err(CloudError::InvalidArgument(
                "both paths must be inside a connection".into(),
            )),
        }
    }

    /// Download `remote` into `out`.
    pub async fn download(
        &self,
        remote: &str,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let (client, path) = self.remote_file(remote).await?;
        let written = client.download_file(&path, out).await?;
        out.flush().await?;
        Ok(written)
    }

    /// Download `remote` to the local file `local`.
    ///
    /// A partial local file is removed on failure. With `move_source` the
    /// remote file is deleted once the copy is complete.
    pub async fn get_file(
        &self,
        remote: &str,
        local: &Path,
        flags: TransferFlags,
        wrap: impl FnOnce(tokio::fs::File) -> Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Result<u64> {
        if flags.resume {
            return Err(crate::errors::unsupported("cloudfs", "resume"));
        }
        let file = fileops::create_local_file(local, flags.overwrite).await?;
        let mut out = wrap(file);
        let written = match self.download(remote, out.as_mut()).await {
            Ok(n) => n,
            Err(e) => {
                drop(out);
                if let Err(rm) = tokio::fs::remove_file(local).await {
                    tracing::warn!("Failed to remove partial file {}: {}", local.display(), rm);
                }
                return Err(e);
            }
        };
        drop(out);

        if flags.move_source {
            self.remove(remote).await?;
        }
        tracing::info!(remote, local = %local.display(), bytes = written, "Downloaded");
        Ok(written)
    }

    /// Upload `source` to `remote`.
    pub async fn upload(
        &self,
        remote: &str,
        source: &mut dyn UploadSource,
        overwrite: bool,
    ) -> Result<()> {
        let (client, path) = self.remote_file(remote).await?;
        client.upload_file(&path, source, overwrite).await
    }

    /// Upload the local file `local` to `remote`. With `move_source` the
    /// local file is deleted once the upload succeeds.
    pub async fn put_file(
        &self,
        local: &Path,
        remote: &str,
        flags: TransferFlags,
        wrap: impl FnOnce(tokio::fs::File) -> Box<dyn UploadSource>,
    ) -> Result<u64> {
        if flags.resume {
            return Err(crate::errors::unsupported("cloudfs", "resume"));
        }
        let file = tokio::fs::File::open(local).await?;
        let size = file.metadata().await?.len();
        let mut source = wrap(file);
        self.upload(remote, source.as_mut(), flags.overwrite).await?;
        drop(source);

        if flags.move_source {
            tokio::fs::remove_file(local).await?;
        }
        tracing::info!(local = %local.display(), remote, bytes = size, "Uploaded");
        Ok(size)
    }

    async fn remote_file(&self, remote: &str) -> Result<(Arc<dyn ServiceClient>, String)> {
        let Target::Remote { conn, path } = target(remote) else {
            return Err(CloudError::InvalidArgument(format!(
                "{remote} is not a file inside a connection"
            )));
        };
        if trash_relative(&path).is_some() {
            return Err(crate::errors::unsupported("cloudfs", "trash transfer"));
        }
        Ok((self.manager.client_for(&conn).await?, path))
    }

    /// Run a provider verb with `path` as the current folder.
    ///
    /// `trash` alone navigates to the connection's trash; everything else
    /// goes to the adapter.
    pub async fn execute(&self, path: &str, line: &str) -> Result<ExecOutcome> {
        let Some((conn, remote)) = split_virtual_path(path) else {
            return Err(CloudError::InvalidArgument(
                "commands run inside a connection".into(),
            ));
        };
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if RemoteCommand::parse(&args)? == RemoteCommand::TrashOpen {
            return Ok(ExecOutcome::Symlink(format!("/{conn}/{TRASH_DIR}")));
        }

        let client = self.manager.client_for(&conn).await?;
        client.run_command(&remote, &args).await?;
        Ok(ExecOutcome::Done)
    }

    pub async fn disk_info(&self, conn: &str) -> Result<DiskInfo> {
        self.manager.client_for(conn).await?.disk_info().await
    }
}
