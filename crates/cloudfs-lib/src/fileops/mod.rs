//! Local file helpers for transfers.

use std::path::Path;

use tokio::fs::{File, OpenOptions};

use crate::errors::Result;

pub mod lock;

/// Create `path` for writing, refusing to clobber an existing file.
///
/// An existing file surfaces as an `AlreadyExists` I/O error, which
/// [`crate::errors::CloudError::is_conflict`] reports as a conflict.
pub async fn create_new_file(path: &Path) -> Result<File> {
    ensure_parent(path).await?;
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    Ok(file)
}

/// Create or truncate `path` when `overwrite` is set, else behave like [`create_new_file`].
pub async fn create_local_file(path: &Path, overwrite: bool) -> Result<File> {
    if !overwrite {
        return create_new_file(path).await;
    }
    ensure_parent(path).await?;
    Ok(File::create(path).await?)
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}
