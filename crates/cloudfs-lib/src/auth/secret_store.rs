//! Token persistence for connections using `save_type = password_manager`.
//!
//! The file-backed store keeps one directory per connection:
//! `<config dir>/secrets/<name>/credentials.json`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::errors::{CloudError, Result};

const CREDENTIALS_FILE: &str = "credentials.json";

/// Opaque key to secret storage, keyed by connection name.
///
/// `load` returning `Ok(None)` means "not stored". Callers treat a load error
/// the same way and fall back to acquiring a fresh token.
pub trait SecretStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>>;
    fn save(&self, key: &str, secret: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let secrets = self.secrets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(secrets.get(key).cloned())
    }

    fn save(&self, key: &str, secret: &str) -> Result<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(PoisonError::into_inner);
        secrets.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut secrets = self.secrets.lock().unwrap_or_else(PoisonError::into_inner);
        secrets.remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    oauth_token: String,
}

/// One `credentials.json` per connection under a base directory.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    base_path: PathBuf,
}

impl FileSecretStore {
    /// Store rooted at `<config dir>/secrets`.
    pub fn new() -> Self {
        Self::with_base(Settings::get().secrets_dir())
    }

    pub fn with_base(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn credentials_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(CloudError::InvalidArgument(format!(
                "invalid secret key: {key:?}"
            )));
        }
        Ok(self.base_path.join(key).join(CREDENTIALS_FILE))
    }
}

impl Default for FileSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretStore for FileSecretStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.credentials_path(key)?;
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CloudError::Config(format!(
                    "Failed to read credentials for '{}': {}",
                    key, e
                )))
            }
        };
        let creds: StoredCredentials = serde_json::from_str(&data)?;
        Ok(Some(creds.oauth_token).filter(|t| !t.is_empty()))
    }

    fn save(&self, key: &str, secret: &str) -> Result<()> {
        let path = self.credentials_path(key)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                CloudError::Config(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        let data = serde_json::to_string_pretty(&StoredCredentials {
            oauth_token: secret.to_string(),
        })?;
        std::fs::write(&path, data)
            .map_err(|e| CloudError::Config(format!("Failed to write credentials: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(key, "Stored token in secret store");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.credentials_path(key)?;
        let Some(dir) = path.parent() else {
            return Ok(());
        };
        match std::fs::remove_dir_all(dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemorySecretStore::new();
        assert_eq!(store.load("work").unwrap(), None);
        store.save("work", "tok").unwrap();
        assert_eq!(store.load("work").unwrap().as_deref(), Some("tok"));
        store.remove("work").unwrap();
        assert_eq!(store.load("work").unwrap(), None);
    }

    #[test]
    fn test_file_store_layout() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::with_base(tmp.path());
        store.save("work", "tok-1").unwrap();

        let path = tmp.path().join("work").join(CREDENTIALS_FILE);
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["oauth_token"], "tok-1");
        assert_eq!(store.load("work").unwrap().as_deref(), Some("tok-1"));
    }

    #[test]
    fn test_file_store_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::with_base(tmp.path());
        assert_eq!(store.load("nobody").unwrap(), None);
        store.remove("nobody").unwrap();
    }

    #[test]
    fn test_file_store_overwrites_and_removes() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::with_base(tmp.path());
        store.save("work", "old").unwrap();
        store.save("work", "new").unwrap();
        assert_eq!(store.load("work").unwrap().as_deref(), Some("new"));

        store.remove("work").unwrap();
        assert!(!tmp.path().join("work").exists());
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::with_base(tmp.path());
        assert!(store.save("../escape", "x").is_err());
        assert!(store.load("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_store_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::with_base(tmp.path());
        store.save("work", "tok").unwrap();
        let mode = std::fs::metadata(tmp.path().join("work").join(CREDENTIALS_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
