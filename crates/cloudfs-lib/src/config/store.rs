use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use super::connection::{Connection, ConnectionsDocument};
use crate::errors::{CloudError, Result};
use crate::fileops::lock::FileLock;

const CONNECTIONS_FILE: &str = "connections.json";
const LOCK_WAIT: Duration = Duration::from_secs(5);

/// Thread-safe owner of the connections document with file persistence.
///
/// Loads `connections.json` from the configuration directory and persists
/// every mutation to disk while holding an advisory lock file.
pub struct ConfigStore {
    document: Arc<RwLock<ConnectionsDocument>>,
    path: PathBuf,
    lock: FileLock,
}

impl ConfigStore {
    /// Initialize the store.
    ///
    /// * If `config_dir` is `Some`, uses that directory for `connections.json`.
    /// * Otherwise uses the directory from [`super::Settings`].
    /// * Creates the file with an empty document when missing.
    /// * Falls back to an empty document on any read/parse error (logs a warning).
    pub async fn initialize(config_dir: Option<PathBuf>) -> Result<Self> {
        let dir = config_dir.unwrap_or_else(|| super::Settings::get().config_dir.clone());
        let path = dir.join(CONNECTIONS_FILE);
        let lock = FileLock::new(dir.join(format!("{CONNECTIONS_FILE}.lock")));
        let document = Self::load_or_create(&path, &lock).await;

        Ok(Self {
            document: Arc::new(RwLock::new(document)),
            path,
            lock,
        })
    }

    /// Absolute path of the connections document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A snapshot of the whole document.
    pub async fn document(&self) -> ConnectionsDocument {
        self.document.read().await.clone()
    }

    /// All connections, in stored order.
    pub async fn list(&self) -> Vec<Connection> {
        self.document.read().await.connections.clone()
    }

    pub async fn get(&self, name: &str) -> Result<Connection> {
        self.document
            .read()
            .await
            .find(name)
            .cloned()
            .ok_or_else(|| CloudError::ConnectionNotFound(name.to_string()))
    }

    /// Append a connection. Names are unique.
    pub async fn add(&self, connection: Connection) -> Result<()> {
        if connection.name.is_empty() || connection.name.contains('/') {
            return Err(CloudError::InvalidArgument(format!(
                "invalid connection name: {:?}",
                connection.name
            )));
        }
        let mut doc = self.document.write().await;
        if doc.contains(&connection.name) {
            return Err(CloudError::ConnectionExists(connection.name));
        }
        tracing::info!(name = %connection.name, service = %connection.service, "Adding connection");
        let mut next = doc.clone();
        next.connections.push(connection);
        self.commit(&mut doc, next).await
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() || new.contains('/') {
            return Err(CloudError::InvalidArgument(format!(
                "invalid connection name: {new:?}"
            )));
        }
        let mut doc = self.document.write().await;
        if old != new && doc.contains(new) {
            return Err(CloudError::ConnectionExists(new.to_string()));
        }
        let mut next = doc.clone();
        let conn = next
            .find_mut(old)
            .ok_or_else(|| CloudError::ConnectionNotFound(old.to_string()))?;
        conn.name = new.to_string();
        self.commit(&mut doc, next).await
    }

    pub async fn remove(&self, name: &str) -> Result<Connection> {
        let mut doc = self.document.write().await;
        let idx = doc
            .connections
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| CloudError::ConnectionNotFound(name.to_string()))?;
        let mut next = doc.clone();
        let removed = next.connections.remove(idx);
        self.commit(&mut doc, next).await?;
        Ok(removed)
    }

    /// Mutate one connection and persist the document.
    pub async fn update<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Connection),
    {
        let mut doc = self.document.write().await;
        let mut next = doc.clone();
        let conn = next
            .find_mut(name)
            .ok_or_else(|| CloudError::ConnectionNotFound(name.to_string()))?;
        f(conn);
        if conn.name != name {
            return Err(CloudError::InvalidArgument(
                "use rename to change a connection name".into(),
            ));
        }
        self.commit(&mut doc, next).await
    }

    // ── private helpers ──────────────────────────────────────────────

    async fn load_or_create(path: &Path, lock: &FileLock) -> ConnectionsDocument {
        if path.exists() {
            match tokio::fs::read_to_string(path).await {
                Ok(contents) => match serde_json::from_str::<ConnectionsDocument>(&contents) {
                    Ok(doc) => return doc,
                    Err(e) => {
                        tracing::warn!(
                            "Failed to parse connections file {}: {}. Using an empty document.",
                            path.display(),
                            e
                        );
                        // Left on disk until the next successful write replaces it.
                        return ConnectionsDocument::default();
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        "Failed to read connections file {}: {}. Using an empty document.",
                        path.display(),
                        e
                    );
                    return ConnectionsDocument::default();
                }
            }
        }

        let defaults = ConnectionsDocument::default();
        if let Err(e) = Self::write_document(path, lock, &defaults).await {
            tracing::warn!(
                "Failed to create connections file {}: {}",
                path.display(),
                e
            );
        }
        defaults
    }

    /// Persist `next`, then make it the in-memory document. A failed write
    /// leaves memory as it was.
    async fn commit(&self, current: &mut ConnectionsDocument, next: ConnectionsDocument) -> Result<()> {
        Self::write_document(&self.path, &self.lock, &next).await?;
        *current = next;
        Ok(())
    }

    /// Serialize with four-space indentation and write under the lock file.
    async fn write_document(path: &Path, lock: &FileLock, doc: &ConnectionsDocument) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CloudError::Config(format!("Failed to create config dir: {e}")))?;
        }

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        doc.serialize(&mut ser)
            .map_err(|e| CloudError::Config(format!("Failed to serialize connections: {e}")))?;

        let _guard = lock.wait(LOCK_WAIT).await?;
        tokio::fs::write(path, buf)
            .await
            .map_err(|e| CloudError::Config(format!("Failed to write connections file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::connection::SaveType;

    async fn setup() -> (tempfile::TempDir, ConfigStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = ConfigStore::initialize(Some(tmp.path().to_path_buf()))
            .await
            .unwrap();
        (tmp, store)
    }

    fn read_back(tmp: &tempfile::TempDir) -> ConnectionsDocument {
        let contents = std::fs::read_to_string(tmp.path().join(CONNECTIONS_FILE)).unwrap();
        serde_json::from_str(&contents).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_creates_empty_document() {
        let (tmp, store) = setup().await;
        assert!(store.path().exists());
        let doc = read_back(&tmp);
        assert_eq!(doc.version, 0);
        assert!(doc.connections.is_empty());
    }

    #[tokio::test]
    async fn test_document_uses_four_space_indent() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("work", "dummy")).await.unwrap();
        let raw = std::fs::read_to_string(tmp.path().join(CONNECTIONS_FILE)).unwrap();
        assert!(raw.contains("\n    \"version\": 0"));
    }

    #[tokio::test]
    async fn test_initialize_loads_existing_document() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join(CONNECTIONS_FILE),
            r#"{"version":0,"connections":[{"name":"a","service":"yandex"}]}"#,
        )
        .unwrap();

        let store = ConfigStore::initialize(Some(tmp.path().to_path_buf()))
            .await
            .unwrap();
        let conn = store.get("a").await.unwrap();
        assert_eq!(conn.service, "yandex");
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_and_is_kept() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join(CONNECTIONS_FILE);
        std::fs::write(&path, "not json").unwrap();

        let store = ConfigStore::initialize(Some(tmp.path().to_path_buf()))
            .await
            .unwrap();
        assert!(store.list().await.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[tokio::test]
    async fn test_add_persists_and_rejects_duplicates() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("work", "dummy")).await.unwrap();
        assert_eq!(read_back(&tmp).connections.len(), 1);

        let err = store.add(Connection::new("work", "yandex")).await.unwrap_err();
        assert!(matches!(err, CloudError::ConnectionExists(ref n) if n == "work"));
        assert!(err.to_string().contains("Connection with such name already exists"));
    }

    #[tokio::test]
    async fn test_add_rejects_names_with_slash() {
        let (_tmp, store) = setup().await;
        let err = store.add(Connection::new("a/b", "dummy")).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_rename() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("a", "dummy")).await.unwrap();
        store.add(Connection::new("b", "dummy")).await.unwrap();

        let err = store.rename("a", "b").await.unwrap_err();
        assert!(matches!(err, CloudError::ConnectionExists(_)));

        store.rename("a", "c").await.unwrap();
        let names: Vec<_> = read_back(&tmp).connections.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["c", "b"]);

        let err = store.rename("missing", "d").await.unwrap_err();
        assert!(matches!(err, CloudError::ConnectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("a", "dummy")).await.unwrap();
        let removed = store.remove("a").await.unwrap();
        assert_eq!(removed.name, "a");
        assert!(read_back(&tmp).connections.is_empty());
        assert!(store.remove("a").await.is_err());
    }

    #[tokio::test]
    async fn test_update_persists_token() {
        let (tmp, store) = setup().await;
        let mut conn = Connection::new("a", "yandex");
        conn.save_type = SaveType::Config;
        store.add(conn).await.unwrap();

        store
            .update("a", |c| c.oauth_token = Some("tok".into()))
            .await
            .unwrap();
        assert_eq!(
            read_back(&tmp).connections[0].oauth_token.as_deref(),
            Some("tok")
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("a", "dummy")).await.unwrap();

        // A directory where the document belongs makes every write fail.
        let path = tmp.path().join(CONNECTIONS_FILE);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        assert!(matches!(
            store.add(Connection::new("b", "dummy")).await.unwrap_err(),
            CloudError::Config(_)
        ));
        assert!(store.rename("a", "c").await.is_err());
        assert!(store.remove("a").await.is_err());
        assert!(store
            .update("a", |c| c.oauth_token = Some("tok".into()))
            .await
            .is_err());

        let names: Vec<_> = store.list().await.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(store.get("a").await.unwrap().oauth_token, None);
    }

    #[tokio::test]
    async fn test_update_cannot_rename() {
        let (_tmp, store) = setup().await;
        store.add(Connection::new("a", "dummy")).await.unwrap();
        let err = store.update("a", |c| c.name = "z".into()).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidArgument(_)));
        assert!(store.get("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_file_released_after_write() {
        let (tmp, store) = setup().await;
        store.add(Connection::new("a", "dummy")).await.unwrap();
        assert!(!tmp.path().join("connections.json.lock").exists());
    }
}
