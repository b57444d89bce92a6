//! Virtual path to provider id mapping for id-addressed providers.
//!
//! Entries are added while folders are listed and never evicted. A remote
//! rename or move made outside this process leaves stale entries behind
//! until restart.
//!
//! The cache lives on the shared provider adapter, so it describes one
//! account at a time. It is cleared when a different connection binds the
//! adapter.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::RwLock;

use super::{join_path, normalize_path};
use crate::errors::{CloudError, Result};

#[derive(Debug, Clone)]
pub struct PathCache {
    root_id: String,
    ids: HashMap<String, String>,
}

impl PathCache {
    pub fn new(root_id: impl Into<String>) -> Self {
        let root_id = root_id.into();
        let mut ids = HashMap::new();
        ids.insert("/".to_string(), root_id.clone());
        Self { root_id, ids }
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Register the child `name` of `parent`.
    pub fn insert_child(&mut self, parent: &str, name: &str, id: impl Into<String>) {
        self.ids.insert(join_path(parent, name), id.into());
    }

    pub fn insert(&mut self, path: &str, id: impl Into<String>) {
        self.ids.insert(normalize_path(path), id.into());
    }

    pub fn lookup(&self, path: &str) -> Option<&str> {
        self.ids.get(&normalize_path(path)).map(String::as_str)
    }

    /// Cached id, or the root id when the path was never listed.
    pub fn resolve(&self, path: &str) -> &str {
        self.lookup(path).unwrap_or(&self.root_id)
    }

    /// Drop `path` and everything beneath it.
    pub fn forget(&mut self, path: &str) {
        let path = normalize_path(path);
        if path == "/" {
            return;
        }
        let prefix = format!("{path}/");
        self.ids.retain(|k, _| k != &path && !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Id of `path`, calling `list_folder` on each uncached ancestor from the
/// root down. Listing a folder is expected to register its children.
pub async fn resolve_with<F, Fut>(
    cache: &RwLock<PathCache>,
    path: &str,
    mut list_folder: F,
) -> Result<String>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let path = normalize_path(path);
    if let Some(id) = cache.read().await.lookup(&path) {
        return Ok(id.to_string());
    }

    let mut current = "/".to_string();
    for part in path.trim_start_matches('/').split('/') {
        let next = join_path(&current, part);
        if cache.read().await.lookup(&next).is_none() {
            list_folder(current.clone()).await?;
            if cache.read().await.lookup(&next).is_none() {
                return Err(CloudError::NotFound(format!("Cannot find file ID: {next}")));
            }
        }
        current = next;
    }

    let id = cache.read().await.lookup(&path).map(str::to_string);
    id.ok_or_else(|| CloudError::NotFound(format!("Cannot find file ID: {path}")))
}

/// Where to list `path`: the folder id, and whether the returned children
/// belong under `path` in the cache.
///
/// A folder that cannot be resolved is listed at the root id, but its
/// children are not cached under the unresolved path.
pub async fn listing_target<F, Fut>(
    cache: &RwLock<PathCache>,
    path: &str,
    list_folder: F,
) -> Result<(String, bool)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match resolve_with(cache, path, list_folder).await {
        Ok(id) => Ok((id, true)),
        Err(CloudError::NotFound(_)) => {
            tracing::warn!(path = %normalize_path(path), "Folder not found, listing root");
            Ok((cache.read().await.root_id().to_string(), false))
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_root_is_preregistered() {
        let cache = PathCache::new("root");
        assert_eq!(cache.lookup("/"), Some("root"));
        assert_eq!(cache.resolve(""), "root");
    }

    #[test]
    fn test_children_keyed_without_double_slash() {
        let mut cache = PathCache::new("root");
        cache.insert_child("/", "docs", "id-docs");
        cache.insert_child("/docs", "a.txt", "id-a");
        assert_eq!(cache.lookup("/docs"), Some("id-docs"));
        assert_eq!(cache.lookup("/docs/a.txt"), Some("id-a"));
        assert_eq!(cache.lookup("//docs"), Some("id-docs"));
    }

    #[test]
    fn test_unlisted_path_falls_back_to_root() {
        let cache = PathCache::new("root");
        assert_eq!(cache.lookup("/never/listed"), None);
        assert_eq!(cache.resolve("/never/listed"), "root");
    }

    #[test]
    fn test_forget_subtree() {
        let mut cache = PathCache::new("root");
        cache.insert("/a", "1");
        cache.insert("/a/b", "2");
        cache.insert("/ab", "3");
        cache.forget("/a");
        assert_eq!(cache.lookup("/a"), None);
        assert_eq!(cache.lookup("/a/b"), None);
        assert_eq!(cache.lookup("/ab"), Some("3"));
        cache.forget("/");
        assert_eq!(cache.lookup("/"), Some("root"));
    }

    #[tokio::test]
    async fn test_resolve_with_lists_only_missing_ancestors() {
        let cache = RwLock::new(PathCache::new("root"));
        cache.write().await.insert("/a", "id-a");
        let listed = std::sync::Mutex::new(Vec::new());

        let id = resolve_with(&cache, "/a/b/c", |dir| {
            listed.lock().unwrap().push(dir.clone());
            let cache = &cache;
            async move {
                let child = if dir == "/a" { "b" } else { "c" };
                cache.write().await.insert_child(&dir, child, format!("id-{child}"));
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(id, "id-c");
        assert_eq!(*listed.lock().unwrap(), vec!["/a".to_string(), "/a/b".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_with_reports_missing_component() {
        let cache = RwLock::new(PathCache::new("root"));
        let err = resolve_with(&cache, "/nope/x", |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotFound(ref m) if m.ends_with("/nope")));
    }

    #[tokio::test]
    async fn test_listing_target_caches_only_resolved_folders() {
        let cache = RwLock::new(PathCache::new("root"));
        let found = listing_target(&cache, "/docs", |dir| {
            let cache = &cache;
            async move {
                cache.write().await.insert_child(&dir, "docs", "id-docs");
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(found, ("id-docs".to_string(), true));

        let missing = listing_target(&cache, "/ghost", |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(missing, ("root".to_string(), false));
    }

    proptest! {
        #[test]
        fn listed_children_never_resolve_to_root(
            parent in "(/[a-z]{1,6}){0,3}",
            names in prop::collection::hash_set("[a-z0-9]{1,8}", 1..10),
        ) {
            let mut cache = PathCache::new("root");
            let parent = if parent.is_empty() { "/".to_string() } else { parent };
            for (i, name) in names.iter().enumerate() {
                cache.insert_child(&parent, name, format!("id{i}"));
            }
            for (i, name) in names.iter().enumerate() {
                let key = join_path(&parent, name);
                let expected = format!("id{i}");
                prop_assert_eq!(cache.resolve(&key), expected.as_str());
            }
        }
    }
}
