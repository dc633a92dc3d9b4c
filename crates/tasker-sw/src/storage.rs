//! Cache storage backends.
//!
//! The controller never touches a global cache registry; it is handed a
//! [`CacheStorage`] and addresses caches by identifier through it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::{CacheEntry, RequestKey, SwError};

/// Persistent store of named caches (the `caches` global).
///
/// Implementations provide their own synchronization: any number of
/// concurrent lookups may run alongside a single writer.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a cache, creating it if it does not exist.
    async fn open(&self, name: &str) -> Result<(), SwError>;

    /// Check if a cache exists.
    async fn has(&self, name: &str) -> Result<bool, SwError>;

    /// Store every entry in one step. Either all entries become visible or
    /// none do. Entries replace existing ones with the same key.
    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), SwError>;

    /// Look up a request by exact key.
    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, SwError>;

    /// Keys of every entry in a cache, sorted. Empty if the cache is missing.
    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError>;

    /// Names of all caches, sorted.
    async fn keys(&self) -> Result<Vec<String>, SwError>;

    /// Delete a cache. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool, SwError>;
}

// ==================== Cache ====================

/// A single cache generation.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// Sorted entry keys.
    pub fn keys(&self) -> Vec<RequestKey> {
        let mut keys: Vec<_> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }
}

fn sorted_names(caches: &HashMap<String, Cache>) -> Vec<String> {
    let mut names: Vec<_> = caches.keys().cloned().collect();
    names.sort();
    names
}

// ==================== Memory Storage ====================

/// In-process cache storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStorage {
    caches: Arc<RwLock<HashMap<String, Cache>>>,
}

impl MemoryCacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name));
        for entry in entries {
            cache.put(entry);
        }
        trace!(cache = name, entries = cache.len(), "Cache populated");
        Ok(())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, SwError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError> {
        let caches = self.caches.read().await;
        Ok(caches.get(name).map(Cache::keys).unwrap_or_default())
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        Ok(sorted_names(&*self.caches.read().await))
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }
}

// ==================== Disk Storage ====================

const CACHE_FILE_EXTENSION: &str = "json";

/// On-disk representation of one cache.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    name: String,
    entries: Vec<CacheEntry>,
}

/// Cache storage persisted as one JSON document per cache.
///
/// All caches are loaded into memory when the directory is opened; lookups
/// never touch the disk. Writes replace a cache file through a rename, so
/// a crash mid-write leaves the previous generation intact.
#[derive(Debug)]
pub struct DiskCacheStorage {
    dir: PathBuf,
    caches: RwLock<HashMap<String, Cache>>,
}

impl DiskCacheStorage {
    /// Open (or create) a storage directory and load every cache in it.
    ///
    /// Unreadable cache files are skipped with a warning and left on disk.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self, SwError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| storage_err(&dir, e))?;

        let mut caches = HashMap::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(|e| storage_err(&dir, e))?;
        while let Some(item) = read_dir.next_entry().await.map_err(|e| storage_err(&dir, e))? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CACHE_FILE_EXTENSION) {
                continue;
            }
            let raw = tokio::fs::read(&path).await.map_err(|e| storage_err(&path, e))?;
            let file: CacheFile = match serde_json::from_slice(&raw) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cache file");
                    continue;
                }
            };

            let mut cache = Cache::new(&file.name);
            for entry in file.entries {
                cache.put(entry);
            }
            debug!(cache = %cache.name, entries = cache.len(), "Loaded cache from disk");
            caches.insert(file.name, cache);
        }

        Ok(Self {
            dir,
            caches: RwLock::new(caches),
        })
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{CACHE_FILE_EXTENSION}", urlencoding::encode(name)))
    }

    async fn write_cache(&self, cache: &Cache) -> Result<(), SwError> {
        let mut entries: Vec<CacheEntry> = cache.entries().cloned().collect();
        entries.sort_by_key(CacheEntry::key);
        let file = CacheFile {
            name: cache.name.clone(),
            entries,
        };
        let json = serde_json::to_vec(&file).map_err(|e| SwError::Storage(e.to_string()))?;

        let path = self.path_for(&cache.name);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await.map_err(|e| storage_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| storage_err(&path, e))?;
        Ok(())
    }
}

fn storage_err(path: &Path, err: std::io::Error) -> SwError {
    SwError::Storage(format!("{}: {err}", path.display()))
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;
        if caches.contains_key(name) {
            return Ok(());
        }
        let cache = Cache::new(name);
        self.write_cache(&cache).await?;
        caches.insert(name.to_string(), cache);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, SwError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<(), SwError> {
        let mut caches = self.caches.write().await;

        // Build the next generation aside so a failed write leaves memory untouched.
        let mut next = caches.get(name).cloned().unwrap_or_else(|| Cache::new(name));
        for entry in entries {
            next.put(entry);
        }
        self.write_cache(&next).await?;

        trace!(cache = name, entries = next.len(), "Cache written to disk");
        caches.insert(name.to_string(), next);
        Ok(())
    }

    async fn match_request(
        &self,
        name: &str,
        key: &RequestKey,
    ) -> Result<Option<CacheEntry>, SwError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|cache| cache.match_request(key))
            .cloned())
    }

    async fn entry_keys(&self, name: &str) -> Result<Vec<RequestKey>, SwError> {
        let caches = self.caches.read().await;
        Ok(caches.get(name).map(Cache::keys).unwrap_or_default())
    }

    async fn keys(&self) -> Result<Vec<String>, SwError> {
        Ok(sorted_names(&*self.caches.read().await))
    }

    async fn delete(&self, name: &str) -> Result<bool, SwError> {
        let mut caches = self.caches.write().await;
        if caches.remove(name).is_none() {
            return Ok(false);
        }
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(storage_err(&path, e)),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            response_url: String::new(),
            status: 200,
            status_text: "OK".to_string(),
            headers: HashMap::new(),
            body: body.to_vec(),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://example.com/style.css", b"body{}"));

        assert!(cache
            .match_request(&RequestKey::get("https://example.com/style.css"))
            .is_some());
        assert!(cache
            .match_request(&RequestKey::get("https://example.com/other.css"))
            .is_none());
    }

    #[test]
    fn test_cache_put_replaces_same_key() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://example.com/a.js", b"old"));
        cache.put(entry("https://example.com/a.js", b"new"));

        assert_eq!(cache.len(), 1);
        let key = RequestKey::get("https://example.com/a.js");
        assert_eq!(cache.match_request(&key).unwrap().body, b"new");
    }

    #[test]
    fn test_cache_keys_sorted() {
        let mut cache = Cache::new("test");
        cache.put(entry("https://example.com/b.js", b""));
        cache.put(entry("https://example.com/a.js", b""));

        let keys = cache.keys();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].url, "https://example.com/a.js");
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryCacheStorage::new();

        assert!(!storage.has("v1").await.unwrap());
        storage.open("v1").await.unwrap();
        assert!(storage.has("v1").await.unwrap());
        assert!(storage.entry_keys("v1").await.unwrap().is_empty());

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_storage_put_all_and_match() {
        let storage = MemoryCacheStorage::new();
        storage
            .put_all(
                "v1",
                vec![
                    entry("https://example.com/", b"root"),
                    entry("https://example.com/index.html", b"index"),
                ],
            )
            .await
            .unwrap();

        let hit = storage
            .match_request("v1", &RequestKey::get("https://example.com/index.html"))
            .await
            .unwrap();
        assert_eq!(hit.unwrap().body, b"index");

        let miss = storage
            .match_request("v2", &RequestKey::get("https://example.com/index.html"))
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn test_disk_storage_persists() {
        let dir = tempfile::tempdir().unwrap();

        {
            let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
            storage
                .put_all(
                    "tasker-v1",
                    vec![entry("https://example.com/index.html", &[0, 159, 146, 150])],
                )
                .await
                .unwrap();
            storage.open("tasker-v0").await.unwrap();
        }

        let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["tasker-v0".to_string(), "tasker-v1".to_string()]
        );
        let hit = storage
            .match_request("tasker-v1", &RequestKey::get("https://example.com/index.html"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, vec![0, 159, 146, 150]);
    }

    #[tokio::test]
    async fn test_disk_storage_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();

        storage.open("tasker-v0").await.unwrap();
        let path = storage.path_for("tasker-v0");
        assert!(path.exists());

        assert!(storage.delete("tasker-v0").await.unwrap());
        assert!(!path.exists());
        assert!(!storage.has("tasker-v0").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_storage_odd_cache_names() {
        let dir = tempfile::tempdir().unwrap();
        let name = "tasker/v1 beta";

        {
            let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
            storage.open(name).await.unwrap();
        }

        let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec![name.to_string()]);
    }

    #[tokio::test]
    async fn test_disk_storage_skips_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
            storage
                .put_all("tasker-v1", vec![entry("https://example.com/", b"root")])
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("tasker-v0.json"), b"{ truncated").unwrap();

        let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["tasker-v1".to_string()]);
        assert_eq!(storage.entry_keys("tasker-v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disk_storage_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskCacheStorage::open_dir(dir.path()).await.unwrap();
        storage
            .put_all("tasker-v1", vec![entry("https://example.com/", b"root")])
            .await
            .unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
