//! Named asset caches.

use async_trait::async_trait;
use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use swcache_common::now_millis;
use swcache_net::{Body, Response};
use tokio::sync::RwLock;
use url::Url;

use crate::WorkerError;

// ==================== Asset Entry ====================

/// A stored response for one asset URL.
#[derive(Debug, Clone)]
pub struct AssetEntry {
    /// Absolute URL without fragment.
    pub url: Url,

    /// Response status.
    pub status: StatusCode,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Stored at (ms since epoch).
    pub cached_at: i64,
}

impl AssetEntry {
    /// Read `response` to the end and capture it under `url`.
    pub async fn from_response(url: &Url, response: Response) -> Result<Self, WorkerError> {
        let Response {
            status,
            status_text,
            headers,
            body,
            ..
        } = response;

        Ok(Self {
            url: strip_fragment(url),
            status,
            status_text,
            headers,
            body: body.bytes().await?,
            cached_at: now_millis(),
        })
    }

    /// A fresh response carrying the stored data.
    pub fn to_response(&self) -> Response {
        Response {
            url: Some(self.url.clone()),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: Body::from(self.body.clone()),
        }
    }
}

/// Lookup key of `url` inside a cache.
pub fn cache_key(url: &Url) -> String {
    strip_fragment(url).into()
}

fn strip_fragment(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url
}

// ==================== Cache Storage ====================

/// Storage of named caches, each mapping URLs to [`AssetEntry`] values.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of all caches.
    async fn keys(&self) -> Result<Vec<String>, WorkerError>;

    /// Whether the cache `name` exists.
    async fn has(&self, name: &str) -> Result<bool, WorkerError>;

    /// Delete the cache `name`. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, WorkerError>;

    /// Entry for `url` in the cache `name`.
    async fn match_in(&self, name: &str, url: &Url) -> Result<Option<AssetEntry>, WorkerError>;

    /// Store all `entries` in the cache `name` in one write, creating the
    /// cache if needed.
    async fn put_all(&self, name: &str, entries: Vec<AssetEntry>) -> Result<(), WorkerError>;

    /// Store one entry in the cache `name`, replacing any entry for its URL.
    async fn put(&self, name: &str, entry: AssetEntry) -> Result<(), WorkerError> {
        self.put_all(name, vec![entry]).await
    }

    /// Store one entry only while the cache `name` exists. Returns `false`,
    /// storing nothing, when it has been deleted or never created.
    async fn put_existing(&self, name: &str, entry: AssetEntry) -> Result<bool, WorkerError>;
}

/// A cache instance.
#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, AssetEntry>,
}

/// In-process [`CacheStorage`].
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs stored in the cache `name`, sorted.
    pub async fn urls(&self, name: &str) -> Vec<String> {
        let caches = self.caches.read().await;
        let mut urls: Vec<String> = caches
            .get(name)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default();
        urls.sort();
        urls
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, WorkerError> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, WorkerError> {
        Ok(self.caches.read().await.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, WorkerError> {
        Ok(self.caches.write().await.remove(name).is_some())
    }

    async fn match_in(&self, name: &str, url: &Url) -> Result<Option<AssetEntry>, WorkerError> {
        let caches = self.caches.read().await;
        Ok(caches
            .get(name)
            .and_then(|c| c.entries.get(&cache_key(url)))
            .cloned())
    }

    async fn put_all(&self, name: &str, entries: Vec<AssetEntry>) -> Result<(), WorkerError> {
        let mut caches = self.caches.write().await;
        let cache = caches.entry(name.to_string()).or_default();
        for entry in entries {
            cache.entries.insert(cache_key(&entry.url), entry);
        }
        Ok(())
    }

    async fn put_existing(&self, name: &str, entry: AssetEntry) -> Result<bool, WorkerError> {
        let mut caches = self.caches.write().await;
        match caches.get_mut(name) {
            Some(cache) => {
                cache.entries.insert(cache_key(&entry.url), entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &'static str) -> AssetEntry {
        AssetEntry {
            url: Url::parse(url).unwrap(),
            status: StatusCode::OK,
            status_text: "OK".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache_key_ignores_fragment() {
        let a = Url::parse("https://ex.com/index.html#top").unwrap();
        let b = Url::parse("https://ex.com/index.html").unwrap();
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let storage = MemoryCacheStorage::new();
        storage.put("v1", entry("https://ex.com/app.js", "js")).await.unwrap();

        let url = Url::parse("https://ex.com/app.js").unwrap();
        let hit = storage.match_in("v1", &url).await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"js"));

        assert!(storage.match_in("v2", &url).await.unwrap().is_none());
        assert!(storage.has("v1").await.unwrap());
        assert!(!storage.has("v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let storage = MemoryCacheStorage::new();
        storage.put("v1", entry("https://ex.com/a", "old")).await.unwrap();
        storage.put("v1", entry("https://ex.com/a", "new")).await.unwrap();

        let url = Url::parse("https://ex.com/a").unwrap();
        let hit = storage.match_in("v1", &url).await.unwrap().unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"new"));
        assert_eq!(storage.urls("v1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let storage = MemoryCacheStorage::new();
        storage.put_all("b", vec![entry("https://ex.com/1", "")]).await.unwrap();
        storage.put_all("a", vec![]).await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["a", "b"]);
        assert!(storage.delete("a").await.unwrap());
        assert!(!storage.delete("a").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_put_existing_never_creates_cache() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.put_existing("v1", entry("https://ex.com/a", "x")).await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());

        storage.put_all("v1", vec![]).await.unwrap();
        assert!(storage.put_existing("v1", entry("https://ex.com/a", "x")).await.unwrap());
        assert_eq!(storage.urls("v1").await, vec!["https://ex.com/a"]);

        storage.delete("v1").await.unwrap();
        assert!(!storage.put_existing("v1", entry("https://ex.com/b", "y")).await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_response_round_trip() {
        let url = Url::parse("https://ex.com/page#frag").unwrap();
        let response = Response::new(StatusCode::OK, "<html>");

        let stored = AssetEntry::from_response(&url, response).await.unwrap();
        assert_eq!(stored.url.as_str(), "https://ex.com/page");

        let replay = stored.to_response();
        assert_eq!(replay.status, StatusCode::OK);
        assert_eq!(replay.status_text, "OK");
        assert_eq!(replay.text().await.unwrap(), "<html>");
    }
}
