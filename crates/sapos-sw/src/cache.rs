//! Cache Store: versioned named caches of captured responses.
//!
//! ```text
//! CacheStorage (caches)
//!     ├── static-<version>
//!     │       └── RequestKey → CacheEntry
//!     └── dynamic-<version>
//!             └── RequestKey → CacheEntry
//! ```
//!
//! [`Cache`] and [`CacheStorage`] are plain synchronous containers.
//! [`CacheStore`] is the async seam the runtime talks to; the host may back
//! it with anything that is safe for concurrent readers and writers.
//! [`MemoryCacheStore`] wraps a [`CacheStorage`] in a tokio `RwLock`.

use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use http::Method;
use sapos_common::{Result, SaposError};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::fetch::{FetchRequest, Response};
use crate::now_millis;

// ==================== Request Key ====================

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Key for a GET of the given URL.
    pub fn get(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: Method::GET.to_string(),
            url: url.into(),
        }
    }

    /// Key for a request; only GET requests are cacheable.
    pub fn for_request(request: &FetchRequest) -> Option<Self> {
        (request.method == Method::GET).then(|| Self::get(&request.url))
    }
}

// ==================== Cache ====================

/// A cached request/response pair.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Request identity.
    pub key: RequestKey,

    /// Captured response.
    pub response: Response,

    /// Stored at timestamp (ms since epoch).
    pub stored_at: u64,

    /// Insertion sequence within the owning cache.
    seq: u64,
}

/// A named cache.
#[derive(Debug)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
    next_seq: u64,
    created: u64,
}

impl Cache {
    fn new(name: &str, created: u64) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
            next_seq: 0,
            created,
        }
    }

    /// Match a request.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Store a response. Overwriting an existing key moves it to the back
    /// of the insertion order.
    pub fn put(&mut self, key: RequestKey, response: Response) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let entry = CacheEntry {
            key: key.clone(),
            response,
            stored_at: now_millis(),
            seq,
        };
        self.entries.insert(key, entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, oldest insertion first.
    pub fn keys(&self) -> Vec<RequestKey> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.key.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total body bytes held.
    pub fn size_bytes(&self) -> usize {
        self.entries.values().map(|e| e.response.body.len()).sum()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (caches global).
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    next_created: u64,
    quota_bytes: Option<usize>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create storage that rejects writes beyond `quota_bytes` of bodies.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let created = self.next_created;
        let cache = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name, created));
        if cache.created == created {
            self.next_created += 1;
        }
        cache
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, in creation order.
    pub fn keys(&self) -> Vec<String> {
        let mut caches: Vec<_> = self.caches.values().collect();
        caches.sort_by_key(|c| c.created);
        caches.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Match across all caches, oldest cache first.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        let mut caches: Vec<_> = self.caches.values().collect();
        caches.sort_by_key(|c| c.created);
        caches.into_iter().find_map(|c| c.match_request(key))
    }

    /// Store a response in the named cache, enforcing the byte quota.
    pub fn put(&mut self, name: &str, key: RequestKey, response: Response) -> Result<()> {
        if let Some(quota) = self.quota_bytes {
            let replaced = self
                .caches
                .get(name)
                .and_then(|c| c.match_request(&key))
                .map_or(0, |e| e.response.body.len());
            let used: usize = self.caches.values().map(Cache::size_bytes).sum();
            if used - replaced + response.body.len() > quota {
                return Err(SaposError::cache(format!(
                    "quota of {quota} bytes exceeded writing {}",
                    key.url
                )));
            }
        }
        self.open(name).put(key, response);
        Ok(())
    }
}

// ==================== Cache Store ====================

/// Async cache storage seam. Implementations must tolerate concurrent
/// readers and writers; writes to the same key are last-write-wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Ensure a named cache exists.
    async fn open(&self, cache_name: &str) -> Result<()>;

    /// Look up a request in one named cache.
    async fn match_in(&self, cache_name: &str, key: &RequestKey) -> Result<Option<Response>>;

    /// Look up a request across every named cache.
    async fn match_any(&self, key: &RequestKey) -> Result<Option<Response>>;

    /// Store a response, creating the cache if needed.
    async fn put(&self, cache_name: &str, key: RequestKey, response: Response) -> Result<()>;

    /// Delete one entry.
    async fn delete_entry(&self, cache_name: &str, key: &RequestKey) -> Result<bool>;

    /// Keys of a named cache, oldest insertion first (empty if absent).
    async fn keys(&self, cache_name: &str) -> Result<Vec<RequestKey>>;

    /// Names of every cache, in creation order.
    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Delete a whole named cache.
    async fn delete_cache(&self, cache_name: &str) -> Result<bool>;
}

/// In-memory [`CacheStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries in a named cache (0 if absent).
    pub async fn len(&self, cache_name: &str) -> usize {
        self.inner.read().await.get(cache_name).map_or(0, Cache::len)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn open(&self, cache_name: &str) -> Result<()> {
        self.inner.write().await.open(cache_name);
        Ok(())
    }

    async fn match_in(&self, cache_name: &str, key: &RequestKey) -> Result<Option<Response>> {
        let storage = self.inner.read().await;
        Ok(storage
            .get(cache_name)
            .and_then(|c| c.match_request(key))
            .map(|e| e.response.clone().into_cached()))
    }

    async fn match_any(&self, key: &RequestKey) -> Result<Option<Response>> {
        let storage = self.inner.read().await;
        Ok(storage
            .match_request(key)
            .map(|e| e.response.clone().into_cached()))
    }

    async fn put(&self, cache_name: &str, key: RequestKey, response: Response) -> Result<()> {
        let mut response = response;
        response.from_cache = false;
        self.inner.write().await.put(cache_name, key, response)
    }

    async fn delete_entry(&self, cache_name: &str, key: &RequestKey) -> Result<bool> {
        let mut storage = self.inner.write().await;
        Ok(storage
            .caches
            .get_mut(cache_name)
            .is_some_and(|c| c.delete(key)))
    }

    async fn keys(&self, cache_name: &str) -> Result<Vec<RequestKey>> {
        let storage = self.inner.read().await;
        Ok(storage.get(cache_name).map(Cache::keys).unwrap_or_default())
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        Ok(self.inner.read().await.keys())
    }

    async fn delete_cache(&self, cache_name: &str) -> Result<bool> {
        Ok(self.inner.write().await.delete(cache_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse(&format!("https://sapos-league.web.app{path}")).unwrap())
    }

    fn response(body: &str) -> Response {
        Response::new(
            Url::parse("https://sapos-league.web.app/").unwrap(),
            200,
            body.to_string(),
        )
    }

    #[test]
    fn test_request_key_drops_fragment() {
        let a = RequestKey::get(&Url::parse("https://sapos-league.web.app/painel.html#rodada-3").unwrap());
        assert_eq!(a, key("/painel.html"));
    }

    #[test]
    fn test_request_key_only_for_get() {
        let url = Url::parse("https://sapos-league.web.app/lista").unwrap();
        assert!(RequestKey::for_request(&FetchRequest::get(url.clone())).is_some());
        assert!(RequestKey::for_request(&FetchRequest::get(url).with_method(Method::POST)).is_none());
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("static-1", 0);
        cache.put(key("/css/index.css"), response("body{}"));

        assert!(cache.match_request(&key("/css/index.css")).is_some());
        assert!(cache.match_request(&key("/css/admin.css")).is_none());
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("static-1", 0);
        cache.put(key("/js/index.js"), response(""));
        assert!(cache.delete(&key("/js/index.js")));
        assert!(!cache.delete(&key("/js/index.js")));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite_moves_key_to_back() {
        let mut cache = Cache::new("dynamic-1", 0);
        cache.put(key("/a.png"), response("1"));
        cache.put(key("/b.png"), response("2"));
        cache.put(key("/a.png"), response("3"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.keys(), vec![key("/b.png"), key("/a.png")]);
        assert_eq!(cache.match_request(&key("/a.png")).unwrap().response.text(), "3");
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("static-1"));
        storage.open("static-1");
        storage.open("dynamic-1");
        storage.open("static-1");
        assert_eq!(storage.keys(), vec!["static-1", "dynamic-1"]);

        assert!(storage.delete("static-1"));
        assert!(!storage.has("static-1"));
    }

    #[test]
    fn test_storage_match_across_caches() {
        let mut storage = CacheStorage::new();
        storage.put("dynamic-1", key("/painel.html"), response("p")).unwrap();
        assert!(storage.match_request(&key("/painel.html")).is_some());
        assert!(storage.match_request(&key("/admin.html")).is_none());
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut storage = CacheStorage::with_quota(8);
        storage.put("dynamic-1", key("/a"), response("12345")).unwrap();
        assert!(storage.put("dynamic-1", key("/b"), response("12345")).is_err());
        // overwriting the same key reuses its bytes
        storage.put("dynamic-1", key("/a"), response("12345678")).unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_marks_hits_from_cache() {
        let store = MemoryCacheStore::new();
        store.put("static-1", key("/index.html"), response("home")).await.unwrap();

        let hit = store.match_in("static-1", &key("/index.html")).await.unwrap().unwrap();
        assert!(hit.from_cache);
        assert!(store.match_in("dynamic-1", &key("/index.html")).await.unwrap().is_none());
        assert!(store.match_any(&key("/index.html")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store_keys_and_delete() {
        let store = MemoryCacheStore::new();
        store.put("dynamic-1", key("/1.png"), response("")).await.unwrap();
        store.put("dynamic-1", key("/2.png"), response("")).await.unwrap();

        assert!(store.delete_entry("dynamic-1", &key("/1.png")).await.unwrap());
        assert_eq!(store.keys("dynamic-1").await.unwrap(), vec![key("/2.png")]);
        assert!(store.keys("missing").await.unwrap().is_empty());

        assert!(store.delete_cache("dynamic-1").await.unwrap());
        assert!(store.cache_names().await.unwrap().is_empty());
    }
}
