//! Versioned cache partitions.
//!
//! A [`CacheStorage`] holds named [`Partition`]s. Entries are whole
//! response snapshots: a put always replaces, never patches. Deleting a
//! partition kills every outstanding handle to it, so a reader that opened
//! the partition before the deletion simply misses afterwards.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info, trace};
use url::Url;

use reliance_net::{Request, Response, ResponseSource};

/// Normalized request identity: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    method: String,
    url: String,
}

impl CacheKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.into(),
        }
    }

    /// Key for a GET of `url`.
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    pub fn from_request(request: &Request) -> Self {
        Self::new(&request.method, &request.url)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A stored response snapshot.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Final response URL, if known.
    pub url: Option<Url>,

    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response.
    pub fn from_response(response: &Response) -> Self {
        Self {
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response marked as served from cache.
    pub fn to_response(&self) -> Response {
        Response {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            source: ResponseSource::Cache,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Counters shared by every partition of a storage.
#[derive(Debug, Default)]
pub struct CacheStats {
    lookups: AtomicU64,
    hits: AtomicU64,
    puts: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lookups: u64,
    pub hits: u64,
    pub puts: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }
}

/// A named collection of entries.
#[derive(Debug)]
pub struct Partition {
    name: String,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    deleted: AtomicBool,
    stats: Arc<CacheStats>,
}

impl Partition {
    fn new(name: &str, stats: Arc<CacheStats>) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
            deleted: AtomicBool::new(false),
            stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the partition was deleted from its storage.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Look up an entry. Misses are not errors.
    pub async fn match_request(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        if self.is_deleted() {
            return None;
        }
        let entry = self.entries.read().await.get(key).cloned();
        if entry.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        trace!(partition = %self.name, key = %key, hit = entry.is_some(), "Cache lookup");
        entry
    }

    /// Store an entry, replacing any previous one.
    ///
    /// Returns `false` when the partition has been deleted.
    pub async fn put(&self, key: CacheKey, entry: CacheEntry) -> bool {
        let mut entries = self.entries.write().await;
        // Checked under the write lock so a racing eviction cannot be undone.
        if self.is_deleted() {
            debug!(partition = %self.name, key = %key, "Dropping put on deleted partition");
            return false;
        }
        trace!(partition = %self.name, key = %key, status = %entry.status, "Cache put");
        entries.insert(key, entry);
        self.stats.puts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Delete an entry.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Get all keys, sorted.
    pub async fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn evict(&self) {
        self.deleted.store(true, Ordering::Release);
        self.entries.write().await.clear();
    }
}

/// The set of partitions.
#[derive(Debug, Default)]
pub struct CacheStorage {
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
    stats: Arc<CacheStats>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition (creates if doesn't exist).
    pub async fn open(&self, name: &str) -> Arc<Partition> {
        if let Some(partition) = self.partitions.read().await.get(name) {
            return Arc::clone(partition);
        }
        let mut partitions = self.partitions.write().await;
        let partition = partitions.entry(name.to_string()).or_insert_with(|| {
            debug!(partition = name, "Creating cache partition");
            Arc::new(Partition::new(name, Arc::clone(&self.stats)))
        });
        Arc::clone(partition)
    }

    /// Check if a partition exists.
    pub async fn has(&self, name: &str) -> bool {
        self.partitions.read().await.contains_key(name)
    }

    /// Delete a partition.
    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.partitions.write().await.remove(name);
        match removed {
            Some(partition) => {
                partition.evict().await;
                true
            }
            None => false,
        }
    }

    /// Get all partition names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Delete every partition not named in `keep`; returns the deleted names.
    pub async fn delete_except(&self, keep: &[String]) -> Vec<String> {
        let stale: Vec<Arc<Partition>> = {
            let mut partitions = self.partitions.write().await;
            let names: Vec<String> = partitions
                .keys()
                .filter(|name| !keep.contains(name))
                .cloned()
                .collect();
            names
                .iter()
                .filter_map(|name| partitions.remove(name))
                .collect()
        };

        let mut deleted = Vec::with_capacity(stale.len());
        for partition in stale {
            partition.evict().await;
            info!(partition = %partition.name(), "Deleted stale cache partition");
            deleted.push(partition.name().to_string());
        }
        deleted.sort();
        deleted
    }

    /// Counters across all partitions.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> CacheKey {
        CacheKey::get(&Url::parse(url).unwrap())
    }

    fn entry(body: &'static str) -> CacheEntry {
        CacheEntry::from_response(&Response::new(StatusCode::OK, body))
    }

    #[test]
    fn test_cache_key_drops_fragment_keeps_query() {
        let a = key("https://example.com/page?x=1#top");
        let b = key("https://example.com/page?x=1");
        let c = key("https://example.com/page?x=2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "GET https://example.com/page?x=1");
    }

    #[test]
    fn test_cache_key_method_matters() {
        let url = Url::parse("https://example.com/api/tasks").unwrap();
        assert_ne!(CacheKey::get(&url), CacheKey::new(&Method::POST, &url));
    }

    #[test]
    fn test_entry_round_trips_as_cache_response() {
        let response = Response::new(StatusCode::OK, "body")
            .with_header(http::header::ETAG, http::HeaderValue::from_static("\"1\""));
        let restored = CacheEntry::from_response(&response).to_response();
        assert_eq!(restored.source, ResponseSource::Cache);
        assert_eq!(restored.header("etag"), Some("\"1\""));
        assert_eq!(restored.body, Bytes::from_static(b"body"));
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = CacheStorage::new();
        let first = storage.open("runtime-v1").await;
        first.put(key("https://example.com/a.js"), entry("a")).await;

        let second = storage.open("runtime-v1").await;
        assert_eq!(second.len().await, 1);
        assert_eq!(storage.keys().await, vec!["runtime-v1"]);
    }

    #[tokio::test]
    async fn test_match_miss_is_none() {
        let storage = CacheStorage::new();
        let partition = storage.open("runtime-v1").await;
        assert!(partition.match_request(&key("https://example.com/x")).await.is_none());
        assert_eq!(storage.stats(), StatsSnapshot { lookups: 1, hits: 0, puts: 0 });
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let storage = CacheStorage::new();
        let partition = storage.open("runtime-v1").await;
        let k = key("https://example.com/a.png");
        partition.put(k.clone(), entry("old")).await;
        partition.put(k.clone(), entry("new")).await;

        let found = partition.match_request(&k).await.unwrap();
        assert_eq!(found.body, Bytes::from_static(b"new"));
        assert_eq!(partition.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_except_keeps_allow_list() {
        let storage = CacheStorage::new();
        for name in ["precache-v1", "runtime-v1", "precache-v2", "runtime-v2", "other"] {
            storage.open(name).await;
        }

        let deleted = storage
            .delete_except(&["precache-v2".to_string(), "runtime-v2".to_string()])
            .await;

        assert_eq!(deleted, vec!["other", "precache-v1", "runtime-v1"]);
        assert_eq!(storage.keys().await, vec!["precache-v2", "runtime-v2"]);
    }

    #[tokio::test]
    async fn test_deleted_partition_handle_misses() {
        let storage = CacheStorage::new();
        let old = storage.open("runtime-v1").await;
        let k = key("https://example.com/a.js");
        old.put(k.clone(), entry("a")).await;

        assert!(storage.delete("runtime-v1").await);

        assert!(old.is_deleted());
        assert!(old.match_request(&k).await.is_none());
        assert!(!old.put(k.clone(), entry("b")).await);

        let reopened = storage.open("runtime-v1").await;
        assert!(reopened.is_empty().await);
        assert!(reopened.match_request(&k).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_partition() {
        let storage = CacheStorage::new();
        assert!(!storage.delete("nope").await);
        assert!(!storage.has("nope").await);
    }
}
