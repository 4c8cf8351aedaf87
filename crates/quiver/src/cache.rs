//! Cache contract and the in-memory reference backend.

use std::collections::HashMap;
use std::future::Future;
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;

/// A single cached response.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Response payload.
    pub data: Bytes,
    /// `ETag` validator for conditional revalidation.
    pub etag: Option<String>,
    /// Origin `Date` header.
    pub server_date: Option<SystemTime>,
    /// `Last-Modified` validator.
    pub last_modified: Option<SystemTime>,
    /// Hard expiry: past this instant the entry must not be served.
    pub ttl: SystemTime,
    /// Soft expiry: past this instant the entry may be served one more
    /// time while a background refresh is dispatched. Never later than
    /// `ttl`.
    pub soft_ttl: SystemTime,
    /// Response headers stored with the payload.
    pub headers: Vec<(String, String)>,
}

impl Entry {
    /// True once the hard TTL has passed.
    pub fn is_expired(&self) -> bool {
        self.ttl < SystemTime::now()
    }

    /// True once the soft TTL has passed.
    pub fn refresh_needed(&self) -> bool {
        self.soft_ttl < SystemTime::now()
    }
}

/// Error raised by a cache backend.
///
/// Backend failures never reach callers: the dispatchers log them and
/// treat the operation as a miss (lookups) or drop it (writes).
#[derive(Debug, Error)]
#[error("cache backend error: {0}")]
pub struct CacheError(String);

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Pluggable cache backend.
///
/// The engine serializes every call: implementations are invoked from one
/// worker at a time and need no internal locking. `initialize` runs on the
/// cache worker before the first lookup, never on the caller's thread.
pub trait Cache: Send + 'static {
    fn initialize(&mut self) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Entry>, CacheError>> + Send;

    fn put(&mut self, key: &str, entry: Entry)
    -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Expire an entry in place: fully (the next lookup refetches) or
    /// softly (the next lookup serves it once more and refreshes).
    fn invalidate(
        &mut self,
        key: &str,
        full_expire: bool,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn remove(&mut self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn clear(&mut self) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Unbounded in-memory backend. The default choice for short-lived queues
/// and tests; use `quiver-store` for persistence.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: HashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    async fn initialize(&mut self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Entry>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    async fn put(&mut self, key: &str, entry: Entry) -> Result<(), CacheError> {
        self.entries.insert(key.to_owned(), entry);
        Ok(())
    }

    async fn invalidate(&mut self, key: &str, full_expire: bool) -> Result<(), CacheError> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.soft_ttl = SystemTime::UNIX_EPOCH;
            if full_expire {
                entry.ttl = SystemTime::UNIX_EPOCH;
            }
        }
        Ok(())
    }

    async fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(ttl: SystemTime, soft_ttl: SystemTime) -> Entry {
        Entry {
            data: Bytes::from_static(b"cached"),
            etag: Some("\"tag\"".into()),
            server_date: None,
            last_modified: None,
            ttl,
            soft_ttl,
            headers: Vec::new(),
        }
    }

    #[test]
    fn expiry_laws() {
        let now = SystemTime::now();
        let past = now - Duration::from_secs(10);
        let future = now + Duration::from_secs(60);

        let fresh = entry(future, future);
        assert!(!fresh.is_expired());
        assert!(!fresh.refresh_needed());

        let soft_stale = entry(future, past);
        assert!(!soft_stale.is_expired());
        assert!(soft_stale.refresh_needed());

        let hard_stale = entry(past, past);
        assert!(hard_stale.is_expired());
        assert!(hard_stale.refresh_needed());
    }

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let mut cache = MemoryCache::new();
        cache.initialize().await.unwrap();
        let future = SystemTime::now() + Duration::from_secs(60);

        assert!(cache.get("GET:/a").await.unwrap().is_none());
        cache.put("GET:/a", entry(future, future)).await.unwrap();
        let hit = cache.get("GET:/a").await.unwrap().expect("cached entry");
        assert_eq!(hit.data, Bytes::from_static(b"cached"));

        cache.remove("GET:/a").await.unwrap();
        assert!(cache.get("GET:/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalidate_soft_and_full() {
        let mut cache = MemoryCache::new();
        let future = SystemTime::now() + Duration::from_secs(60);

        cache.put("k", entry(future, future)).await.unwrap();
        cache.invalidate("k", false).await.unwrap();
        let soft = cache.get("k").await.unwrap().expect("entry kept");
        assert!(soft.refresh_needed());
        assert!(!soft.is_expired());

        cache.invalidate("k", true).await.unwrap();
        let full = cache.get("k").await.unwrap().expect("entry kept");
        assert!(full.is_expired());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let mut cache = MemoryCache::new();
        let future = SystemTime::now() + Duration::from_secs(60);
        cache.put("a", entry(future, future)).await.unwrap();
        cache.put("b", entry(future, future)).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
