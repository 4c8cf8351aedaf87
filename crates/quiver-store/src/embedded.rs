//! Embedded-store cache over sled.

use std::path::PathBuf;
use std::time::SystemTime;

use tracing::warn;

use quiver::{Cache, CacheError, Entry};

use crate::record::StoredRecord;

/// Cache backend over an embedded [`sled`] database.
///
/// The database opens lazily in `initialize`, which the engine runs on
/// the cache worker, so construction never blocks the caller's thread on
/// disk I/O. Callers that already hold a database can wrap it with
/// [`SledCache::with_db`].
pub struct SledCache {
    path: Option<PathBuf>,
    db: Option<sled::Db>,
}

impl SledCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            db: None,
        }
    }

    /// Wrap an already-open database.
    pub fn with_db(db: sled::Db) -> Self {
        Self {
            path: None,
            db: Some(db),
        }
    }

    fn db(&self) -> Result<&sled::Db, CacheError> {
        self.db
            .as_ref()
            .ok_or_else(|| CacheError::new("sled cache used before initialize"))
    }
}

impl Cache for SledCache {
    async fn initialize(&mut self) -> Result<(), CacheError> {
        if self.db.is_some() {
            return Ok(());
        }
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| CacheError::new("sled cache has neither a path nor a database"))?;
        let db = sled::open(path)
            .map_err(|e| CacheError::new(format!("failed to open sled db: {e}")))?;
        self.db = Some(db);
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Entry>, CacheError> {
        let db = self.db()?;
        let Some(raw) = db
            .get(key)
            .map_err(|e| CacheError::new(e.to_string()))?
        else {
            return Ok(None);
        };
        match postcard::from_bytes::<StoredRecord>(&raw) {
            Ok(record) => Ok(Some(record.into_entry())),
            Err(error) => {
                warn!(%error, key, "dropping undecodable sled record");
                let _ = db.remove(key);
                Ok(None)
            }
        }
    }

    async fn put(&mut self, key: &str, entry: Entry) -> Result<(), CacheError> {
        let record = StoredRecord::from_entry(key, &entry);
        let encoded =
            postcard::to_allocvec(&record).map_err(|e| CacheError::new(e.to_string()))?;
        self.db()?
            .insert(key, encoded)
            .map_err(|e| CacheError::new(e.to_string()))?;
        Ok(())
    }

    async fn invalidate(&mut self, key: &str, full_expire: bool) -> Result<(), CacheError> {
        let Some(mut entry) = self.get(key).await? else {
            return Ok(());
        };
        entry.soft_ttl = SystemTime::UNIX_EPOCH;
        if full_expire {
            entry.ttl = SystemTime::UNIX_EPOCH;
        }
        self.put(key, entry).await
    }

    async fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        self.db()?
            .remove(key)
            .map_err(|e| CacheError::new(e.to_string()))?;
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), CacheError> {
        self.db()?
            .clear()
            .map_err(|e| CacheError::new(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tempfile::TempDir;

    use crate::record::epoch_millis;

    fn entry(body: &[u8]) -> Entry {
        let now = SystemTime::now();
        Entry {
            data: Bytes::copy_from_slice(body),
            etag: Some("\"sled\"".into()),
            server_date: None,
            last_modified: None,
            ttl: now + Duration::from_secs(60),
            soft_ttl: now + Duration::from_secs(30),
            headers: vec![("Content-Type".into(), "application/json".into())],
        }
    }

    #[tokio::test]
    async fn uninitialized_cache_refuses_operations() {
        let dir = TempDir::new().unwrap();
        let mut cache = SledCache::new(dir.path().join("db"));
        assert!(cache.get("k").await.is_err());
    }

    #[tokio::test]
    async fn round_trip_preserves_entry() {
        let dir = TempDir::new().unwrap();
        let mut cache = SledCache::new(dir.path().join("db"));
        cache.initialize().await.unwrap();

        let stored = entry(b"hello sled");
        cache.put("GET:/a", stored.clone()).await.unwrap();
        let loaded = cache.get("GET:/a").await.unwrap().expect("entry stored");
        assert_eq!(loaded.data, stored.data);
        assert_eq!(loaded.etag, stored.etag);
        assert_eq!(epoch_millis(loaded.ttl), epoch_millis(stored.ttl));
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let mut cache = SledCache::new(&path);
            cache.initialize().await.unwrap();
            cache.put("GET:/a", entry(b"persisted")).await.unwrap();
        }

        let mut reopened = SledCache::new(&path);
        reopened.initialize().await.unwrap();
        let loaded = reopened.get("GET:/a").await.unwrap().expect("persisted");
        assert_eq!(loaded.data, Bytes::from_static(b"persisted"));
    }

    #[tokio::test]
    async fn invalidate_and_remove() {
        let dir = TempDir::new().unwrap();
        let mut cache = SledCache::new(dir.path().join("db"));
        cache.initialize().await.unwrap();
        cache.put("k", entry(b"data")).await.unwrap();

        cache.invalidate("k", false).await.unwrap();
        let soft = cache.get("k").await.unwrap().expect("kept");
        assert!(soft.refresh_needed());
        assert!(!soft.is_expired());

        cache.invalidate("k", true).await.unwrap();
        assert!(cache.get("k").await.unwrap().expect("kept").is_expired());

        cache.remove("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let dir = TempDir::new().unwrap();
        let mut cache = SledCache::new(dir.path().join("db"));
        cache.initialize().await.unwrap();
        cache.put("a", entry(b"one")).await.unwrap();
        cache.put("b", entry(b"two")).await.unwrap();

        cache.clear().await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
