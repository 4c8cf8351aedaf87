//! File-per-entry disk cache with a size cap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use quiver::{Cache, CacheError, Entry};

use crate::record::StoredRecord;

/// Bookkeeping for one cached file.
#[derive(Debug, Clone, Copy)]
struct IndexSlot {
    size: u64,
    inserted: u64,
}

/// Disk-backed cache: one postcard-encoded file per entry under a root
/// directory.
///
/// `initialize` scans the root and rebuilds the in-memory index, dropping
/// unreadable files. Writes are staged to a temporary file and renamed so
/// a crash never leaves a half-written entry behind. When the configured
/// size cap is exceeded, the oldest entries are pruned until usage falls
/// to 90% of the cap.
pub struct DiskCache {
    root: PathBuf,
    max_size: u64,
    index: HashMap<String, IndexSlot>,
    total_size: u64,
    insert_counter: u64,
}

impl DiskCache {
    /// Default size cap: 5 MiB.
    pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;

    /// Prune down to this fraction of the cap, not just below it.
    const HYSTERESIS: f64 = 0.9;

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_size(root, Self::DEFAULT_MAX_SIZE)
    }

    pub fn with_max_size(root: impl Into<PathBuf>, max_size: u64) -> Self {
        Self {
            root: root.into(),
            max_size,
            index: HashMap::new(),
            total_size: 0,
            insert_counter: 0,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.root.join(hex::encode(digest))
    }

    fn drop_slot(&mut self, key: &str) {
        if let Some(slot) = self.index.remove(key) {
            self.total_size = self.total_size.saturating_sub(slot.size);
        }
    }

    async fn read_record(&self, path: &Path) -> Option<StoredRecord> {
        let raw = tokio::fs::read(path).await.ok()?;
        postcard::from_bytes(&raw).ok()
    }

    /// Evict oldest entries until `needed` more bytes fit under the cap.
    async fn prune_to_fit(&mut self, needed: u64) {
        if self.total_size + needed <= self.max_size {
            return;
        }
        let target = (self.max_size as f64 * Self::HYSTERESIS) as u64;
        let mut pruned = 0usize;
        while self.total_size + needed > target {
            let Some(oldest) = self
                .index
                .iter()
                .min_by_key(|(_, slot)| slot.inserted)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            let path = self.path_for(&oldest);
            if let Err(error) = tokio::fs::remove_file(&path).await {
                warn!(%error, key = %oldest, "failed to remove pruned cache file");
            }
            self.drop_slot(&oldest);
            pruned += 1;
        }
        debug!(pruned, total_size = self.total_size, "pruned disk cache");
    }
}

impl Cache for DiskCache {
    async fn initialize(&mut self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::new(format!("failed to create cache dir: {e}")))?;

        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::new(format!("failed to scan cache dir: {e}")))?;
        while let Ok(Some(file)) = dir.next_entry().await.map_err(|e| {
            warn!(error = %e, "cache scan aborted");
            e
        }) {
            let path = file.path();
            match self.read_record(&path).await {
                Some(record) => {
                    let size = file.metadata().await.map(|m| m.len()).unwrap_or(0);
                    self.insert_counter += 1;
                    self.total_size += size;
                    self.index.insert(
                        record.key,
                        IndexSlot {
                            size,
                            inserted: self.insert_counter,
                        },
                    );
                }
                None => {
                    warn!(path = %path.display(), "dropping unreadable cache file");
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
        debug!(
            entries = self.index.len(),
            total_size = self.total_size,
            "disk cache initialized"
        );
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<Entry>, CacheError> {
        if !self.index.contains_key(key) {
            return Ok(None);
        }
        let path = self.path_for(key);
        let Some(record) = self.read_record(&path).await else {
            warn!(key, "cached file unreadable, dropping");
            let _ = tokio::fs::remove_file(&path).await;
            self.drop_slot(key);
            return Ok(None);
        };
        if record.key != key {
            return Ok(None);
        }
        Ok(Some(record.into_entry()))
    }

    async fn put(&mut self, key: &str, entry: Entry) -> Result<(), CacheError> {
        let record = StoredRecord::from_entry(key, &entry);
        let encoded =
            postcard::to_allocvec(&record).map_err(|e| CacheError::new(e.to_string()))?;
        let size = encoded.len() as u64;

        self.drop_slot(key);
        self.prune_to_fit(size).await;

        let path = self.path_for(key);
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, &encoded)
            .await
            .map_err(|e| CacheError::new(format!("failed to stage cache file: {e}")))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| CacheError::new(format!("failed to commit cache file: {e}")))?;

        self.insert_counter += 1;
        self.total_size += size;
        self.index.insert(
            key.to_owned(),
            IndexSlot {
                size,
                inserted: self.insert_counter,
            },
        );
        Ok(())
    }

    async fn invalidate(&mut self, key: &str, full_expire: bool) -> Result<(), CacheError> {
        let Some(mut entry) = self.get(key).await? else {
            return Ok(());
        };
        entry.soft_ttl = std::time::SystemTime::UNIX_EPOCH;
        if full_expire {
            entry.ttl = std::time::SystemTime::UNIX_EPOCH;
        }
        self.put(key, entry).await
    }

    async fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        if self.index.contains_key(key) {
            let _ = tokio::fs::remove_file(self.path_for(key)).await;
            self.drop_slot(key);
        }
        Ok(())
    }

    async fn clear(&mut self) -> Result<(), CacheError> {
        let keys: Vec<String> = self.index.keys().cloned().collect();
        for key in keys {
            let _ = tokio::fs::remove_file(self.path_for(&key)).await;
        }
        self.index.clear();
        self.total_size = 0;
        Ok(())
    }
}
