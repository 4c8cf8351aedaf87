//! On-disk representation of a cache entry.

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use quiver::Entry;

/// Serialized form of an [`Entry`]. Instants are epoch milliseconds so
/// records stay readable across platforms and restarts.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    /// The cache key, stored to detect filename collisions.
    pub key: String,
    pub etag: Option<String>,
    pub server_date_ms: Option<u64>,
    pub last_modified_ms: Option<u64>,
    pub ttl_ms: u64,
    pub soft_ttl_ms: u64,
    pub headers: Vec<(String, String)>,
    pub data: Vec<u8>,
}

impl StoredRecord {
    pub(crate) fn from_entry(key: &str, entry: &Entry) -> Self {
        Self {
            key: key.to_owned(),
            etag: entry.etag.clone(),
            server_date_ms: entry.server_date.map(epoch_millis),
            last_modified_ms: entry.last_modified.map(epoch_millis),
            ttl_ms: epoch_millis(entry.ttl),
            soft_ttl_ms: epoch_millis(entry.soft_ttl),
            headers: entry.headers.clone(),
            data: entry.data.to_vec(),
        }
    }

    pub(crate) fn into_entry(self) -> Entry {
        Entry {
            data: Bytes::from(self.data),
            etag: self.etag,
            server_date: self.server_date_ms.map(from_epoch_millis),
            last_modified: self.last_modified_ms.map(from_epoch_millis),
            ttl: from_epoch_millis(self.ttl_ms),
            soft_ttl: from_epoch_millis(self.soft_ttl_ms),
            headers: self.headers,
        }
    }
}

pub(crate) fn epoch_millis(instant: SystemTime) -> u64 {
    instant
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

pub(crate) fn from_epoch_millis(millis: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip_preserves_entry() {
        let now = SystemTime::now();
        let entry = Entry {
            data: Bytes::from_static(b"payload"),
            etag: Some("\"v1\"".into()),
            server_date: Some(now),
            last_modified: None,
            ttl: now + Duration::from_secs(60),
            soft_ttl: now + Duration::from_secs(30),
            headers: vec![("Content-Type".into(), "text/plain".into())],
        };

        let record = StoredRecord::from_entry("GET:/a", &entry);
        let encoded = postcard::to_allocvec(&record).expect("encodes");
        let decoded: StoredRecord = postcard::from_bytes(&encoded).expect("decodes");
        assert_eq!(decoded.key, "GET:/a");

        let restored = decoded.into_entry();
        assert_eq!(restored.data, entry.data);
        assert_eq!(restored.etag, entry.etag);
        assert_eq!(restored.headers, entry.headers);
        // Millisecond precision survives the round trip.
        assert_eq!(epoch_millis(restored.ttl), epoch_millis(entry.ttl));
        assert_eq!(epoch_millis(restored.soft_ttl), epoch_millis(entry.soft_ttl));
    }
}
