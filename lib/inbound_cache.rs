//! Inbound cache driver (ICD, §4.7): a short-TTL cache of manifests pulled from an upstream
//! during replication, keyed by full image reference (`host/repo/ref`). Consulted before every
//! upstream download so repeated pulls of the same tag within the TTL window don't re-fetch.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

/// Default time-to-live for a cached manifest, per §4.7.
pub const DEFAULT_TTL_HOURS: i64 = 6;

struct Entry {
    content: Bytes,
    inserted_at: DateTime<Utc>,
}

/// An in-process, content-addressed cache of upstream manifest bytes.
pub struct InboundCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl InboundCache {
    /// Builds a cache with the default 6-hour TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::hours(DEFAULT_TTL_HOURS))
    }

    /// Builds a cache with an explicit TTL, for tests that need to exercise expiry.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Looks up `image_reference` (e.g. `upstream.example.com/library/nginx:latest`), returning
    /// `None` on a miss or an expired entry.
    pub fn get(&self, image_reference: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(image_reference) {
            Some(entry) if Utc::now() - entry.inserted_at < self.ttl => Some(entry.content.clone()),
            Some(_) => {
                entries.remove(image_reference);
                None
            }
            None => None,
        }
    }

    /// Inserts (or replaces) a cache entry, timestamped now.
    pub fn put(&self, image_reference: &str, content: Bytes) {
        self.entries.lock().unwrap().insert(
            image_reference.to_string(),
            Entry {
                content,
                inserted_at: Utc::now(),
            },
        );
    }
}

impl Default for InboundCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_returns_cached_bytes() {
        let cache = InboundCache::new();
        cache.put("host/repo:latest", Bytes::from_static(b"manifest-bytes"));
        assert_eq!(cache.get("host/repo:latest"), Some(Bytes::from_static(b"manifest-bytes")));
    }

    #[test]
    fn miss_on_unknown_key() {
        let cache = InboundCache::new();
        assert_eq!(cache.get("host/repo:latest"), None);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = InboundCache::with_ttl(Duration::seconds(-1));
        cache.put("host/repo:latest", Bytes::from_static(b"stale"));
        assert_eq!(cache.get("host/repo:latest"), None);
    }
}
