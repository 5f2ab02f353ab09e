//! L2 cache: an optional external key-value store, treated as best-effort
//! (spec §4.5: "network errors degrade to a miss"). Grounded on the
//! `redis` crate choice mined from the CAD example repo's caching stack;
//! the teacher carries no cache layer of its own. Compiled only behind the
//! `cache-redis` feature so a deployment without Redis carries no runtime
//! dependency on it.

use super::key::CacheKey;
use super::l1::CacheEntry;
use std::time::Duration;

#[cfg(feature = "cache-redis")]
mod backend {
    use super::*;
    use redis::Commands;

    pub struct L2Cache {
        client: redis::Client,
    }

    impl L2Cache {
        pub fn connect(url: &str) -> Result<Self, crate::error::CacheError> {
            let client = redis::Client::open(url)
                .map_err(|e| crate::error::CacheError::Backend(e.to_string()))?;
            Ok(Self { client })
        }

        /// A connection failure here is swallowed into a plain miss, per
        /// spec §4.5 — L2 is never allowed to fail a request.
        pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
            let mut conn = self.client.get_connection().ok()?;
            let raw: Vec<u8> = conn.get(key.to_hex()).ok()?;
            if raw.is_empty() {
                return None;
            }
            serde_json::from_slice::<StoredEntry>(&raw)
                .ok()
                .map(StoredEntry::into_entry)
        }

        pub fn put(&self, key: &CacheKey, entry: &CacheEntry) {
            let Ok(mut conn) = self.client.get_connection() else {
                return;
            };
            let stored = StoredEntry::from_entry(entry);
            if let Ok(bytes) = serde_json::to_vec(&stored) {
                let ttl_secs = entry.remaining_ttl().as_secs().max(1);
                let _: Result<(), redis::RedisError> =
                    conn.set_ex(key.to_hex(), bytes, ttl_secs);
            }
        }

        pub fn remove(&self, key: &CacheKey) {
            if let Ok(mut conn) = self.client.get_connection() {
                let _: Result<(), redis::RedisError> = conn.del(key.to_hex());
            }
        }
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct StoredEntry {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
        ttl_secs: u64,
    }

    impl StoredEntry {
        fn from_entry(entry: &CacheEntry) -> Self {
            Self {
                status: entry.status,
                headers: entry.headers.clone(),
                body: entry.body.clone(),
                ttl_secs: entry.remaining_ttl().as_secs(),
            }
        }

        fn into_entry(self) -> CacheEntry {
            CacheEntry::new(
                self.status,
                self.headers,
                self.body,
                Duration::from_secs(self.ttl_secs),
            )
        }
    }
}

#[cfg(feature = "cache-redis")]
pub use backend::L2Cache;

/// Stand-in used when the `cache-redis` feature is disabled: every call is
/// a miss / no-op, so callers do not need to branch on the feature flag.
#[cfg(not(feature = "cache-redis"))]
pub struct L2Cache;

#[cfg(not(feature = "cache-redis"))]
impl L2Cache {
    pub fn get(&self, _key: &CacheKey) -> Option<CacheEntry> {
        None
    }

    pub fn put(&self, _key: &CacheKey, _entry: &CacheEntry) {}

    pub fn remove(&self, _key: &CacheKey) {}
}
