//! L1 in-process response cache: byte-capacity bounded, approximate LRU,
//! per-entry TTL with lazy expiry on access (spec §4.5). Not grounded on a
//! `chopin` file; built with the `lru` crate behind a `parking_lot::Mutex`
//! so the critical section stays short, per spec §5's "L1 cache: concurrent
//! -safe map with bounded critical sections" resource policy.

use lru::LruCache;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::key::CacheKey;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>, ttl: Duration) -> Self {
        Self {
            status,
            headers,
            body,
            stored_at: Instant::now(),
            ttl,
            access_count: 0,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() >= self.ttl
    }

    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.stored_at.elapsed())
    }
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    byte_capacity: usize,
    bytes_used: usize,
}

/// A byte-bounded LRU cache. The `lru` crate's native capacity is an entry
/// count, so entries are evicted from the LRU tail whenever an insert would
/// push `bytes_used` over `byte_capacity`, rather than relying on a count
/// ceiling (spec §4.5's "bounded by a byte-capacity ceiling").
pub struct L1Cache {
    inner: Mutex<Inner>,
}

impl L1Cache {
    pub fn new(byte_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                byte_capacity,
                bytes_used: 0,
            }),
        }
    }

    /// Returns a clone of the entry on a live hit, updating recency.
    /// Entries past TTL are removed lazily and reported as a miss (spec
    /// §4.5: "entries past TTL return a miss and are removed lazily on
    /// access").
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.peek(key) {
            Some(e) => e.is_expired(),
            None => return None,
        };
        if expired {
            if let Some(removed) = inner.entries.pop(key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(removed.byte_size());
            }
            return None;
        }
        let entry = inner.entries.get_mut(key).unwrap();
        entry.access_count += 1;
        Some(entry.clone())
    }

    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        let size = entry.byte_size();
        if size > 0 {
            let mut inner = self.inner.lock();
            if let Some(old) = inner.entries.pop(&key) {
                inner.bytes_used = inner.bytes_used.saturating_sub(old.byte_size());
            }
            while inner.bytes_used + size > inner.byte_capacity && !inner.entries.is_empty() {
                if let Some((_, evicted)) = inner.entries.pop_lru() {
                    inner.bytes_used = inner.bytes_used.saturating_sub(evicted.byte_size());
                }
            }
            if size <= inner.byte_capacity {
                inner.bytes_used += size;
                inner.entries.put(key, entry);
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(removed) = inner.entries.pop(key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(removed.byte_size());
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes_used = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> CacheKey {
        CacheKey([n; 32])
    }

    #[test]
    fn hit_then_miss_after_ttl_expiry() {
        let cache = L1Cache::new(1024);
        let entry = CacheEntry::new(200, vec![], b"hello".to_vec(), Duration::from_millis(10));
        cache.put(key(1), entry);
        assert!(cache.get(&key(1)).is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn evicts_lru_entry_when_over_byte_capacity() {
        let cache = L1Cache::new(10);
        cache.put(
            key(1),
            CacheEntry::new(200, vec![], vec![0u8; 6], Duration::from_secs(60)),
        );
        cache.put(
            key(2),
            CacheEntry::new(200, vec![], vec![0u8; 6], Duration::from_secs(60)),
        );
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn recency_is_updated_on_read() {
        let cache = L1Cache::new(20);
        cache.put(
            key(1),
            CacheEntry::new(200, vec![], vec![0u8; 6], Duration::from_secs(60)),
        );
        cache.put(
            key(2),
            CacheEntry::new(200, vec![], vec![0u8; 6], Duration::from_secs(60)),
        );
        // Touch key(1) so key(2) becomes the LRU victim.
        cache.get(&key(1));
        cache.put(
            key(3),
            CacheEntry::new(200, vec![], vec![0u8; 6], Duration::from_secs(60)),
        );
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());
    }
}
