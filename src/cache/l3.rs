//! L3 cache: an on-disk store with its own byte-capacity ceiling and
//! longer TTL (spec §4.5). Not grounded on a `chopin` file; one-file-per-
//! entry layout mirrors the static-file engine's own filesystem access
//! pattern elsewhere in this crate, kept simple since L3 is the slowest,
//! least latency-sensitive tier. File layout follows spec §6 literally: a
//! length-prefixed header block followed by raw body bytes, filename the
//! hex-encoded key.

use super::key::CacheKey;
use super::l1::CacheEntry;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(serde::Serialize, serde::Deserialize)]
struct HeaderBlock {
    status: u16,
    headers: Vec<(String, String)>,
    stored_at_unix: u64,
    ttl_secs: u64,
}

struct StoredEntry {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    stored_at_unix: u64,
    ttl_secs: u64,
}

/// Serializes to spec §6's on-disk layout: an 8-byte little-endian length
/// prefix, the JSON-encoded header block, then the raw body bytes.
fn encode(entry: &StoredEntry) -> Option<Vec<u8>> {
    let block = HeaderBlock {
        status: entry.status,
        headers: entry.headers.clone(),
        stored_at_unix: entry.stored_at_unix,
        ttl_secs: entry.ttl_secs,
    };
    let header_bytes = serde_json::to_vec(&block).ok()?;
    let mut out = Vec::with_capacity(8 + header_bytes.len() + entry.body.len());
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&entry.body);
    Some(out)
}

fn decode(bytes: &[u8]) -> Option<StoredEntry> {
    if bytes.len() < 8 {
        return None;
    }
    let header_len = u64::from_le_bytes(bytes[..8].try_into().ok()?) as usize;
    let header_start = 8;
    let header_end = header_start.checked_add(header_len)?;
    if header_end > bytes.len() {
        return None;
    }
    let block: HeaderBlock = serde_json::from_slice(&bytes[header_start..header_end]).ok()?;
    let body = bytes[header_end..].to_vec();
    Some(StoredEntry {
        status: block.status,
        headers: block.headers,
        body,
        stored_at_unix: block.stored_at_unix,
        ttl_secs: block.ttl_secs,
    })
}

pub struct L3Cache {
    root: PathBuf,
    byte_capacity: u64,
    bytes_used: Mutex<u64>,
}

impl L3Cache {
    pub fn new(root: impl Into<PathBuf>, byte_capacity: u64) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let bytes_used = Self::scan_total_size(&root);
        Ok(Self {
            root,
            byte_capacity,
            bytes_used: Mutex::new(bytes_used),
        })
    }

    fn scan_total_size(root: &Path) -> u64 {
        fs::read_dir(root)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.cache", key.to_hex()))
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = fs::read(&path).ok()?;
        let stored = decode(&bytes)?;

        let stored_at = SystemTime::UNIX_EPOCH + Duration::from_secs(stored.stored_at_unix);
        let elapsed = SystemTime::now()
            .duration_since(stored_at)
            .unwrap_or_default();
        if elapsed.as_secs() >= stored.ttl_secs {
            let _ = fs::remove_file(&path);
            let mut used = self.bytes_used.lock();
            *used = used.saturating_sub(bytes.len() as u64);
            return None;
        }

        let remaining = Duration::from_secs(stored.ttl_secs.saturating_sub(elapsed.as_secs()));
        Some(CacheEntry::new(
            stored.status,
            stored.headers,
            stored.body,
            remaining,
        ))
    }

    pub fn put(&self, key: &CacheKey, entry: &CacheEntry) {
        let stored = StoredEntry {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            stored_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            ttl_secs: entry.remaining_ttl().as_secs().max(1),
        };
        let Some(bytes) = encode(&stored) else {
            return;
        };
        let size = bytes.len() as u64;
        if size > self.byte_capacity {
            return;
        }

        self.make_room(size);
        if fs::write(self.path_for(key), &bytes).is_ok() {
            *self.bytes_used.lock() += size;
        }
    }

    /// Evicts the oldest files by mtime until there is room for
    /// `incoming_size`, approximating the LRU policy the byte-faster tiers
    /// use exactly (spec §4.5 leaves L3's eviction policy unspecified).
    fn make_room(&self, incoming_size: u64) {
        let mut used = self.bytes_used.lock();
        if *used + incoming_size <= self.byte_capacity {
            return;
        }

        let mut entries: Vec<(PathBuf, SystemTime, u64)> = fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let meta = e.metadata().ok()?;
                let mtime = meta.modified().ok()?;
                Some((e.path(), mtime, meta.len()))
            })
            .collect();
        entries.sort_by_key(|(_, mtime, _)| *mtime);

        for (path, _, len) in entries {
            if *used + incoming_size <= self.byte_capacity {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                *used = used.saturating_sub(len);
            }
        }
    }

    pub fn remove(&self, key: &CacheKey) {
        let path = self.path_for(key);
        if let Ok(meta) = fs::metadata(&path) {
            let len = meta.len();
            if fs::remove_file(&path).is_ok() {
                let mut used = self.bytes_used.lock();
                *used = used.saturating_sub(len);
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(dir) = fs::read_dir(&self.root) {
            for entry in dir.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
        *self.bytes_used.lock() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(n: u8) -> CacheKey {
        CacheKey([n; 32])
    }

    #[test]
    fn roundtrips_an_entry_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = L3Cache::new(dir.path(), 1024 * 1024).unwrap();
        let entry = CacheEntry::new(200, vec![], b"payload".to_vec(), Duration::from_secs(60));
        cache.put(&key(1), &entry);

        let fetched = cache.get(&key(1)).unwrap();
        assert_eq!(fetched.body, b"payload");
        assert_eq!(fetched.status, 200);
    }

    #[test]
    fn expired_entry_is_removed_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = L3Cache::new(dir.path(), 1024 * 1024).unwrap();
        let entry = CacheEntry::new(200, vec![], b"payload".to_vec(), Duration::from_millis(1));
        cache.put(&key(1), &entry);
        std::thread::sleep(Duration::from_millis(1100));
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn on_disk_file_is_length_prefixed_header_then_raw_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = L3Cache::new(dir.path(), 1024 * 1024).unwrap();
        let entry = CacheEntry::new(200, vec![], b"raw-body".to_vec(), Duration::from_secs(60));
        cache.put(&key(7), &entry);

        let path = dir.path().join(format!("{}.cache", key(7).to_hex()));
        let bytes = fs::read(&path).unwrap();
        let header_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        let body_start = 8 + header_len;
        assert_eq!(&bytes[body_start..], b"raw-body");
    }

    #[test]
    fn entry_larger_than_capacity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = L3Cache::new(dir.path(), 4).unwrap();
        let entry = CacheEntry::new(200, vec![], b"too large".to_vec(), Duration::from_secs(60));
        cache.put(&key(1), &entry);
        assert!(cache.get(&key(1)).is_none());
    }
}
