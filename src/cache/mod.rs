//! Tiered response cache (spec §4.5): L1 in-process, optional L2 (Redis),
//! optional L3 (on-disk), with promotion on a lower-tier hit and
//! single-flight de-duplication of concurrent misses for the same key
//! (spec §9's open question, resolved here rather than left unguaranteed).

pub mod key;
pub mod l1;
pub mod l2;
pub mod l3;

use crate::http::{CacheDirectives, Method, Request, Response, ResponseBody};
use key::{CacheKey, CacheKeyPolicy};
use l1::{CacheEntry, L1Cache};
use l2::L2Cache;
use l3::L3Cache;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub l1_byte_capacity: usize,
    pub l1_ttl: Duration,
    pub l3_byte_capacity: u64,
    pub l3_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_byte_capacity: 64 * 1024 * 1024,
            l1_ttl: Duration::from_secs(60),
            l3_byte_capacity: 512 * 1024 * 1024,
            l3_ttl: Duration::from_secs(3600),
        }
    }
}

/// Per-key in-flight marker used to collapse concurrent cache misses into
/// one handler execution. The first miss for a key constructs the gate and
/// runs the handler; later misses for the same key wait on the condvar
/// instead of re-running it (spec §9: "de-duplication is not guaranteed by
/// this spec" — this crate chooses to guarantee it).
struct InflightGate {
    done: Mutex<bool>,
    condvar: Condvar,
}

pub struct ResponseCache {
    config: CacheConfig,
    l1: L1Cache,
    l2: Option<L2Cache>,
    l3: Option<L3Cache>,
    inflight: Mutex<HashMap<CacheKey, Arc<InflightGate>>>,
}

pub enum Lookup {
    Hit(Response),
    Miss,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, l2: Option<L2Cache>, l3: Option<L3Cache>) -> Self {
        Self {
            l1: L1Cache::new(config.l1_byte_capacity),
            config,
            l2,
            l3,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Probes L1, then L2, then L3, promoting a lower-tier hit to the
    /// faster tiers above it with its remaining TTL capped by L1's
    /// configured TTL (spec §4.5's read path).
    pub fn get(&self, key: &CacheKey) -> Lookup {
        if let Some(entry) = self.l1.get(key) {
            return Lookup::Hit(entry_to_response(entry));
        }

        if let Some(l2) = &self.l2 {
            if let Some(mut entry) = l2.get(key) {
                entry.ttl = entry.remaining_ttl().min(self.config.l1_ttl);
                self.l1.put(key.clone(), entry.clone());
                return Lookup::Hit(entry_to_response(entry));
            }
        }

        if let Some(l3) = &self.l3 {
            if let Some(mut entry) = l3.get(key) {
                entry.ttl = entry.remaining_ttl().min(self.config.l1_ttl);
                self.l1.put(key.clone(), entry.clone());
                if let Some(l2) = &self.l2 {
                    l2.put(key, &entry);
                }
                return Lookup::Hit(entry_to_response(entry));
            }
        }

        Lookup::Miss
    }

    /// Runs `on_miss` to produce a response, but only once per key among
    /// concurrent callers: the first caller for a key becomes the leader
    /// and executes `on_miss`; followers block until the leader inserts
    /// into the cache, then re-probe it.
    /// `ttl_override` is the route's own cache-policy TTL (spec §6), taking
    /// precedence over the response's own `Cache-Control: max-age` and the
    /// cache's configured default, in that order.
    pub fn get_or_compute(
        &self,
        key: &CacheKey,
        ttl_override: Option<Duration>,
        on_miss: impl FnOnce() -> Response,
    ) -> Response {
        if let Lookup::Hit(resp) = self.get(key) {
            return resp;
        }

        let gate = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(key) {
                existing.clone()
            } else {
                let gate = Arc::new(InflightGate {
                    done: Mutex::new(false),
                    condvar: Condvar::new(),
                });
                inflight.insert(key.clone(), gate.clone());
                return self.run_leader(key, ttl_override, gate, on_miss);
            }
        };

        let mut done = gate.done.lock();
        while !*done {
            gate.condvar.wait(&mut done);
        }
        match self.get(key) {
            Lookup::Hit(resp) => resp,
            Lookup::Miss => on_miss(),
        }
    }

    fn run_leader(
        &self,
        key: &CacheKey,
        ttl_override: Option<Duration>,
        gate: Arc<InflightGate>,
        on_miss: impl FnOnce() -> Response,
    ) -> Response {
        let response = on_miss();
        if is_cacheable(&response) {
            self.put(key, &response, ttl_override);
        }
        {
            let mut done = gate.done.lock();
            *done = true;
        }
        gate.condvar.notify_all();
        self.inflight.lock().remove(key);
        response
    }

    /// Inserts into every enabled tier (spec §4.5's write path). Callers
    /// are expected to have already checked `is_cacheable`.
    pub fn put(&self, key: &CacheKey, response: &Response, ttl_override: Option<Duration>) {
        let ttl = ttl_override
            .or_else(|| {
                response
                    .cache_directives
                    .as_ref()
                    .and_then(|d| d.max_age_secs)
                    .map(Duration::from_secs)
            })
            .unwrap_or(self.config.l1_ttl);

        let entry = CacheEntry::new(
            response.status,
            response.headers.clone(),
            response.body.as_bytes().to_vec(),
            ttl,
        );
        self.l1.put(key.clone(), entry.clone());
        if let Some(l2) = &self.l2 {
            l2.put(key, &entry);
        }
        if let Some(l3) = &self.l3 {
            let mut l3_entry = entry;
            l3_entry.ttl = self.config.l3_ttl;
            l3.put(key, &l3_entry);
        }
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.l1.remove(key);
        if let Some(l2) = &self.l2 {
            l2.remove(key);
        }
        if let Some(l3) = &self.l3 {
            l3.remove(key);
        }
    }

    pub fn clear(&self) {
        self.l1.clear();
        if let Some(l3) = &self.l3 {
            l3.clear();
        }
    }
}

fn entry_to_response(entry: CacheEntry) -> Response {
    Response {
        status: entry.status,
        headers: entry.headers,
        body: ResponseBody::Bytes(entry.body),
        cache_directives: None,
    }
}

/// Suppression rules from spec §4.5: `no-store`/`private` directives, or
/// an authenticated request without an explicit `cache_authenticated`
/// route policy (the latter is checked by the caller before `put`, since
/// it needs the original request's headers, not just the response).
pub fn is_cacheable(response: &Response) -> bool {
    if !response.cacheable_status_by_default() {
        return false;
    }
    match &response.cache_directives {
        Some(CacheDirectives { no_store: true, .. }) => false,
        Some(CacheDirectives { private: true, .. }) => false,
        _ => true,
    }
}

/// Whether a request is eligible to even consult the cache, per spec
/// §4.5's suppression rule for `Authorization`/`Cookie` headers absent an
/// explicit opt-in.
pub fn request_is_cacheable(req: &Request, cache_authenticated: bool) -> bool {
    if !Method::cacheable_by_default(&req.method) {
        return false;
    }
    if !cache_authenticated && (req.headers.contains("Authorization") || req.headers.contains("Cookie")) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn req() -> Request {
        Request {
            method: Method::Get,
            path: "/x".to_string(),
            raw_path: "/x".to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: crate::http::Body::Empty,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            context: crate::http::RequestContext::new(),
        }
    }

    #[test]
    fn miss_then_hit_after_insertion() {
        let cache = ResponseCache::new(CacheConfig::default(), None, None);
        let key = key::derive(&req(), &CacheKeyPolicy::default());

        assert!(matches!(cache.get(&key), Lookup::Miss));
        cache.put(&key, &Response::ok("hello"), None);
        match cache.get(&key) {
            Lookup::Hit(resp) => assert_eq!(resp.body.as_bytes(), b"hello"),
            Lookup::Miss => panic!("expected hit"),
        }
    }

    #[test]
    fn concurrent_misses_for_same_key_compute_once() {
        let cache = Arc::new(ResponseCache::new(CacheConfig::default(), None, None));
        let key = key::derive(&req(), &CacheKeyPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    cache.get_or_compute(&key, None, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Response::ok("computed")
                    })
                })
            })
            .collect();

        for h in handles {
            let resp = h.join().unwrap();
            assert_eq!(resp.body.as_bytes(), b"computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_store_response_is_not_cacheable() {
        let resp = Response::ok("x").cache_directives(CacheDirectives {
            no_store: true,
            private: false,
            max_age_secs: None,
        });
        assert!(!is_cacheable(&resp));
    }
}
