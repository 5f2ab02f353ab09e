//! Per-worker counters, grounded directly on `crates/chopin-core/src/metrics.rs`'s
//! `WorkerMetrics` (cache-line aligned, relaxed atomics, sampled by a
//! dedicated reporter thread in `server.rs`). Extended with cache and task
//! counters SPEC_FULL's ambient-observability section calls for, following
//! the same shape rather than introducing a metrics crate the teacher does
//! not depend on.

use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(C, align(64))]
pub struct WorkerMetrics {
    pub req_count: AtomicUsize,
    pub active_conns: AtomicUsize,
    pub bytes_sent: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub static_files_served: AtomicUsize,
    pub errors: AtomicUsize,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self {
            req_count: AtomicUsize::new(0),
            active_conns: AtomicUsize::new(0),
            bytes_sent: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            cache_misses: AtomicUsize::new(0),
            static_files_served: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    pub fn inc_req(&self) {
        self.req_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conn(&self) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_conn(&self) {
        self.active_conns.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn inc_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_static_served(&self) {
        self.static_files_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let m = WorkerMetrics::new();
        m.inc_req();
        m.inc_conn();
        m.inc_conn();
        m.dec_conn();
        m.add_bytes(128);
        assert_eq!(m.req_count.load(Ordering::Relaxed), 1);
        assert_eq!(m.active_conns.load(Ordering::Relaxed), 1);
        assert_eq!(m.bytes_sent.load(Ordering::Relaxed), 128);
    }
}
