//! Request-handling façade shared by every worker thread (spec §4's full
//! pipeline, stitched together: static files → tiered cache → dispatcher).
//! Not grounded on a `chopin` file directly — the teacher's worker loop
//! calls `router.match_route` by itself — but follows its "one shared,
//! read-only `Arc` handed to every worker" pattern for `Router`/`metrics`.

use std::sync::Arc;

use crate::cache::key::CacheKeyPolicy;
use crate::cache::{self, ResponseCache};
use crate::config::ForgewebConfig;
use crate::dispatcher::Dispatcher;
use crate::http::{Request, Response};
use crate::metrics::WorkerMetrics;
use crate::static_files::StaticFileEngine;
use crate::tasks::TaskExecutor;

pub struct AppState {
    pub config: ForgewebConfig,
    pub dispatcher: Dispatcher,
    pub cache: Option<ResponseCache>,
    pub cache_policy: CacheKeyPolicy<'static>,
    pub static_engines: Vec<StaticFileEngine>,
    pub tasks: Arc<TaskExecutor>,
    pub metrics: WorkerMetrics,
}

impl AppState {
    /// Full pipeline for one parsed request (spec §4's end-to-end flow):
    /// static assets first, then the tiered cache guarding the dispatcher,
    /// falling back to routing/middleware/handler execution on a miss.
    pub fn handle(&self, req: Request) -> Response {
        for engine in &self.static_engines {
            match engine.serve(&req) {
                Ok(resp) => {
                    self.metrics.inc_static_served();
                    return resp;
                }
                Err(crate::error::StaticFileError::NotFound) => continue,
                Err(e) => return crate::error::ForgewebError::from(e).into_response(self.config.debug),
            }
        }

        let Some(cache) = &self.cache else {
            return self.dispatcher.dispatch(req);
        };

        // A route only enters the cache path once it has opted in (spec
        // §6's "optional cache policy"); an unmatched path or disallowed
        // method falls straight through so the dispatcher produces the
        // usual 404/405, matched here a second time but cheaply (trie
        // lookups are the router's whole point).
        let route_cache_policy = self
            .dispatcher
            .router
            .match_route(req.method, &req.path)
            .map(|m| m.cache_policy)
            .unwrap_or_default();

        if !route_cache_policy.enabled
            || !cache::request_is_cacheable(&req, self.config.cache_authenticated)
        {
            return self.dispatcher.dispatch(req);
        }

        let key = cache::key::derive(&req, &self.cache_policy);
        match cache.get(&key) {
            cache::Lookup::Hit(resp) => {
                self.metrics.inc_cache_hit();
                resp
            }
            cache::Lookup::Miss => {
                self.metrics.inc_cache_miss();
                let dispatcher = &self.dispatcher;
                let ttl_override = route_cache_policy.ttl;
                cache.get_or_compute(&key, ttl_override, move || dispatcher.dispatch(req))
            }
        }
    }
}
