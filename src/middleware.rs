//! Priority-ordered pre/post middleware chain with short-circuit semantics
//! (spec §4.4). Not directly grounded on a `chopin` file — the teacher's
//! `router.rs` only carries a single optional `global_middleware` fn
//! pointer — so this is authored fresh in the teacher's synchronous,
//! non-generic style, using the same `Arc<dyn Fn...>` handler shape the
//! router uses for route handlers.

use crate::http::{Request, Response};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Whether a registered middleware runs before the handler or after it
/// (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pre,
    Post,
}

/// A middleware's hooks. `pre` returning `ControlFlow::Break` short-circuits
/// the remaining pre-chain and the handler; the post-chain still runs.
/// `on_cancel` is this crate's answer to the source's open question about
/// mid-handler disconnects (spec §9): it defaults to a no-op so existing
/// middleware need not implement it.
pub trait Middleware: Send + Sync {
    fn pre(&self, _req: &mut Request) -> ControlFlow<Response> {
        ControlFlow::Continue(())
    }

    fn post(&self, _req: &Request, resp: Response) -> Response {
        resp
    }

    fn on_cancel(&self, _req: &Request) {}
}

struct Registered {
    name: String,
    priority: i32,
    phase: Phase,
    middleware: Arc<dyn Middleware>,
}

/// Holds global middleware sorted by (priority, registration order) and a
/// name-indexed lookup so routes can reference per-route middleware by
/// name at registration time.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: Vec<Registered>,
    by_name: HashMap<String, usize>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers global middleware. Ties in priority are broken by
    /// registration order (spec §3's middleware-entry invariant), which a
    /// stable sort preserves.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        phase: Phase,
        middleware: Arc<dyn Middleware>,
    ) {
        let name = name.into();
        let idx = self.entries.len();
        self.entries.push(Registered {
            name: name.clone(),
            priority,
            phase,
            middleware,
        });
        self.by_name.insert(name, idx);
        self.entries
            .sort_by(|a, b| a.priority.cmp(&b.priority).then(Ordering::Equal));
    }

    fn global(&self, phase: Phase) -> Vec<&Registered> {
        self.entries.iter().filter(|e| e.phase == phase).collect()
    }

    fn resolve(&self, names: &[String], phase: Phase) -> Vec<Arc<dyn Middleware>> {
        names
            .iter()
            .filter_map(|n| self.by_name.get(n))
            .map(|&idx| &self.entries[idx])
            .filter(|e| e.phase == phase)
            .map(|e| e.middleware.clone())
            .collect()
    }

    /// Builds the full ordered chain for a single route: global pre (sorted
    /// by priority) + the route's own middleware in registration order,
    /// mirroring the remaining half for post (spec §4.4's splicing rule).
    pub fn build_chain(&self, route_middleware: &[String]) -> MiddlewareChain {
        let pre = self
            .global(Phase::Pre)
            .into_iter()
            .map(|e| e.middleware.clone())
            .chain(self.resolve(route_middleware, Phase::Pre))
            .collect();
        let post = self
            .resolve(route_middleware, Phase::Post)
            .into_iter()
            .chain(self.global(Phase::Post).into_iter().map(|e| e.middleware.clone()))
            .collect();
        MiddlewareChain { pre, post }
    }
}

pub struct MiddlewareChain {
    pre: Vec<Arc<dyn Middleware>>,
    post: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Runs the pre-chain, the handler (unless short-circuited), then the
    /// post-chain, per spec §4.4's contract.
    pub fn execute(
        &self,
        req: &mut Request,
        handler: impl FnOnce(&mut Request) -> Response,
    ) -> Response {
        let mut response = None;
        for mw in &self.pre {
            if let ControlFlow::Break(short_circuit) = mw.pre(req) {
                response = Some(short_circuit);
                break;
            }
        }

        let mut response = response.unwrap_or_else(|| handler(req));

        for mw in &self.post {
            response = mw.post(req, response);
        }
        response
    }

    /// Invoked by the worker when a connection is abandoned mid-handler
    /// (spec §9's `on_cancel` resolution). Runs every middleware in the
    /// chain regardless of phase.
    pub fn notify_cancel(&self, req: &Request) {
        for mw in self.pre.iter().chain(self.post.iter()) {
            mw.on_cancel(req);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    struct Counting {
        tag: &'static str,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
    }

    impl Middleware for Counting {
        fn pre(&self, _req: &mut Request) -> ControlFlow<Response> {
            self.log.lock().push(self.tag);
            ControlFlow::Continue(())
        }
    }

    struct ShortCircuit;
    impl Middleware for ShortCircuit {
        fn pre(&self, _req: &mut Request) -> ControlFlow<Response> {
            ControlFlow::Break(Response::new(403))
        }
    }

    #[test]
    fn pre_middleware_runs_in_priority_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.register(
            "b",
            20,
            Phase::Pre,
            Arc::new(Counting {
                tag: "b",
                log: log.clone(),
            }),
        );
        registry.register(
            "a",
            10,
            Phase::Pre,
            Arc::new(Counting {
                tag: "a",
                log: log.clone(),
            }),
        );

        let chain = registry.build_chain(&[]);
        let mut req = Request::for_test(Method::Get, "/");
        chain.execute(&mut req, |_| Response::ok("done"));

        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn short_circuit_skips_handler_and_remaining_pre_but_runs_post() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.register("guard", 0, Phase::Pre, Arc::new(ShortCircuit));
        registry.register(
            "never",
            10,
            Phase::Pre,
            Arc::new(Counting {
                tag: "never",
                log: log.clone(),
            }),
        );

        let chain = registry.build_chain(&[]);
        let mut req = Request::for_test(Method::Get, "/");
        let called = Arc::new(parking_lot::Mutex::new(false));
        let called2 = called.clone();
        let resp = chain.execute(&mut req, move |_| {
            *called2.lock() = true;
            Response::ok("handler")
        });

        assert_eq!(resp.status, 403);
        assert!(log.lock().is_empty());
        assert!(!*called.lock());
    }

    #[test]
    fn route_middleware_slots_between_global_pre_and_handler() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut registry = MiddlewareRegistry::new();
        registry.register(
            "global",
            0,
            Phase::Pre,
            Arc::new(Counting {
                tag: "global",
                log: log.clone(),
            }),
        );
        registry.register(
            "route-only",
            100,
            Phase::Pre,
            Arc::new(Counting {
                tag: "route-only",
                log: log.clone(),
            }),
        );

        let chain = registry.build_chain(&["route-only".to_string()]);
        let mut req = Request::for_test(Method::Get, "/");
        chain.execute(&mut req, |_| Response::ok("done"));

        assert_eq!(*log.lock(), vec!["global", "route-only"]);
    }
}
