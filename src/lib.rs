//! forgeweb: a thread-per-core, non-blocking HTTP application framework
//! with a trie router, priority middleware, a tiered response cache, a
//! static-file engine, a background task executor, and a dependency
//! injection container. Architecturally grounded on `chopin/` — the
//! SO_REUSEPORT-per-core raw-socket engine carries over unmodified — with
//! the application-facing layers built out to match the full feature set.

pub mod app;
pub mod cache;
pub mod config;
pub mod conn;
pub mod di;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod parser;
pub mod router;
pub mod server;
pub mod slab;
pub mod static_files;
pub mod syscalls;
pub mod tasks;
pub mod worker;

pub use config::ForgewebConfig;
pub use di::{Container, Scope};
pub use dispatcher::{Dep, FromRequest, Head, IntoResponse, Json, Path, Query};
pub use error::{ForgewebError, ForgewebResult};
pub use http::{Method, Request, Response};
pub use middleware::{Middleware, MiddlewareRegistry, Phase};
pub use router::{Handler, RouteCachePolicy, RouteParams, Router};
pub use tasks::{ExecutorConfig, Priority as TaskPriority, TaskExecutor};

use std::sync::Arc;

use app::AppState;
use cache::key::CacheKeyPolicy;
use cache::l3::L3Cache;
use cache::ResponseCache;
use dispatcher::Dispatcher;
use metrics::WorkerMetrics;
use server::Server;
use static_files::StaticFileEngine;

/// Top-level application builder (spec §1): registers routes, middleware,
/// DI services, and static mounts, then binds and serves. Grounded on
/// `chopin/src/server.rs`'s `Server::bind().workers().serve(router)`
/// builder, widened to collect everything a request needs before the
/// first worker thread starts.
pub struct ForgewebApp {
    config: ForgewebConfig,
    router: Router,
    middleware: MiddlewareRegistry,
    container: Container,
}

impl ForgewebApp {
    pub fn new(config: ForgewebConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            middleware: MiddlewareRegistry::new(),
            container: Container::new(),
        }
    }

    /// Registers a route (spec §4.3). Returns `Err` on a route conflict,
    /// matching `Router::add`'s own contract.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        handler: Handler,
        route_middleware: Vec<String>,
    ) -> ForgewebResult<Self> {
        self.router.add(method, path, handler, route_middleware)?;
        Ok(self)
    }

    /// Opts an already-registered route into the tiered response cache, or
    /// overrides its TTL (spec §6). Chains after `.route(...)` for the same
    /// (method, path).
    pub fn cache_policy(
        mut self,
        method: Method,
        path: &str,
        policy: RouteCachePolicy,
    ) -> ForgewebResult<Self> {
        self.router.set_cache_policy(method, path, policy)?;
        Ok(self)
    }

    /// Registers global or named middleware (spec §4.4).
    pub fn middleware(
        mut self,
        name: impl Into<String>,
        priority: i32,
        phase: Phase,
        middleware: Arc<dyn Middleware>,
    ) -> Self {
        self.middleware.register(name, priority, phase, middleware);
        self
    }

    /// Registers a DI service (spec §4.8).
    pub fn service<F>(mut self, name: impl Into<String>, scope: Scope, constructor: F) -> Self
    where
        F: Fn(&Container, &mut di::RequestScope) -> ForgewebResult<Arc<dyn std::any::Any + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        self.container.register(name, scope, constructor);
        self
    }

    /// Mounts a static-file directory (spec §4.6).
    pub fn static_files(mut self, mount: static_files::StaticFilesConfig) -> Self {
        self.config.static_files.push(mount);
        self
    }

    /// Builds the shared application state and binds/serves it across
    /// `config.workers` threads. Blocks until shutdown.
    pub fn serve(self) -> ForgewebResult<()> {
        logging::init(&self.config.log_filter);

        let l3 = match &self.config.l3_cache_dir {
            Some(dir) => Some(L3Cache::new(dir, self.config.cache.l3_byte_capacity)?),
            None => None,
        };
        let cache = Some(ResponseCache::new(self.config.cache, None, l3));

        let static_engines = self
            .config
            .static_files
            .iter()
            .cloned()
            .map(StaticFileEngine::new)
            .collect();

        let tasks = Arc::new(TaskExecutor::new(self.config.executor));

        let dispatcher = Dispatcher::new(self.router, self.middleware, self.container, self.config.debug);

        let app = Arc::new(AppState {
            config: self.config,
            dispatcher,
            cache,
            cache_policy: CacheKeyPolicy::default(),
            static_engines,
            tasks,
            metrics: WorkerMetrics::new(),
        });

        Server::new(app).serve()
    }
}
