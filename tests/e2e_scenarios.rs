//! End-to-end seed scenarios from spec §8, driven through `AppState::handle`
//! (the same entry point the worker event loop calls per request) rather
//! than through a real socket — everything above the TCP/epoll layer runs
//! exactly as it would in production.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use forgeweb::app::AppState;
use forgeweb::cache::key::CacheKeyPolicy;
use forgeweb::cache::{CacheConfig, ResponseCache};
use forgeweb::dispatcher::Dispatcher;
use forgeweb::http::{Body, HeaderMap, RequestContext};
use forgeweb::middleware::{Middleware, MiddlewareRegistry, Phase};
use forgeweb::tasks::{ExecutorConfig, TaskExecutor, WaitResult};
use forgeweb::{Container, Method, Request, Response, Router, TaskPriority};

fn test_request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request {
    let mut hm = HeaderMap::new();
    for (k, v) in headers {
        hm.insert(k, v.to_string());
    }
    Request {
        method,
        path: path.to_string(),
        raw_path: path.to_string(),
        query: None,
        headers: hm,
        body: Body::Empty,
        remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        context: RequestContext::new(),
    }
}

fn bare_app(router: Router, middleware: MiddlewareRegistry) -> AppState {
    let dispatcher = Dispatcher::new(router, middleware, Container::new(), false);
    AppState {
        config: forgeweb::ForgewebConfig::new("127.0.0.1", 0),
        dispatcher,
        cache: None,
        cache_policy: CacheKeyPolicy::default(),
        static_engines: Vec::new(),
        tasks: Arc::new(TaskExecutor::new(ExecutorConfig {
            min_workers: 0,
            max_workers: 0,
            ..Default::default()
        })),
        metrics: forgeweb::metrics::WorkerMetrics::new(),
    }
}

/// Scenario A — routing and params: `GET /users/{id}` echoes `id` as JSON.
#[test]
fn scenario_a_routing_and_params() {
    let mut router = Router::new();
    router
        .add(
            Method::Get,
            "/users/{id}",
            Arc::new(|_req: &mut Request, params: &forgeweb::RouteParams| {
                let id = params.get("id").unwrap_or_default();
                Ok(Response::json(format!(r#"{{"id":"{id}"}}"#)))
            }),
            vec![],
        )
        .unwrap();

    let app = bare_app(router, MiddlewareRegistry::new());
    let resp = app.handle(test_request(Method::Get, "/users/42", &[]));

    assert_eq!(resp.status, 200);
    assert_eq!(resp.body.as_bytes(), br#"{"id":"42"}"#);
}

/// Scenario B — method allow: registering only GET on `/x` and requesting
/// POST returns 405 with `Allow: GET`.
#[test]
fn scenario_b_method_allow() {
    let mut router = Router::new();
    router
        .add(
            Method::Get,
            "/x",
            Arc::new(|_req: &mut Request, _params: &forgeweb::RouteParams| Ok(Response::ok("ok"))),
            vec![],
        )
        .unwrap();

    let app = bare_app(router, MiddlewareRegistry::new());
    let resp = app.handle(test_request(Method::Post, "/x", &[]));

    assert_eq!(resp.status, 405);
    assert_eq!(resp.get_header("Allow"), Some("GET"));
}

struct AuthGate;
impl Middleware for AuthGate {
    fn pre(&self, req: &mut Request) -> ControlFlow<Response> {
        if req.headers.get("X-Token").is_some() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Response::new(401))
        }
    }
}

struct CountingMiddleware(Arc<AtomicUsize>);
impl Middleware for CountingMiddleware {
    fn pre(&self, _req: &mut Request) -> ControlFlow<Response> {
        self.0.fetch_add(1, Ordering::SeqCst);
        ControlFlow::Continue(())
    }
}

/// Scenario C — middleware short-circuit: M1 (priority 10) rejects
/// requests without `X-Token`; M2 (priority 20) counts. A request missing
/// the header is rejected and M2 never runs.
#[test]
fn scenario_c_middleware_short_circuit() {
    let mut router = Router::new();
    router
        .add(
            Method::Get,
            "/p",
            Arc::new(|_req: &mut Request, _params: &forgeweb::RouteParams| {
                Ok(Response::ok("handled"))
            }),
            vec![],
        )
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = MiddlewareRegistry::new();
    registry.register("auth", 10, Phase::Pre, Arc::new(AuthGate));
    registry.register(
        "counter",
        20,
        Phase::Pre,
        Arc::new(CountingMiddleware(counter.clone())),
    );

    let app = bare_app(router, registry);
    let resp = app.handle(test_request(Method::Get, "/p", &[]));

    assert_eq!(resp.status, 401);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

/// Scenario D — cache hit: a cache-enabled route returns the handler's
/// response on a miss, then serves the identical bytes on an immediate
/// repeat without invoking the handler again.
#[test]
fn scenario_d_cache_hit_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_handler = calls.clone();

    let mut router = Router::new();
    router
        .add(
            Method::Get,
            "/a",
            Arc::new(move |_req: &mut Request, _params: &forgeweb::RouteParams| {
                calls_for_handler.fetch_add(1, Ordering::SeqCst);
                Ok(Response::ok("H1"))
            }),
            vec![],
        )
        .unwrap();
    router
        .set_cache_policy(
            Method::Get,
            "/a",
            forgeweb::RouteCachePolicy {
                enabled: true,
                ttl: None,
            },
        )
        .unwrap();

    let dispatcher = Dispatcher::new(router, MiddlewareRegistry::new(), Container::new(), false);
    let app = AppState {
        config: forgeweb::ForgewebConfig::new("127.0.0.1", 0),
        dispatcher,
        cache: Some(ResponseCache::new(CacheConfig::default(), None, None)),
        cache_policy: CacheKeyPolicy::default(),
        static_engines: Vec::new(),
        tasks: Arc::new(TaskExecutor::new(ExecutorConfig {
            min_workers: 0,
            max_workers: 0,
            ..Default::default()
        })),
        metrics: forgeweb::metrics::WorkerMetrics::new(),
    };

    let first = app.handle(test_request(Method::Get, "/a", &[]));
    assert_eq!(first.body.as_bytes(), b"H1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = app.handle(test_request(Method::Get, "/a", &[]));
    assert_eq!(second.body.as_bytes(), b"H1");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "handler must not run again on a cache hit");
}

/// Scenario E — static conditional GET: a first request returns an ETag; a
/// second request with `If-None-Match` set to it returns 304 with no body.
#[test]
fn scenario_e_static_conditional_get() {
    use forgeweb::static_files::{StaticFileEngine, StaticFilesConfig};

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("style.css"), b"body { color: red; }").unwrap();
    let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));

    let first = engine
        .serve(&test_request(Method::Get, "/static/style.css", &[]))
        .unwrap();
    assert_eq!(first.status, 200);
    let etag = first.get_header("ETag").unwrap().to_string();

    let second = engine
        .serve(&test_request(
            Method::Get,
            "/static/style.css",
            &[("If-None-Match", &etag)],
        ))
        .unwrap();
    assert_eq!(second.status, 304);
    assert!(second.body.as_bytes().is_empty());
}

/// Scenario F — background retry: a task that fails on attempts 1 and 2
/// and succeeds on attempt 3, enqueued with `max_retries = 3`, resolves
/// successfully after exactly 3 invocations.
#[test]
fn scenario_f_background_retry_then_success() {
    let executor = TaskExecutor::new(ExecutorConfig {
        min_workers: 1,
        max_workers: 1,
        ..Default::default()
    });

    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_for_task = attempts.clone();

    let handle = executor
        .enqueue(
            TaskPriority::Normal,
            3,
            Duration::from_secs(5),
            Box::new(move || {
                let n = attempts_for_task.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(forgeweb::ForgewebError::Other("not yet".to_string()))
                } else {
                    Ok(b"done".to_vec())
                }
            }),
        )
        .unwrap();

    match handle.wait(Duration::from_secs(3)) {
        WaitResult::Success(bytes) => assert_eq!(bytes, b"done"),
        _ => panic!("expected eventual success, got a different outcome"),
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
