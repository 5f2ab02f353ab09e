//! Minimal runnable entry point, in the spirit of the teacher's
//! `examples/hello_json.rs`: wires a few routes, a logging middleware, and
//! a static mount onto `ForgewebApp` and serves it. CLI argument parsing
//! and process packaging are out of scope (spec §1); this is just the
//! smallest program that exercises the pipeline end to end.

use std::ops::ControlFlow;
use std::sync::Arc;

use forgeweb::{
    ForgewebConfig, ForgewebApp, Method, Middleware, Phase, Request, Response,
};

struct RequestLogger;

impl Middleware for RequestLogger {
    fn pre(&self, req: &mut Request) -> ControlFlow<Response> {
        tracing::info!(method = req.method.as_str(), path = %req.path, "request");
        ControlFlow::Continue(())
    }
}

fn hello(_req: &mut Request, _params: &forgeweb::RouteParams) -> forgeweb::ForgewebResult<Response> {
    Ok(Response::ok("Hello, World!"))
}

fn greet(
    _req: &mut Request,
    params: &forgeweb::RouteParams,
) -> forgeweb::ForgewebResult<Response> {
    let name = params.get("name").unwrap_or("World");
    Ok(Response::ok(format!("Hello, {name}!")))
}

fn main() -> forgeweb::ForgewebResult<()> {
    let config = ForgewebConfig::new("127.0.0.1", 8080).workers(num_cpus::get());

    ForgewebApp::new(config)
        .middleware("request-logger", 0, Phase::Pre, Arc::new(RequestLogger))
        .route(Method::Get, "/", Arc::new(hello), vec![])?
        .route(Method::Get, "/hello/{name}", Arc::new(greet), vec![])?
        .serve()
}
