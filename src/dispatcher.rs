//! Parameter binding, handler invocation, and result marshaling (spec
//! §4.9). Generalizes `chopin/src/extract.rs`'s `FromRequest` trait (there
//! specialized to a borrowed `Context<'a>` with only `Json`/`Query`
//! extractors, the latter an acknowledged stub) into the full binding
//! order spec §4.9 lists: path → query → header → body → DI.

use crate::di::{Container, RequestScope};
use crate::error::{DiError, ForgewebError, ForgewebResult};
use crate::http::{Request, Response};
use crate::middleware::MiddlewareChain;
use crate::router::{Handler, RouteParams, Router};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;

/// Extracts a typed value from the request at handler-invocation time.
/// Handlers call these binders in whatever order their parameters need,
/// matching spec §4.9's ordering of path/query/header/body/DI.
pub trait FromRequest: Sized {
    fn from_request(
        req: &Request,
        params: &RouteParams,
        container: &Container,
        scope: &mut RequestScope,
    ) -> Result<Self, ForgewebError>;
}

/// A single path parameter, coerced to `T` (spec §4.3/§4.9: typed
/// coercion of the decoded path-segment string).
pub struct Path<T>(pub T);

impl<T: FromStr> Path<T> {
    pub fn bind(params: &RouteParams, name: &str) -> Result<Self, ForgewebError> {
        let raw = params.get(name).ok_or_else(|| ForgewebError::Validation {
            field: name.to_string(),
            message: "missing path parameter".to_string(),
        })?;
        raw.parse::<T>()
            .map(Path)
            .map_err(|_| ForgewebError::Validation {
                field: name.to_string(),
                message: format!("could not coerce `{raw}`"),
            })
    }
}

/// The full query string, deserialized with `serde_urlencoded` (spec
/// §4.9's query-parameter binding step). The teacher's own `Query`
/// extractor in `extract.rs` is a stub returning an internal error
/// unconditionally; this is the real implementation.
pub struct Query<T>(pub T);

impl<T: DeserializeOwned> Query<T> {
    pub fn bind(req: &Request) -> Result<Self, ForgewebError> {
        let qs = req.query.as_deref().unwrap_or("");
        serde_urlencoded::from_str(qs)
            .map(Query)
            .map_err(|e| ForgewebError::Validation {
                field: "query".to_string(),
                message: e.to_string(),
            })
    }
}

/// A single header value, coerced to `T`.
pub struct Head<T>(pub T);

impl<T: FromStr> Head<T> {
    pub fn bind(req: &Request, name: &str) -> Result<Self, ForgewebError> {
        let raw = req.headers.get(name).ok_or_else(|| ForgewebError::Validation {
            field: name.to_string(),
            message: "missing header".to_string(),
        })?;
        raw.parse::<T>()
            .map(Head)
            .map_err(|_| ForgewebError::Validation {
                field: name.to_string(),
                message: format!("could not coerce `{raw}`"),
            })
    }
}

/// JSON request body. Body parsing itself is delegated to serde; broader
/// structural validation is the pluggable validator boundary the source
/// leaves out of scope (spec §1).
pub struct Json<T>(pub T);

impl<T: DeserializeOwned> Json<T> {
    pub fn bind(req: &Request) -> Result<Self, ForgewebError> {
        serde_json::from_slice(req.body.as_bytes())
            .map(Json)
            .map_err(|e| ForgewebError::Validation {
                field: "body".to_string(),
                message: e.to_string(),
            })
    }
}

/// A dependency resolved from the container (spec §4.9's final binding
/// step, and spec §4.8's resolution rules).
pub struct Dep<T>(pub Arc<T>);

impl<T: Any + Send + Sync> Dep<T> {
    pub fn bind(
        container: &Container,
        scope: &mut RequestScope,
        name: &str,
    ) -> Result<Self, ForgewebError> {
        container.resolve::<T>(name, scope).map(Dep)
    }
}

/// Marshals a handler's return value into a `Response` (spec §4.9's result
/// marshaling: Response as-is, structured value as JSON, byte/text with an
/// inferred content type).
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::ok(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::ok(self.to_string())
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Response {
            status: 200,
            headers: vec![(
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            )],
            body: crate::http::ResponseBody::Bytes(self),
            cache_directives: None,
        }
    }
}

impl IntoResponse for serde_json::Value {
    fn into_response(self) -> Response {
        Response::json(serde_json::to_vec(&self).unwrap_or_default())
    }
}

/// Wires the router, middleware registry, and DI container together for a
/// single logical application (spec §4.9: bind, invoke, marshal).
pub struct Dispatcher {
    pub router: Router,
    pub middleware: crate::middleware::MiddlewareRegistry,
    pub container: Container,
    pub debug: bool,
}

impl Dispatcher {
    pub fn new(
        router: Router,
        middleware: crate::middleware::MiddlewareRegistry,
        container: Container,
        debug: bool,
    ) -> Self {
        Self {
            router,
            middleware,
            container,
            debug,
        }
    }

    /// Routes, splices middleware, invokes the handler, and converts any
    /// error into the spec §7-shaped error response.
    pub fn dispatch(&self, mut req: Request) -> Response {
        let route_match = match self.router.match_route(req.method, &req.path) {
            Ok(m) => m,
            Err(e) => return e.into_response(self.debug),
        };

        let chain: MiddlewareChain = self.middleware.build_chain(&route_match.middleware);
        let handler: Handler = route_match.handler.clone();
        let params = route_match.params;

        chain.execute(&mut req, move |req| match handler(req, &params) {
            Ok(resp) => resp,
            Err(e) => e.into_response(self.debug),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;
    use std::sync::Arc as StdArc;

    #[test]
    fn path_param_coerces_to_integer() {
        let mut router = Router::new();
        router
            .add(
                Method::Get,
                "/items/:id",
                StdArc::new(|req: &mut Request, params: &RouteParams| {
                    let Path(id) = Path::<i64>::bind(params, "id")?;
                    Ok(Response::ok(format!("item {id}")))
                }),
                vec![],
            )
            .unwrap();

        let dispatcher = Dispatcher::new(
            router,
            crate::middleware::MiddlewareRegistry::new(),
            Container::new(),
            false,
        );
        let req = Request::for_test(Method::Get, "/items/42");
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_bytes(), b"item 42");
    }

    #[test]
    fn path_param_coercion_failure_is_422() {
        let mut router = Router::new();
        router
            .add(
                Method::Get,
                "/items/:id",
                StdArc::new(|req: &mut Request, params: &RouteParams| {
                    let Path(_id) = Path::<i64>::bind(params, "id")?;
                    Ok(Response::ok("unreachable"))
                }),
                vec![],
            )
            .unwrap();

        let dispatcher = Dispatcher::new(
            router,
            crate::middleware::MiddlewareRegistry::new(),
            Container::new(),
            false,
        );
        let req = Request::for_test(Method::Get, "/items/not-a-number");
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.status, 422);
    }

    #[test]
    fn unmatched_route_is_404() {
        let router = Router::new();
        let dispatcher = Dispatcher::new(
            router,
            crate::middleware::MiddlewareRegistry::new(),
            Container::new(),
            false,
        );
        let req = Request::for_test(Method::Get, "/nope");
        let resp = dispatcher.dispatch(req);
        assert_eq!(resp.status, 404);
    }
}
