//! Compressed trie router. Generalizes `chopin/src/router.rs`'s
//! `RouteNode`/`Router` (fn-pointer handlers, fixed-size param array) into a
//! per-route-method table of boxed handlers with owned parameter values,
//! route-conflict detection, and `405 Method Not Allowed` with a sorted
//! `Allow` header, per spec §4.3.

use crate::error::{ForgewebResult, RouterError};
use crate::http::{Method, Request, Response};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A route's opt-in to the tiered response cache (spec §6's "optional
/// cache policy" at registration). Disabled by default: a route is only
/// cached once `Router::set_cache_policy` is called for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteCachePolicy {
    pub enabled: bool,
    /// Overrides the cache's configured default TTL for this route's
    /// entries when set.
    pub ttl: Option<Duration>,
}

/// Classification of one path-pattern segment, shared by `add` (which may
/// create trie nodes) and `set_cache_policy` (which only walks existing
/// ones) so the two never disagree on what a segment means.
struct SegmentKind {
    is_param: bool,
    is_wildcard: bool,
    param_name: Option<String>,
    literal: String,
}

/// Splits a path into trie segments per spec §4.3's insertion rule: the
/// single leading `/` all absolute paths carry is normalized away, and `/`
/// itself normalizes to zero segments (matching a route registered as `/`
/// rather than `/` followed by an empty parameter). A *trailing* slash is
/// significant (spec §4.3's edge cases, §8 boundary behaviors): `/a/` keeps
/// a real empty final segment distinct from `/a`, so `/users/{id}` does not
/// match `/users/`.
fn path_segments(path: &str) -> Vec<&str> {
    if path.is_empty() || path == "/" {
        return Vec::new();
    }
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.split('/').collect()
}

fn classify_segment(segment: &str) -> SegmentKind {
    let brace_name = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}'));
    let is_param = segment.starts_with(':') || brace_name.is_some();
    let is_wildcard = segment.starts_with('*');
    let param_name = if let Some(name) = brace_name {
        Some(name.to_string())
    } else if is_param || is_wildcard {
        Some(segment[1..].to_string())
    } else {
        None
    };
    let literal = if is_param || is_wildcard {
        String::new()
    } else {
        segment.to_string()
    };
    SegmentKind {
        is_param,
        is_wildcard,
        param_name,
        literal,
    }
}

/// A route handler. Takes the owned request plus the parameters captured
/// during trie descent; dispatcher.rs layers parameter binding and DI
/// resolution on top of this.
pub type Handler = Arc<dyn Fn(&mut Request, &RouteParams) -> ForgewebResult<Response> + Send + Sync>;

/// Named path parameters captured while matching a route, in declaration
/// order (spec §3).
#[derive(Debug, Clone, Default)]
pub struct RouteParams(Vec<(String, String)>);

impl RouteParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

struct RouteEntry {
    handler: Handler,
    /// Names of per-route middleware, resolved against the global registry
    /// by middleware.rs when building the dispatch chain (spec §4.4).
    middleware: Vec<String>,
    cache_policy: RouteCachePolicy,
}

#[derive(Default)]
struct RouteNode {
    path: String,
    handlers: HashMap<Method, RouteEntry>,
    children: Vec<RouteNode>,
    is_param: bool,
    is_wildcard: bool,
    param_name: Option<String>,
}

impl RouteNode {
    fn new(path: String) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }
}

pub struct RouteMatch {
    pub handler: Handler,
    pub params: RouteParams,
    pub middleware: Vec<String>,
    pub cache_policy: RouteCachePolicy,
}

#[derive(Default)]
pub struct Router {
    root: RouteNode,
}

impl Router {
    pub fn new() -> Self {
        Self {
            root: RouteNode::new(String::new()),
        }
    }

    /// Registers a route, detecting two conflict classes per spec §4.3:
    /// the same (method, path) registered twice, and a parameter segment
    /// whose name disagrees with a sibling param already occupying that
    /// trie position.
    pub fn add(
        &mut self,
        method: Method,
        path: &str,
        handler: Handler,
        middleware: Vec<String>,
    ) -> ForgewebResult<()> {
        let segments: Vec<&str> = path_segments(path);
        let mut current = &mut self.root;

        for segment in &segments {
            // spec §6's registration grammar writes named parameters as
            // `{name}`; `:name` is kept as an accepted alias since it is
            // the trie's own internal shorthand (and the teacher's).
            let SegmentKind {
                is_param,
                is_wildcard,
                param_name,
                literal: segment_path,
            } = classify_segment(segment);

            if is_param {
                if let Some(existing) = current
                    .children
                    .iter()
                    .find(|c| c.is_param && c.param_name.as_deref() != param_name.as_deref())
                {
                    return Err(RouterError::Conflict(format!(
                        "param name `{}` conflicts with existing `{}` at the same position in `{}`",
                        param_name.as_deref().unwrap_or(""),
                        existing.param_name.as_deref().unwrap_or(""),
                        path
                    ))
                    .into());
                }
            }

            let found_idx = current.children.iter().position(|child| {
                child.is_param == is_param
                    && child.is_wildcard == is_wildcard
                    && (is_param || is_wildcard || child.path == segment_path)
            });

            current = if let Some(idx) = found_idx {
                &mut current.children[idx]
            } else {
                let mut new_node = RouteNode::new(segment_path);
                new_node.is_param = is_param;
                new_node.is_wildcard = is_wildcard;
                new_node.param_name = param_name;
                current.children.push(new_node);
                current.children.last_mut().unwrap()
            };
        }

        if current.handlers.contains_key(&method) {
            return Err(RouterError::Conflict(format!(
                "{} {} is already registered",
                method.as_str(),
                path
            ))
            .into());
        }

        current.handlers.insert(
            method,
            RouteEntry {
                handler,
                middleware,
                cache_policy: RouteCachePolicy::default(),
            },
        );
        Ok(())
    }

    /// Opts an already-registered (method, path) into the response cache,
    /// or overrides its TTL (spec §6's "optional cache policy" at
    /// registration). Errors with `RouterError::NotFound` if the route
    /// hasn't been added yet.
    pub fn set_cache_policy(
        &mut self,
        method: Method,
        path: &str,
        policy: RouteCachePolicy,
    ) -> ForgewebResult<()> {
        let segments: Vec<&str> = path_segments(path);
        let mut current = &mut self.root;

        for segment in &segments {
            let kind = classify_segment(segment);
            let idx = current.children.iter().position(|child| {
                child.is_param == kind.is_param
                    && child.is_wildcard == kind.is_wildcard
                    && (kind.is_param || kind.is_wildcard || child.path == kind.literal)
            });
            current = match idx {
                Some(idx) => &mut current.children[idx],
                None => return Err(RouterError::NotFound.into()),
            };
        }

        match current.handlers.get_mut(&method) {
            Some(entry) => {
                entry.cache_policy = policy;
                Ok(())
            }
            None => Err(RouterError::NotFound.into()),
        }
    }

    /// Resolves a route. Distinguishes "no path matched" (404) from "path
    /// matched, method didn't" (405 with a sorted `Allow` header), per
    /// spec §4.3's edge case list.
    pub fn match_route(&self, method: Method, path: &str) -> ForgewebResult<RouteMatch> {
        let segments: Vec<&str> = path_segments(path);
        let mut params = Vec::new();

        let node = Self::match_recursive(&self.root, &segments, 0, &mut params)
            .ok_or(RouterError::NotFound)?;

        match node.handlers.get(&method) {
            Some(entry) => Ok(RouteMatch {
                handler: entry.handler.clone(),
                params: RouteParams(params),
                middleware: entry.middleware.clone(),
                cache_policy: entry.cache_policy,
            }),
            None => {
                if node.handlers.is_empty() {
                    Err(RouterError::NotFound.into())
                } else {
                    let mut allowed: Vec<String> = node
                        .handlers
                        .keys()
                        .map(|m| m.as_str().to_string())
                        .collect();
                    allowed.sort();
                    Err(RouterError::MethodNotAllowed { allowed }.into())
                }
            }
        }
    }

    /// Literal segments are tried before named parameters, which are tried
    /// before a trailing wildcard, matching the teacher's precedence. The
    /// choice is committal: once a literal child matches the segment, its
    /// subtree result (success or failure) is returned directly rather than
    /// falling through to try a sibling parameter or wildcard child. This
    /// keeps lookup O(path length) with no backtracking, per spec §4.3 —
    /// registering both `/a/b` and `/{x}/c` and requesting `/a/c` is a 404,
    /// not a match against `/{x}/c`.
    fn match_recursive<'a>(
        node: &'a RouteNode,
        segments: &[&str],
        depth: usize,
        params: &mut Vec<(String, String)>,
    ) -> Option<&'a RouteNode> {
        if depth == segments.len() {
            return Some(node);
        }
        let segment = segments[depth];

        if let Some(child) = node
            .children
            .iter()
            .find(|c| !c.is_param && !c.is_wildcard && c.path == segment)
        {
            return Self::match_recursive(child, segments, depth + 1, params);
        }

        // An empty segment (trailing slash, or a double slash normalized
        // upstream) never binds to a parameter (spec §8: `/users/{id}`
        // does not match `/users/`) — it can only match a literal empty
        // segment, handled above.
        if !segment.is_empty() {
            if let Some(child) = node.children.iter().find(|c| c.is_param) {
                params.push((child.param_name.clone().unwrap(), segment.to_string()));
                return Self::match_recursive(child, segments, depth + 1, params);
            }
        }

        if let Some(child) = node.children.iter().find(|c| c.is_wildcard) {
            let rest = segments[depth..].join("/");
            params.push((child.param_name.clone().unwrap(), rest));
            return Some(child);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;

    fn noop_handler() -> Handler {
        Arc::new(|_req, _params| Ok(Response::ok("ok")))
    }

    #[test]
    fn matches_static_route() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/hello/world", noop_handler(), vec![])
            .unwrap();

        assert!(router.match_route(Method::Get, "/hello/world").is_ok());
        assert!(router.match_route(Method::Get, "/hello").is_err());
    }

    #[test]
    fn literal_match_does_not_backtrack_into_sibling_param() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/a/b", noop_handler(), vec![])
            .unwrap();
        router
            .add(Method::Get, "/{x}/c", noop_handler(), vec![])
            .unwrap();

        assert!(router.match_route(Method::Get, "/a/c").is_err());
        assert!(router.match_route(Method::Get, "/q/c").is_ok());
        assert!(router.match_route(Method::Get, "/a/b").is_ok());
    }

    #[test]
    fn returns_method_not_allowed_with_sorted_allow_list() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/items", noop_handler(), vec![])
            .unwrap();
        router
            .add(Method::Post, "/items", noop_handler(), vec![])
            .unwrap();

        let err = router.match_route(Method::Delete, "/items").unwrap_err();
        match err {
            crate::error::ForgewebError::Router(RouterError::MethodNotAllowed { allowed }) => {
                assert_eq!(allowed, vec!["GET".to_string(), "POST".to_string()]);
            }
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn captures_named_parameters() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/users/:id/posts/:post_id", noop_handler(), vec![])
            .unwrap();

        let m = router.match_route(Method::Get, "/users/123/posts/abc").unwrap();
        assert_eq!(m.params.get("id"), Some("123"));
        assert_eq!(m.params.get("post_id"), Some("abc"));
    }

    #[test]
    fn brace_param_syntax_is_accepted() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/users/{id}", noop_handler(), vec![])
            .unwrap();

        let m = router.match_route(Method::Get, "/users/42").unwrap();
        assert_eq!(m.params.get("id"), Some("42"));
    }

    #[test]
    fn wildcard_captures_remaining_path() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/assets/*path", noop_handler(), vec![])
            .unwrap();

        let m = router
            .match_route(Method::Get, "/assets/js/app.js")
            .unwrap();
        assert_eq!(m.params.get("path"), Some("js/app.js"));
    }

    #[test]
    fn literal_segments_take_precedence_over_params() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/users/:id", noop_handler(), vec![])
            .unwrap();
        router
            .add(Method::Get, "/users/me", noop_handler(), vec![])
            .unwrap();

        let m = router.match_route(Method::Get, "/users/me").unwrap();
        assert!(m.params.get("id").is_none());
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/x", noop_handler(), vec![])
            .unwrap();
        let err = router.add(Method::Get, "/x", noop_handler(), vec![]);
        assert!(matches!(
            err,
            Err(crate::error::ForgewebError::Router(RouterError::Conflict(_)))
        ));
    }

    #[test]
    fn conflicting_param_names_at_same_position_are_rejected() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/users/:id", noop_handler(), vec![])
            .unwrap();
        let err = router.add(Method::Get, "/users/:name", noop_handler(), vec![]);
        assert!(matches!(
            err,
            Err(crate::error::ForgewebError::Router(RouterError::Conflict(_)))
        ));
    }

    #[test]
    fn routes_are_not_cacheable_until_opted_in() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/a", noop_handler(), vec![])
            .unwrap();

        let before = router.match_route(Method::Get, "/a").unwrap();
        assert!(!before.cache_policy.enabled);

        router
            .set_cache_policy(
                Method::Get,
                "/a",
                RouteCachePolicy {
                    enabled: true,
                    ttl: Some(Duration::from_secs(60)),
                },
            )
            .unwrap();

        let after = router.match_route(Method::Get, "/a").unwrap();
        assert!(after.cache_policy.enabled);
        assert_eq!(after.cache_policy.ttl, Some(Duration::from_secs(60)));
    }

    #[test]
    fn setting_cache_policy_on_unregistered_route_is_not_found() {
        let mut router = Router::new();
        let err = router.set_cache_policy(Method::Get, "/missing", RouteCachePolicy::default());
        assert!(matches!(
            err,
            Err(crate::error::ForgewebError::Router(RouterError::NotFound))
        ));
    }

    #[test]
    fn trailing_slash_is_a_distinct_route() {
        let mut router = Router::new();
        router.add(Method::Get, "/a", noop_handler(), vec![]).unwrap();

        assert!(router.match_route(Method::Get, "/a").is_ok());
        assert!(router.match_route(Method::Get, "/a/").is_err());
    }

    #[test]
    fn param_route_does_not_match_trailing_empty_segment() {
        let mut router = Router::new();
        router
            .add(Method::Get, "/users/:id", noop_handler(), vec![])
            .unwrap();

        assert!(router.match_route(Method::Get, "/users/").is_err());
        assert!(router.match_route(Method::Get, "/users/a/b").is_err());
    }

    #[test]
    fn root_path_matches_root_registration() {
        let mut router = Router::new();
        router.add(Method::Get, "/", noop_handler(), vec![]).unwrap();

        assert!(router.match_route(Method::Get, "/").is_ok());
    }
}
