//! Cache key derivation (spec §4.5): SHA-256 over method, normalized path,
//! canonicalized query, and a route-selected subset of headers. Not
//! grounded on a `chopin` file directly (the teacher has no cache layer);
//! the `sha2` hashing idiom is borrowed from the CAD example repo's
//! content-addressing code, which is the only pack repo that hashes
//! request-shaped data this way.

use crate::http::{Method, Request};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyPolicy<'a> {
    /// Volatile query parameters stripped before sorting the remainder
    /// (e.g. tracking parameters), named at route-registration time.
    pub query_denylist: &'a [&'a str],
    /// Extra header names to fold into the key beyond the default
    /// `Accept`/`Accept-Encoding`, populated from a route's `Vary` policy.
    pub vary_headers: &'a [&'a str],
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub [u8; 32]);

impl CacheKey {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

pub fn derive(req: &Request, policy: &CacheKeyPolicy) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update(req.method.as_str().as_bytes());
    hasher.update(b"\0");
    // Cache keys hash the raw, un-decoded path; routing matches against
    // the percent-decoded one (spec §9's resolution of its own open
    // question on this point, recorded in DESIGN.md).
    hasher.update(req.raw_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonicalize_query(req.query.as_deref(), policy.query_denylist).as_bytes());

    let mut headers: Vec<&str> = vec!["Accept", "Accept-Encoding"];
    headers.extend(policy.vary_headers);
    headers.sort_unstable();
    headers.dedup();

    for name in headers {
        hasher.update(b"\0");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(req.headers.get(name).unwrap_or("").as_bytes());
    }

    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    CacheKey(out)
}

/// Removes denylisted parameters, then sorts the remainder by name so
/// semantically-equivalent queries in different orders hash identically.
fn canonicalize_query(query: Option<&str>, denylist: &[&str]) -> String {
    let Some(qs) = query else {
        return String::new();
    };
    let mut pairs: Vec<(&str, &str)> = qs
        .split('&')
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let mut it = p.splitn(2, '=');
            let k = it.next()?;
            let v = it.next().unwrap_or("");
            Some((k, v))
        })
        .filter(|(k, _)| !denylist.contains(k))
        .collect();
    pairs.sort_unstable();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Whether a request is method-cacheable by default (spec §4.5: GET/HEAD).
pub fn is_cacheable_method(method: Method) -> bool {
    method.cacheable_by_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HeaderMap;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn req(path: &str, query: Option<&str>) -> Request {
        Request {
            method: Method::Get,
            path: path.to_string(),
            raw_path: path.to_string(),
            query: query.map(str::to_string),
            headers: HeaderMap::new(),
            body: crate::http::Body::Empty,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            context: crate::http::RequestContext::new(),
        }
    }

    #[test]
    fn query_parameter_order_does_not_affect_key() {
        let policy = CacheKeyPolicy::default();
        let a = derive(&req("/x", Some("b=2&a=1")), &policy);
        let b = derive(&req("/x", Some("a=1&b=2")), &policy);
        assert_eq!(a, b);
    }

    #[test]
    fn denylisted_params_are_excluded() {
        let policy = CacheKeyPolicy {
            query_denylist: &["utm_source"],
            vary_headers: &[],
        };
        let a = derive(&req("/x", Some("a=1&utm_source=foo")), &policy);
        let b = derive(&req("/x", Some("a=1")), &policy);
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_hash_differently() {
        let policy = CacheKeyPolicy::default();
        let a = derive(&req("/x", None), &policy);
        let b = derive(&req("/y", None), &policy);
        assert_ne!(a, b);
    }
}
