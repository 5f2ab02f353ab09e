//! Core HTTP data types: `Method`, `Request`, `Response`, header storage and
//! body representations. Extends the teacher's `chopin/src/http.rs` (the
//! `Method` enum and `Response` builder are grounded there directly) into
//! the owned, spec-shaped `Request`/`Response` records of SPEC_FULL §3.

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Unknown => "UNKNOWN",
        }
    }

    /// Whether responses to this method are cacheable by default (spec §4.5).
    pub fn cacheable_by_default(&self) -> bool {
        matches!(self, Method::Get | Method::Head)
    }
}

/// Case-insensitive, order-preserving header multimap. Stores the header
/// name with its first-seen casing, per spec §4.2.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_string(), value.into()));
    }

    /// First value for a header name, case-insensitive.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Request body: a finite buffer, a length-known streaming reader, a
/// chunked-encoding reader, or empty (spec §3). The streaming variants are
/// boxed iterators of chunks to keep the pipeline synchronous.
pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    Streaming {
        content_length: u64,
        chunks: Box<dyn Iterator<Item = std::io::Result<Vec<u8>>> + Send>,
    },
    Chunked(Box<dyn Iterator<Item = std::io::Result<Vec<u8>>> + Send>),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Bytes(b) => b.len(),
            Body::Streaming { content_length, .. } => *content_length as usize,
            Body::Chunked(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && !matches!(self, Body::Chunked(_) | Body::Streaming { .. })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Bytes(b) => b.as_slice(),
            _ => &[],
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => write!(f, "Body::Empty"),
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Streaming { content_length, .. } => {
                write!(f, "Body::Streaming({content_length} bytes)")
            }
            Body::Chunked(_) => write!(f, "Body::Chunked"),
        }
    }
}

/// Per-request mutable bag middleware use to pass data forward. Owned by
/// the request, released when the response is written (spec §3).
#[derive(Default)]
pub struct RequestContext {
    values: HashMap<String, Box<dyn Any + Send>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Any + Send>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    pub fn get<T: Any + Send>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }
}

/// A parsed, immutable-after-parse HTTP request (spec §3). Owned rather
/// than borrowed from the connection buffer: unlike the teacher's
/// `Context<'a>`, this request must be able to outlive the parse buffer
/// long enough to flow through middleware, the tiered cache, and
/// background-task argument snapshots.
pub struct Request {
    pub method: Method,
    /// Percent-decoded path, used for routing (spec §4.2/§4.3).
    pub path: String,
    /// Raw, un-decoded path as it appeared on the wire, used for cache
    /// keys (spec §4.5, §9 open question resolution).
    pub raw_path: String,
    /// Raw, un-decoded query string.
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
    pub remote_addr: SocketAddr,
    pub context: RequestContext,
}

impl Request {
    pub fn for_test(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            raw_path: path.to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            context: RequestContext::new(),
        }
    }
}

/// Directives influencing both response-cache inclusion and client
/// `Cache-Control` headers (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CacheDirectives {
    pub no_store: bool,
    pub private: bool,
    pub max_age_secs: Option<u64>,
}

pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    Stream(Box<dyn Iterator<Item = Vec<u8>> + Send>),
    File {
        path: std::path::PathBuf,
        range: Option<(u64, u64)>,
        total_len: u64,
    },
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Empty => write!(f, "ResponseBody::Empty"),
            ResponseBody::Bytes(b) => write!(f, "ResponseBody::Bytes({} bytes)", b.len()),
            ResponseBody::Stream(_) => write!(f, "ResponseBody::Stream"),
            ResponseBody::File { path, range, total_len } => {
                write!(f, "ResponseBody::File({path:?}, {range:?}, {total_len})")
            }
        }
    }
}

impl ResponseBody {
    pub fn len(&self) -> usize {
        match self {
            ResponseBody::Empty => 0,
            ResponseBody::Bytes(b) => b.len(),
            ResponseBody::Stream(_) => 0,
            ResponseBody::File { range, total_len, .. } => match range {
                Some((start, end)) => (end - start + 1) as usize,
                None => *total_len as usize,
            },
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResponseBody::Bytes(b) => b.as_slice(),
            _ => &[],
        }
    }
}

/// An HTTP response (spec §3): status, headers, body, and optional cache
/// directives. The builder methods are grounded directly on the teacher's
/// `chopin/src/http.rs::Response`.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    pub cache_directives: Option<CacheDirectives>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
            cache_directives: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn cache_directives(mut self, directives: CacheDirectives) -> Self {
        self.cache_directives = Some(directives);
        self
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: ResponseBody::Bytes(body.into()),
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            cache_directives: None,
        }
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: ResponseBody::Bytes(body.into()),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            cache_directives: None,
        }
    }

    pub fn json_error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": status, "message": message });
        Self {
            status,
            body: ResponseBody::Bytes(serde_json::to_vec(&body).unwrap_or_default()),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            cache_directives: None,
        }
    }

    pub fn not_found() -> Self {
        Self::json_error(404, "not found")
    }

    pub fn no_content() -> Self {
        Self::new(204)
    }

    pub fn stream(iter: impl Iterator<Item = Vec<u8>> + Send + 'static) -> Self {
        Self {
            status: 200,
            body: ResponseBody::Stream(Box::new(iter)),
            headers: vec![(
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            )],
            cache_directives: None,
        }
    }

    /// Whether this response is eligible for tiered-cache insertion by
    /// default (spec §4.5: 200, 301, 302, 404).
    pub fn cacheable_status_by_default(&self) -> bool {
        matches!(self.status, 200 | 301 | 302 | 404)
    }
}
