//! Static-file engine (spec §4.6): path-traversal safety, conditional GET,
//! single-range requests, an mtime-gated hot LRU cache, and optional gzip
//! compression. Not grounded on a `chopin` file (the teacher serves no
//! static assets); the hot-cache shape reuses `cache::l1::L1Cache`, and the
//! ETag/Range/conditional-GET logic is authored against RFC 7232/7233
//! using the `httpdate` crate the teacher already depends on for date
//! formatting elsewhere.

use crate::cache::l1::{CacheEntry, L1Cache};
use crate::error::StaticFileError;
use crate::http::{Request, Response, ResponseBody};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct StaticFilesConfig {
    pub mount_prefix: String,
    pub root: PathBuf,
    pub index_file: Option<String>,
    pub directory_listing: bool,
    pub serve_hidden: bool,
    pub hot_cache_byte_capacity: usize,
    pub hot_cache_max_file_size: u64,
    pub hot_cache_ttl: Duration,
    pub max_file_size: u64,
    #[cfg(feature = "compression")]
    pub gzip_level: u32,
}

impl StaticFilesConfig {
    pub fn new(mount_prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            mount_prefix: mount_prefix.into(),
            root: root.into(),
            index_file: Some("index.html".to_string()),
            directory_listing: false,
            serve_hidden: false,
            hot_cache_byte_capacity: 16 * 1024 * 1024,
            hot_cache_max_file_size: 256 * 1024,
            hot_cache_ttl: Duration::from_secs(30),
            max_file_size: 512 * 1024 * 1024,
            #[cfg(feature = "compression")]
            gzip_level: 6,
        }
    }
}

/// What `serve_directory` resolved a directory request to: an index file to
/// serve as a normal file, or an already-rendered listing response.
enum DirOutcome {
    IndexFile(PathBuf),
    Listing(Response),
}

pub struct StaticFileEngine {
    config: StaticFilesConfig,
    hot_cache: L1Cache,
}

impl StaticFileEngine {
    pub fn new(config: StaticFilesConfig) -> Self {
        let hot_cache = L1Cache::new(config.hot_cache_byte_capacity);
        Self { config, hot_cache }
    }

    /// Resolves a request path under the mount prefix to a safe absolute
    /// path, rejecting traversal and null bytes (spec §4.6 steps 1-3).
    fn resolve(&self, request_path: &str) -> Result<PathBuf, StaticFileError> {
        let remainder = request_path
            .strip_prefix(&self.config.mount_prefix)
            .ok_or(StaticFileError::NotFound)?;
        let remainder = remainder.trim_start_matches('/');

        if remainder.contains('\0') {
            return Err(StaticFileError::PathEscapesRoot);
        }

        let mut resolved = self.config.root.clone();
        for comp in Path::new(remainder).components() {
            match comp {
                Component::Normal(part) => {
                    let part_str = part.to_str().ok_or(StaticFileError::PathEscapesRoot)?;
                    if !self.config.serve_hidden && part_str.starts_with('.') {
                        return Err(StaticFileError::Forbidden);
                    }
                    resolved.push(part);
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StaticFileError::PathEscapesRoot);
                }
            }
        }

        if !resolved.starts_with(&self.config.root) {
            return Err(StaticFileError::PathEscapesRoot);
        }
        Ok(resolved)
    }

    pub fn serve(&self, req: &Request) -> Result<Response, StaticFileError> {
        let path = self.resolve(&req.path)?;
        let meta = fs::metadata(&path).map_err(|e| classify_io(e))?;

        let resolved = if meta.is_dir() {
            match self.serve_directory(&path)? {
                DirOutcome::IndexFile(index) => index,
                DirOutcome::Listing(resp) => return Ok(resp),
            }
        } else {
            path
        };

        let meta = fs::metadata(&resolved).map_err(classify_io)?;
        if meta.len() > self.config.max_file_size {
            return Err(StaticFileError::NotFound);
        }

        let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
        let etag = compute_etag(meta.len(), mtime);

        if let Some(inm) = req.headers.get("If-None-Match") {
            if inm == etag {
                return Ok(not_modified(&etag, mtime));
            }
        } else if let Some(ims) = req.headers.get("If-Modified-Since") {
            if let Ok(since) = httpdate::parse_http_date(ims) {
                if mtime <= since {
                    return Ok(not_modified(&etag, mtime));
                }
            }
        }

        if let Some(range_header) = req.headers.get("Range") {
            return self.serve_range(&resolved, meta.len(), mtime, &etag, range_header);
        }

        self.serve_full(&resolved, meta.len(), mtime, &etag, accepts_gzip(req))
    }

    fn serve_directory(&self, dir: &Path) -> Result<DirOutcome, StaticFileError> {
        if let Some(index) = &self.config.index_file {
            let candidate = dir.join(index);
            if candidate.is_file() {
                return Ok(DirOutcome::IndexFile(candidate));
            }
        }
        if self.config.directory_listing {
            return Ok(DirOutcome::Listing(self.render_directory_listing(dir)?));
        }
        Err(StaticFileError::Forbidden)
    }

    /// Auto-generated HTML listing (spec §4.6 step 4, §6's
    /// `enable_directory_listing` option). Hidden entries are omitted unless
    /// `serve_hidden` is on, matching the same rule `resolve` applies to
    /// requested paths.
    fn render_directory_listing(&self, dir: &Path) -> Result<Response, StaticFileError> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map_err(classify_io)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| self.config.serve_hidden || !name.starts_with('.'))
            .collect();
        names.sort();

        let mut html = String::from("<!DOCTYPE html>\n<html><head><title>Index</title></head><body>\n<ul>\n");
        for name in &names {
            html.push_str(&format!(
                "<li><a href=\"{0}\">{0}</a></li>\n",
                html_escape(name)
            ));
        }
        html.push_str("</ul>\n</body></html>\n");

        let mut resp = Response::new(200).header("Content-Type", "text/html; charset=utf-8");
        resp.body = ResponseBody::Bytes(html.into_bytes());
        Ok(resp)
    }

    fn serve_full(
        &self,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        etag: &str,
        client_accepts_gzip: bool,
    ) -> Result<Response, StaticFileError> {
        let body = self.read_with_hot_cache(path, size, mtime)?;
        let mut resp = Response::new(200)
            .header("ETag", etag.to_string())
            .header("Last-Modified", httpdate::fmt_http_date(mtime))
            .header("Accept-Ranges", "bytes")
            .header("Content-Type", content_type_for(path));

        let body = self.maybe_compress(path, body, client_accepts_gzip, &mut resp);
        resp.body = ResponseBody::Bytes(body);
        Ok(resp)
    }

    /// Gzips the body in place when the file is compressible, the client
    /// advertised `gzip`, and the `compression` feature is built in (spec
    /// §4.6: pre-compressed types like images/video/archives are never
    /// re-compressed). A no-op passthrough without the feature.
    #[cfg(feature = "compression")]
    fn maybe_compress(
        &self,
        path: &Path,
        body: Vec<u8>,
        client_accepts_gzip: bool,
        resp: &mut Response,
    ) -> Vec<u8> {
        if !client_accepts_gzip || !is_compressible(path) {
            return body;
        }
        match gzip(&body, self.config.gzip_level) {
            Ok(compressed) => {
                resp.headers.push(("Content-Encoding".to_string(), "gzip".to_string()));
                resp.headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
                compressed
            }
            Err(_) => body,
        }
    }

    #[cfg(not(feature = "compression"))]
    fn maybe_compress(
        &self,
        _path: &Path,
        body: Vec<u8>,
        _client_accepts_gzip: bool,
        _resp: &mut Response,
    ) -> Vec<u8> {
        body
    }

    fn serve_range(
        &self,
        path: &Path,
        size: u64,
        mtime: SystemTime,
        etag: &str,
        range_header: &str,
    ) -> Result<Response, StaticFileError> {
        let (start, end) = parse_range(range_header, size)
            .ok_or(StaticFileError::RangeNotSatisfiable { size })?;

        let full = self.read_with_hot_cache(path, size, mtime)?;
        let slice = full
            .get(start as usize..=end as usize)
            .ok_or(StaticFileError::RangeNotSatisfiable { size })?
            .to_vec();

        let mut resp = Response::new(206)
            .header("ETag", etag.to_string())
            .header("Accept-Ranges", "bytes")
            .header("Content-Range", format!("bytes {start}-{end}/{size}"))
            .header("Content-Type", content_type_for(path));
        resp.body = ResponseBody::Bytes(slice);
        Ok(resp)
    }

    /// Reads the file, consulting the hot cache first. A cached entry is
    /// only returned while its stored mtime still matches the file's
    /// current mtime (spec §4.6's hot-cache invariant); any mismatch is
    /// treated as a miss and the file is re-read.
    fn read_with_hot_cache(
        &self,
        path: &Path,
        size: u64,
        mtime: SystemTime,
    ) -> Result<Vec<u8>, StaticFileError> {
        if size > self.config.hot_cache_max_file_size {
            return fs::read(path).map_err(classify_io);
        }

        let cache_key = crate::cache::key::CacheKey(path_digest(path));
        if let Some(entry) = self.hot_cache.get(&cache_key) {
            if entry_mtime(&entry) == mtime_secs(mtime) {
                return Ok(entry.body);
            }
        }

        let bytes = fs::read(path).map_err(classify_io)?;
        let mut entry = CacheEntry::new(200, vec![], bytes.clone(), self.config.hot_cache_ttl);
        entry.headers = vec![("x-mtime".to_string(), mtime_secs(mtime).to_string())];
        self.hot_cache.put(cache_key, entry);
        Ok(bytes)
    }
}

fn entry_mtime(entry: &CacheEntry) -> u64 {
    entry
        .headers
        .iter()
        .find(|(k, _)| k == "x-mtime")
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0)
}

fn mtime_secs(mtime: SystemTime) -> u64 {
    mtime
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn path_digest(path: &Path) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn compute_etag(size: u64, mtime: SystemTime) -> String {
    format!("W/\"{}-{}\"", size, mtime_secs(mtime))
}

fn not_modified(etag: &str, mtime: SystemTime) -> Response {
    Response::new(304)
        .header("ETag", etag.to_string())
        .header("Last-Modified", httpdate::fmt_http_date(mtime))
}

/// Parses a single `bytes=a-b` range (spec §4.6: "multi-range is out of
/// scope"). Returns `None` for anything malformed or unsatisfiable, which
/// the caller turns into 416.
fn parse_range(header: &str, size: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;

    let (start, end) = if start_s.is_empty() {
        let suffix_len: u64 = end_s.parse().ok()?;
        if suffix_len == 0 || suffix_len > size {
            (0, size.checked_sub(1)?)
        } else {
            (size - suffix_len, size - 1)
        }
    } else {
        let start: u64 = start_s.parse().ok()?;
        let end: u64 = if end_s.is_empty() {
            size.checked_sub(1)?
        } else {
            end_s.parse().ok()?
        };
        (start, end)
    };

    if start > end || end >= size {
        return None;
    }
    Some((start, end))
}

fn classify_io(e: std::io::Error) -> StaticFileError {
    match e.kind() {
        std::io::ErrorKind::NotFound => StaticFileError::NotFound,
        std::io::ErrorKind::PermissionDenied => StaticFileError::Forbidden,
        _ => StaticFileError::Io(e.to_string()),
    }
}

/// MIME type by extension, and whether a type is compressible in spirit of
/// spec §4.6 (pre-compressed formats are never re-gzipped).
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn accepts_gzip(req: &Request) -> bool {
    req.headers
        .get("Accept-Encoding")
        .map(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
        .unwrap_or(false)
}

pub fn is_compressible(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("html") | Some("css") | Some("js") | Some("json") | Some("svg") | Some("txt")
    )
}

#[cfg(feature = "compression")]
pub fn gzip(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HeaderMap, Method};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn req(path: &str, headers: &[(&str, &str)]) -> Request {
        let mut hm = HeaderMap::new();
        for (k, v) in headers {
            hm.insert(k, v.to_string());
        }
        Request {
            method: Method::Get,
            path: path.to_string(),
            raw_path: path.to_string(),
            query: None,
            headers: hm,
            body: crate::http::Body::Empty,
            remote_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            context: crate::http::RequestContext::new(),
        }
    }

    #[test]
    fn serves_a_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi there").unwrap();

        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));
        let resp = engine.serve(&req("/static/hello.txt", &[])).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_bytes(), b"hi there");
    }

    #[test]
    fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));
        let err = engine
            .serve(&req("/static/../../etc/passwd", &[]))
            .unwrap_err();
        assert!(matches!(err, StaticFileError::PathEscapesRoot));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));
        let err = engine.serve(&req("/static/nope.txt", &[])).unwrap_err();
        assert!(matches!(err, StaticFileError::NotFound));
    }

    #[test]
    fn conditional_get_with_matching_etag_is_304() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"content").unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));

        let first = engine.serve(&req("/static/a.txt", &[])).unwrap();
        let etag = first.get_header("ETag").unwrap().to_string();

        let second = engine
            .serve(&req("/static/a.txt", &[("If-None-Match", &etag)]))
            .unwrap();
        assert_eq!(second.status, 304);
    }

    #[test]
    fn range_request_returns_partial_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));

        let resp = engine
            .serve(&req("/static/a.txt", &[("Range", "bytes=2-4")]))
            .unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(resp.body.as_bytes(), b"234");
        assert_eq!(resp.get_header("Content-Range"), Some("bytes 2-4/10"));
    }

    #[test]
    fn unsatisfiable_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"01234").unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));

        let err = engine
            .serve(&req("/static/a.txt", &[("Range", "bytes=100-200")]))
            .unwrap_err();
        assert!(matches!(err, StaticFileError::RangeNotSatisfiable { size: 5 }));
    }

    #[test]
    fn directory_without_index_is_forbidden_unless_listing_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));
        let err = engine.serve(&req("/static/sub", &[])).unwrap_err();
        assert!(matches!(err, StaticFileError::Forbidden));
    }

    #[test]
    fn directory_listing_renders_entries_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("sub").join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("sub").join(".hidden"), b"h").unwrap();

        let mut config = StaticFilesConfig::new("/static", dir.path());
        config.directory_listing = true;
        let engine = StaticFileEngine::new(config);

        let resp = engine.serve(&req("/static/sub", &[])).unwrap();
        assert_eq!(resp.status, 200);
        let body = String::from_utf8(resp.body.as_bytes().to_vec()).unwrap();
        assert!(body.contains("a.txt"));
        assert!(body.contains("b.txt"));
        assert!(!body.contains(".hidden"));
    }

    #[test]
    fn hidden_files_are_forbidden_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".secret"), b"shh").unwrap();
        let engine = StaticFileEngine::new(StaticFilesConfig::new("/static", dir.path()));
        let err = engine.serve(&req("/static/.secret", &[])).unwrap_err();
        assert!(matches!(err, StaticFileError::Forbidden));
    }
}
