//! Incremental HTTP/1.1 parser. Grounded on `chopin/src/parser.rs`'s
//! hand-written request-line/header scanner, extended per SPEC_FULL §4.2:
//! configurable limits (URI length, header count, header bytes, body size),
//! percent-decoding of the routed path, and `Transfer-Encoding: chunked`
//! support alongside `Content-Length`, with the two rejected together as
//! malformed framing.

use crate::http::{Body, HeaderMap, Method, Request};
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy)]
pub struct ParserLimits {
    pub max_uri_len: usize,
    pub max_headers: usize,
    pub max_header_bytes: usize,
    pub max_body_size: u64,
    /// When false (the default), a request path containing `//` is rejected
    /// as a 400 (spec §4.3 edge case). When true, runs of slashes are
    /// collapsed to one before routing.
    pub normalize_double_slashes: bool,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_uri_len: 8192,
            max_headers: 100,
            max_header_bytes: 16 * 1024,
            max_body_size: 10 * 1024 * 1024,
            normalize_double_slashes: false,
        }
    }
}

#[derive(Debug)]
pub enum ParseError {
    Incomplete,
    InvalidFormat,
    UriTooLong,
    TooManyHeaders,
    HeadersTooLarge,
    BodyTooLarge,
    ConflictingFraming,
    InvalidChunkEncoding,
    DoubleSlash,
}

impl ParseError {
    /// Maps a parse failure to the status spec §4.2/§7 says the connection
    /// should respond with before closing.
    pub fn status_code(&self) -> u16 {
        match self {
            ParseError::Incomplete => 400,
            ParseError::InvalidFormat => 400,
            ParseError::UriTooLong => 414,
            ParseError::TooManyHeaders => 431,
            ParseError::HeadersTooLarge => 431,
            ParseError::BodyTooLarge => 413,
            ParseError::ConflictingFraming => 400,
            ParseError::InvalidChunkEncoding => 400,
            ParseError::DoubleSlash => 400,
        }
    }
}

/// How the body of a parsed request is framed, per RFC 9112 §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    None,
    ContentLength(u64),
    Chunked,
}

/// The request line plus headers, with the body left as the tail of `buf`
/// starting at the returned offset. Parsing and body accumulation are
/// separate steps so the worker can drive incremental reads between them.
pub struct ParsedHead {
    pub method: Method,
    pub path: String,
    pub raw_path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub keep_alive: bool,
}

pub fn parse_head(buf: &[u8], limits: &ParserLimits) -> Result<(ParsedHead, usize), ParseError> {
    let mut space1 = 0;
    while space1 < buf.len() && buf[space1] != b' ' {
        space1 += 1;
    }
    if space1 >= buf.len() {
        return Err(ParseError::Incomplete);
    }
    let method = Method::from_bytes(&buf[..space1]);

    let mut space2 = space1 + 1;
    while space2 < buf.len() && buf[space2] != b' ' {
        space2 += 1;
        if space2 - space1 > limits.max_uri_len {
            return Err(ParseError::UriTooLong);
        }
    }
    if space2 >= buf.len() {
        return Err(ParseError::Incomplete);
    }
    let uri_bytes = &buf[space1 + 1..space2];
    if uri_bytes.len() > limits.max_uri_len {
        return Err(ParseError::UriTooLong);
    }
    let full_uri = std::str::from_utf8(uri_bytes).map_err(|_| ParseError::InvalidFormat)?;

    let (raw_path, query) = match full_uri.find('?') {
        Some(idx) => (&full_uri[..idx], Some(full_uri[idx + 1..].to_string())),
        None => (full_uri, None),
    };

    if raw_path.contains("//") && !limits.normalize_double_slashes {
        return Err(ParseError::DoubleSlash);
    }
    let path = if raw_path.contains("//") {
        collapse_slashes(&percent_decode(raw_path))
    } else {
        percent_decode(raw_path)
    };

    let mut req_line_end = space2 + 1;
    while req_line_end + 1 < buf.len()
        && !(buf[req_line_end] == b'\r' && buf[req_line_end + 1] == b'\n')
    {
        req_line_end += 1;
    }
    if req_line_end + 1 >= buf.len() {
        return Err(ParseError::Incomplete);
    }

    let mut headers = HeaderMap::new();
    let mut header_count = 0usize;
    let mut cursor = req_line_end + 2;
    let headers_start = cursor;

    loop {
        if cursor + 1 >= buf.len() {
            return Err(ParseError::Incomplete);
        }
        if cursor - headers_start > limits.max_header_bytes {
            return Err(ParseError::HeadersTooLarge);
        }

        if buf[cursor] == b'\r' && buf[cursor + 1] == b'\n' {
            cursor += 2;
            break;
        }

        if header_count >= limits.max_headers {
            return Err(ParseError::TooManyHeaders);
        }

        let mut colon_idx = cursor;
        while colon_idx < buf.len() && buf[colon_idx] != b':' && buf[colon_idx] != b'\r' {
            colon_idx += 1;
        }
        if colon_idx >= buf.len() || buf[colon_idx] == b'\r' {
            return Err(ParseError::InvalidFormat);
        }

        let name =
            std::str::from_utf8(&buf[cursor..colon_idx]).map_err(|_| ParseError::InvalidFormat)?;

        let mut line_end = colon_idx + 1;
        while line_end + 1 < buf.len() && !(buf[line_end] == b'\r' && buf[line_end + 1] == b'\n') {
            line_end += 1;
        }
        if line_end + 1 >= buf.len() {
            return Err(ParseError::Incomplete);
        }

        let mut val_start = colon_idx + 1;
        while val_start < line_end && buf[val_start] == b' ' {
            val_start += 1;
        }
        let val = std::str::from_utf8(&buf[val_start..line_end])
            .map_err(|_| ParseError::InvalidFormat)?;

        headers.insert(name, val);
        header_count += 1;
        cursor = line_end + 2;
    }

    let keep_alive = match headers.get("Connection") {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
        _ => true,
    };

    Ok((
        ParsedHead {
            method,
            path,
            raw_path: raw_path.to_string(),
            query,
            headers,
            keep_alive,
        },
        cursor,
    ))
}

/// Determines body framing from headers, rejecting the ambiguous case of
/// both `Content-Length` and `Transfer-Encoding: chunked` present (request
/// smuggling defense, spec §4.2 edge case).
pub fn body_framing(headers: &HeaderMap, limits: &ParserLimits) -> Result<Framing, ParseError> {
    let has_chunked = headers
        .get("Transfer-Encoding")
        .map(|v| v.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let content_length = headers.get("Content-Length");

    match (content_length, has_chunked) {
        (Some(_), true) => Err(ParseError::ConflictingFraming),
        (Some(v), false) => {
            let len: u64 = v.trim().parse().map_err(|_| ParseError::InvalidFormat)?;
            if len > limits.max_body_size {
                return Err(ParseError::BodyTooLarge);
            }
            Ok(Framing::ContentLength(len))
        }
        (None, true) => Ok(Framing::Chunked),
        (None, false) => Ok(Framing::None),
    }
}

/// Decodes a fully-buffered chunked body. Returns `None` if more bytes are
/// needed. Chunk extensions are skipped; trailers are discarded per spec
/// §4.2 (trailer fields are not surfaced to handlers).
pub fn decode_chunked(
    buf: &[u8],
    limits: &ParserLimits,
) -> Result<Option<(Vec<u8>, usize)>, ParseError> {
    let mut out = Vec::new();
    let mut cursor = 0usize;

    loop {
        let line_end = match find_crlf(buf, cursor) {
            Some(i) => i,
            None => return Ok(None),
        };
        let size_line = std::str::from_utf8(&buf[cursor..line_end])
            .map_err(|_| ParseError::InvalidChunkEncoding)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunkEncoding)?;

        cursor = line_end + 2;

        if size == 0 {
            // Trailer section: scan to the terminating blank line.
            loop {
                let trailer_end = match find_crlf(buf, cursor) {
                    Some(i) => i,
                    None => return Ok(None),
                };
                if trailer_end == cursor {
                    cursor = trailer_end + 2;
                    return Ok(Some((out, cursor)));
                }
                cursor = trailer_end + 2;
            }
        }

        if out.len() as u64 + size > limits.max_body_size {
            return Err(ParseError::BodyTooLarge);
        }

        let chunk_end = cursor + size as usize;
        if chunk_end + 2 > buf.len() {
            return Ok(None);
        }
        out.extend_from_slice(&buf[cursor..chunk_end]);
        cursor = chunk_end + 2;
    }
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    memchr::memchr(b'\r', &buf[from..]).and_then(|i| {
        let idx = from + i;
        if idx + 1 < buf.len() && buf[idx + 1] == b'\n' {
            Some(idx)
        } else {
            None
        }
    })
}

/// Percent-decodes a request-target path. `+` is left as a literal
/// character here — space-for-`+` decoding is form-urlencoded query
/// syntax, applied separately in `dispatcher.rs` via `serde_urlencoded`.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hi = hex_val(bytes[i + 1]);
                let lo = hex_val(bytes[i + 2]);
                match (hi, lo) {
                    (Some(h), Some(l)) => {
                        out.push(h * 16 + l);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Collapses runs of `/` into one, used only when
/// `ParserLimits::normalize_double_slashes` opts into tolerating them
/// instead of rejecting with a 400 (spec §4.3 edge case).
fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Assembles a complete owned `Request` from a parsed head and an already
/// accumulated body buffer (spec §3's owned request record).
pub fn finish_request(head: ParsedHead, body_bytes: Vec<u8>, remote_addr: SocketAddr) -> Request {
    let body = if body_bytes.is_empty() {
        Body::Empty
    } else {
        Body::Bytes(body_bytes)
    };
    Request {
        method: head.method,
        path: head.path,
        raw_path: head.raw_path,
        query: head.query,
        headers: head.headers,
        body,
        remote_addr,
        context: crate::http::RequestContext::new(),
    }
}
