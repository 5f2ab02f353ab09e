//! Per-core epoll event loop. Generalizes `chopin/src/worker.rs`'s
//! accept/read/parse/handle/write state machine to drive the full pipeline
//! (parse → route → middleware → dispatch, including the cache and
//! static-file engines) instead of a single `match_route` call, and to
//! accumulate bodies/responses larger than the embedded 8KB `Conn` buffers
//! (spec §4.2's body-size limit is up to the configured maximum, well past
//! one read/write buffer).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::conn::ConnState;
use crate::slab::ConnectionSlab;
use crate::syscalls::{self, epoll_event, Epoll, EPOLLIN, EPOLLOUT};

use crate::app::AppState;
use crate::parser::{self, Framing, ParseError, ParsedHead};

/// Heap-backed overflow state for a connection whose request or response
/// does not fit in the embedded 8KB buffers. Indexed in parallel with the
/// slab by connection index; entries are cleared (not reallocated) when a
/// keep-alive connection starts its next request, matching the pooling
/// discipline the slab itself uses for fixed resources.
#[derive(Default)]
struct ConnExtra {
    /// Bytes read so far for the in-flight request (head + any body).
    accum: Vec<u8>,
    /// Parsed head, once available, awaiting body completion.
    head: Option<ParsedHead>,
    framing: Option<Framing>,
    body_start: usize,
    /// Fully formatted response bytes awaiting write.
    write_buf: Vec<u8>,
    write_offset: usize,
    keep_alive: bool,
}

pub struct Worker {
    id: usize,
    app: Arc<AppState>,
}

impl Worker {
    pub fn new(id: usize, app: Arc<AppState>) -> Self {
        Self { id, app }
    }

    pub fn run(&mut self, listen_fd: i32, shutdown: Arc<AtomicBool>) {
        let epoll = match Epoll::new() {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "failed to create epoll instance");
                return;
            }
        };
        let listen_token = u64::MAX;
        if let Err(e) = epoll.add(listen_fd, listen_token, EPOLLIN) {
            tracing::error!(worker = self.id, error = %e, "failed to register listen socket");
            return;
        }

        let mut slab = ConnectionSlab::new(100_000);
        let mut extras: HashMap<usize, ConnExtra> = HashMap::new();

        tracing::info!(worker = self.id, "entering main event loop");

        let mut events = vec![epoll_event { events: 0, u64: 0 }; 1024];
        let mut timeout_ms = 1000;
        let mut now = current_unix_secs();
        let mut last_prune = now;

        while !shutdown.load(Ordering::Acquire) {
            now = current_unix_secs();

            if now.saturating_sub(last_prune) >= 1 {
                self.prune_idle(&epoll, &mut slab, &mut extras, now);
                last_prune = now;
            }

            let n = match epoll.wait(&mut events, timeout_ms) {
                Ok(n) => n,
                Err(_) => continue,
            };

            for i in 0..n {
                let token = events[i].u64;
                let is_read = (events[i].events & EPOLLIN as u32) != 0;
                let is_write = (events[i].events & EPOLLOUT as u32) != 0;

                if token == listen_token {
                    if !shutdown.load(Ordering::Acquire) {
                        self.accept_loop(&epoll, listen_fd, &mut slab, &mut extras, now);
                    }
                    continue;
                }

                let idx = token as usize;
                self.drive_connection(&epoll, &mut slab, &mut extras, idx, is_read, is_write, now, &shutdown);
            }

            if shutdown.load(Ordering::Acquire) {
                timeout_ms = 100;
            }
        }

        tracing::info!(worker = self.id, "exiting gracefully");
        unsafe { libc::close(listen_fd) };
        for i in 0..slab.capacity() {
            if let Some(conn) = slab.get(i) {
                if conn.state != ConnState::Free {
                    unsafe { libc::close(conn.fd) };
                }
            }
        }
    }

    fn accept_loop(
        &self,
        epoll: &Epoll,
        listen_fd: i32,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        now: u32,
    ) {
        loop {
            match syscalls::accept_connection(listen_fd) {
                Ok(Some(client_fd)) => {
                    if let Some(idx) = slab.allocate(client_fd) {
                        if epoll.add(client_fd, idx as u64, EPOLLIN).is_err() {
                            slab.free(idx);
                            unsafe { libc::close(client_fd) };
                        } else if let Some(conn) = slab.get_mut(idx) {
                            conn.state = ConnState::Reading;
                            conn.last_active = now;
                            conn.requests_served = 0;
                            extras.insert(idx, ConnExtra::default());
                            self.app.metrics.inc_conn();
                        }
                    } else {
                        unsafe { libc::close(client_fd) };
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    fn prune_idle(
        &self,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        now: u32,
    ) {
        for i in 0..slab.capacity() {
            if let Some(conn) = slab.get(i) {
                if conn.state != ConnState::Free
                    && now.saturating_sub(conn.last_active) > self.app.config.connection_timeout_secs
                {
                    let fd = conn.fd;
                    epoll.delete(fd).ok();
                    unsafe { libc::close(fd) };
                    slab.free(i);
                    extras.remove(&i);
                    self.app.metrics.dec_conn();
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive_connection(
        &self,
        epoll: &Epoll,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        idx: usize,
        is_read: bool,
        is_write: bool,
        now: u32,
        shutdown: &Arc<AtomicBool>,
    ) {
        let fd = match slab.get(idx) {
            Some(c) => c.fd,
            None => return,
        };
        let mut closing = false;

        if is_read {
            closing |= !self.do_read(slab, extras, idx, fd);
        }

        if !closing {
            if let Some(extra) = extras.get_mut(&idx) {
                if extra.head.is_none() || extra.framing.is_none() {
                    if let Err(close) = self.try_parse_head(extra) {
                        closing |= close;
                    }
                }
            }
        }

        let mut ready_to_dispatch = false;
        if !closing {
            if let Some(extra) = extras.get_mut(&idx) {
                if extra.head.is_some() {
                    match body_complete(extra) {
                        Ok(true) => ready_to_dispatch = true,
                        Ok(false) => {}
                        Err(_) => closing = true,
                    }
                }
            }
        }

        if ready_to_dispatch {
            self.dispatch_and_format(slab, extras, idx, fd, epoll);
        }

        if !closing && (is_write || matches!(extras.get(&idx), Some(e) if !e.write_buf.is_empty())) {
            closing |= !self.do_write(slab, extras, idx, fd, epoll, shutdown);
        }

        if closing {
            epoll.delete(fd).ok();
            unsafe { libc::close(fd) };
            slab.free(idx);
            extras.remove(&idx);
            self.app.metrics.dec_conn();
        } else if let Some(conn) = slab.get_mut(idx) {
            conn.last_active = now;
        }
    }

    /// Reads into the connection's growable accumulation buffer via the
    /// embedded 8KB scratch buffer. Returns `false` on EOF/error (caller
    /// should close).
    fn do_read(
        &self,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        idx: usize,
        fd: i32,
    ) -> bool {
        loop {
            let Some(conn) = slab.get_mut(idx) else { return false };
            match syscalls::read_nonblocking(fd, &mut conn.read_buf) {
                Ok(0) => return false,
                Ok(n) => {
                    if let Some(extra) = extras.get_mut(&idx) {
                        extra.accum.extend_from_slice(&conn.read_buf[..n]);
                        if extra.accum.len() as u64 > self.app.config.parser_limits.max_body_size * 2 {
                            return false;
                        }
                    }
                    if n < conn.read_buf.len() {
                        return true;
                    }
                }
                Err(_) => return true,
            }
        }
    }

    fn try_parse_head(&self, extra: &mut ConnExtra) -> Result<(), bool> {
        match parser::parse_head(&extra.accum, &self.app.config.parser_limits) {
            Ok((head, consumed)) => {
                let framing = parser::body_framing(&head.headers, &self.app.config.parser_limits)
                    .map_err(|_| true)?;
                extra.keep_alive = head.keep_alive;
                extra.body_start = consumed;
                extra.head = Some(head);
                extra.framing = Some(framing);
                Ok(())
            }
            Err(ParseError::Incomplete) => Ok(()),
            Err(_) => Err(true),
        }
    }

    fn dispatch_and_format(
        &self,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        idx: usize,
        fd: i32,
        epoll: &Epoll,
    ) {
        let Some(extra) = extras.get_mut(&idx) else { return };
        let head = extra.head.take().expect("body_complete implies head is set");
        let body_bytes = match extra.framing.take() {
            Some(Framing::Chunked) => {
                parser::decode_chunked(&extra.accum[extra.body_start..], &self.app.config.parser_limits)
                    .ok()
                    .flatten()
                    .map(|(b, _)| b)
                    .unwrap_or_default()
            }
            Some(Framing::ContentLength(len)) => {
                extra.accum[extra.body_start..extra.body_start + len as usize].to_vec()
            }
            _ => Vec::new(),
        };

        // The raw socket layer does not retain the peer's address past
        // `accept()`; requests are addressed generically rather than
        // carrying a per-connection lookup the slab does not store.
        let remote_addr = std::net::SocketAddr::from(([0, 0, 0, 0], 0));
        let keep_alive = extra.keep_alive;
        extra.accum.clear();
        extra.body_start = 0;

        let request = parser::finish_request(head, body_bytes, remote_addr);
        self.app.metrics.inc_req();

        let requests_served = slab.get(idx).map(|c| c.requests_served).unwrap_or(0);
        let keep_alive = keep_alive && requests_served < self.app.config.max_requests_per_connection;

        let response = self.app.handle(request);

        let bytes = format_response(&response, keep_alive);
        if let Some(extra) = extras.get_mut(&idx) {
            extra.write_buf = bytes;
            extra.write_offset = 0;
            extra.keep_alive = keep_alive;
        }
        if let Some(conn) = slab.get_mut(idx) {
            conn.requests_served += 1;
            conn.state = ConnState::Writing;
        }
        let _ = epoll.modify(fd, idx as u64, EPOLLIN | EPOLLOUT);
    }

    fn do_write(
        &self,
        slab: &mut ConnectionSlab,
        extras: &mut HashMap<usize, ConnExtra>,
        idx: usize,
        fd: i32,
        epoll: &Epoll,
        shutdown: &Arc<AtomicBool>,
    ) -> bool {
        let Some(extra) = extras.get_mut(&idx) else { return true };
        if extra.write_buf.is_empty() {
            return true;
        }

        loop {
            let remaining = &extra.write_buf[extra.write_offset..];
            if remaining.is_empty() {
                break;
            }
            match syscalls::write_nonblocking(fd, remaining) {
                Ok(0) => return true,
                Ok(n) => {
                    self.app.metrics.add_bytes(n);
                    extra.write_offset += n;
                }
                Err(_) => return false,
            }
        }

        extra.write_buf.clear();
        extra.write_offset = 0;

        if extra.keep_alive && !shutdown.load(Ordering::Acquire) {
            if let Some(conn) = slab.get_mut(idx) {
                conn.state = ConnState::Reading;
            }
            let _ = epoll.modify(fd, idx as u64, EPOLLIN);
            true
        } else {
            false
        }
    }
}

/// Returns `Ok(true)` once the full body for the buffered head has arrived.
fn body_complete(extra: &mut ConnExtra) -> Result<bool, ()> {
    match extra.framing {
        Some(Framing::None) => Ok(true),
        Some(Framing::ContentLength(len)) => {
            Ok(extra.accum.len() >= extra.body_start + len as usize)
        }
        Some(Framing::Chunked) => {
            let limits = crate::parser::ParserLimits::default();
            match parser::decode_chunked(&extra.accum[extra.body_start..], &limits) {
                Ok(Some(_)) => Ok(true),
                Ok(None) => Ok(false),
                Err(_) => Err(()),
            }
        }
        None => Ok(false),
    }
}

fn format_response(response: &crate::http::Response, keep_alive: bool) -> Vec<u8> {
    use crate::http::ResponseBody;
    use std::io::Write;

    let body_bytes: Vec<u8> = match &response.body {
        ResponseBody::Empty => Vec::new(),
        ResponseBody::Bytes(b) => b.clone(),
        ResponseBody::Stream(_) => Vec::new(),
        ResponseBody::File { path, range, .. } => read_file_body(path, *range),
    };

    let mut out = Vec::with_capacity(256 + body_bytes.len());
    let reason = reason_phrase(response.status);
    let _ = write!(out, "HTTP/1.1 {} {}\r\n", response.status, reason);
    for (name, value) in &response.headers {
        let _ = write!(out, "{}: {}\r\n", name, value);
    }
    let _ = write!(out, "Content-Length: {}\r\n", body_bytes.len());
    let _ = write!(
        out,
        "Connection: {}\r\n",
        if keep_alive { "keep-alive" } else { "close" }
    );
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body_bytes);
    out
}

fn read_file_body(path: &std::path::Path, range: Option<(u64, u64)>) -> Vec<u8> {
    use std::io::{Read, Seek, SeekFrom};
    let Ok(mut file) = std::fs::File::open(path) else {
        return Vec::new();
    };
    match range {
        Some((start, end)) => {
            let len = (end - start + 1) as usize;
            let mut buf = vec![0u8; len];
            if file.seek(SeekFrom::Start(start)).is_ok() && file.read_exact(&mut buf).is_ok() {
                buf
            } else {
                Vec::new()
            }
        }
        None => {
            let mut buf = Vec::new();
            let _ = file.read_to_end(&mut buf);
            buf
        }
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        416 => "Range Not Satisfiable",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

fn current_unix_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
