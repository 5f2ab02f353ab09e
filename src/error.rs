//! Central error type for the framework, plus per-module error enums that
//! convert into it. Mirrors the teacher's hand-rolled `ChopinError`/
//! `ChopinResult` shape rather than pulling in `thiserror`: the engine
//! package this crate is grounded on writes its own `Display`/`Error`/`From`
//! impls, so this file does the same.

use std::fmt;
use std::io;

use crate::http::Response;
use crate::parser::ParseError;

/// Crate-wide error type. Every module-local error (`RouterError`,
/// `CacheError`, `StaticFileError`, `TaskError`, `DiError`) converts into
/// this via `From`.
#[derive(Debug)]
pub enum ForgewebError {
    Io(io::Error),
    Parse(ParseError),
    Router(RouterError),
    Cache(CacheError),
    StaticFile(StaticFileError),
    Task(TaskError),
    Di(DiError),
    Validation { field: String, message: String },
    Unauthorized(String),
    Forbidden(String),
    RateLimited { retry_after_secs: u64 },
    Handler(String),
    SlabFull,
    Other(String),
}

impl fmt::Display for ForgewebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForgewebError::Io(e) => write!(f, "I/O error: {e}"),
            ForgewebError::Parse(e) => write!(f, "parse error: {e:?}"),
            ForgewebError::Router(e) => write!(f, "router error: {e}"),
            ForgewebError::Cache(e) => write!(f, "cache error: {e}"),
            ForgewebError::StaticFile(e) => write!(f, "static file error: {e}"),
            ForgewebError::Task(e) => write!(f, "task error: {e}"),
            ForgewebError::Di(e) => write!(f, "dependency injection error: {e}"),
            ForgewebError::Validation { field, message } => {
                write!(f, "validation failed on `{field}`: {message}")
            }
            ForgewebError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            ForgewebError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            ForgewebError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {retry_after_secs}s")
            }
            ForgewebError::Handler(msg) => write!(f, "handler error: {msg}"),
            ForgewebError::SlabFull => write!(f, "connection slab is full"),
            ForgewebError::Other(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl std::error::Error for ForgewebError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ForgewebError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ForgewebError {
    fn from(e: io::Error) -> Self {
        ForgewebError::Io(e)
    }
}

impl From<ParseError> for ForgewebError {
    fn from(e: ParseError) -> Self {
        ForgewebError::Parse(e)
    }
}

impl From<RouterError> for ForgewebError {
    fn from(e: RouterError) -> Self {
        ForgewebError::Router(e)
    }
}

impl From<CacheError> for ForgewebError {
    fn from(e: CacheError) -> Self {
        ForgewebError::Cache(e)
    }
}

impl From<StaticFileError> for ForgewebError {
    fn from(e: StaticFileError) -> Self {
        ForgewebError::StaticFile(e)
    }
}

impl From<TaskError> for ForgewebError {
    fn from(e: TaskError) -> Self {
        ForgewebError::Task(e)
    }
}

impl From<DiError> for ForgewebError {
    fn from(e: DiError) -> Self {
        ForgewebError::Di(e)
    }
}

pub type ForgewebResult<T> = Result<T, ForgewebError>;

/// Maps an error to its HTTP status code, per spec §7.
impl ForgewebError {
    pub fn status_code(&self) -> u16 {
        match self {
            ForgewebError::Io(_) => 500,
            ForgewebError::Parse(e) => e.status_code(),
            ForgewebError::Router(RouterError::MethodNotAllowed { .. }) => 405,
            ForgewebError::Router(_) => 404,
            ForgewebError::Cache(_) => 500,
            ForgewebError::StaticFile(StaticFileError::NotFound) => 404,
            ForgewebError::StaticFile(StaticFileError::Forbidden) => 403,
            ForgewebError::StaticFile(StaticFileError::RangeNotSatisfiable { .. }) => 416,
            ForgewebError::StaticFile(_) => 500,
            ForgewebError::Task(TaskError::QueueFull) => 429,
            ForgewebError::Task(_) => 500,
            ForgewebError::Di(_) => 500,
            ForgewebError::Validation { .. } => 422,
            ForgewebError::Unauthorized(_) => 401,
            ForgewebError::Forbidden(_) => 403,
            ForgewebError::RateLimited { .. } => 429,
            ForgewebError::Handler(_) => 500,
            ForgewebError::SlabFull => 503,
            ForgewebError::Other(_) => 500,
        }
    }

    /// Converts the error into a JSON error response per spec §7's default
    /// body shape. `debug` controls whether handler-error detail is leaked.
    pub fn into_response(self, debug: bool) -> Response {
        let code = self.status_code();
        let message = match (&self, debug) {
            (ForgewebError::Handler(msg), true) => msg.clone(),
            (ForgewebError::Handler(_), false) => "internal server error".to_string(),
            _ => self.to_string(),
        };
        let mut resp = Response::json_error(code, &message);
        if let ForgewebError::Router(RouterError::MethodNotAllowed { allowed }) = &self {
            resp = resp.header("Allow", allowed.join(", "));
        }
        if let ForgewebError::RateLimited { retry_after_secs } = &self {
            resp = resp.header("Retry-After", retry_after_secs.to_string());
        }
        if let ForgewebError::StaticFile(StaticFileError::RangeNotSatisfiable { size }) = &self {
            resp = resp.header("Content-Range", format!("bytes */{size}"));
        }
        resp
    }
}

#[derive(Debug)]
pub enum RouterError {
    Conflict(String),
    NotFound,
    MethodNotAllowed { allowed: Vec<String> },
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::Conflict(msg) => write!(f, "route conflict: {msg}"),
            RouterError::NotFound => write!(f, "no matching route"),
            RouterError::MethodNotAllowed { allowed } => {
                write!(f, "method not allowed, allowed: {}", allowed.join(", "))
            }
        }
    }
}

#[derive(Debug)]
pub enum CacheError {
    Backend(String),
    Serialize(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Backend(msg) => write!(f, "cache backend error: {msg}"),
            CacheError::Serialize(msg) => write!(f, "cache serialization error: {msg}"),
        }
    }
}

#[derive(Debug)]
pub enum StaticFileError {
    NotFound,
    Forbidden,
    PathEscapesRoot,
    RangeNotSatisfiable { size: u64 },
    Io(String),
}

impl fmt::Display for StaticFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticFileError::NotFound => write!(f, "file not found"),
            StaticFileError::Forbidden => write!(f, "access forbidden"),
            StaticFileError::PathEscapesRoot => write!(f, "path escapes mount root"),
            StaticFileError::RangeNotSatisfiable { size } => {
                write!(f, "range not satisfiable, file size {size}")
            }
            StaticFileError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

#[derive(Debug)]
pub enum TaskError {
    QueueFull,
    Timeout,
    Cancelled,
    Panicked(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::QueueFull => write!(f, "queue full"),
            TaskError::Timeout => write!(f, "task timed out"),
            TaskError::Cancelled => write!(f, "task cancelled"),
            TaskError::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

#[derive(Debug)]
pub enum DiError {
    UnknownService(String),
    CyclicDependency(String),
    ServiceConstructionFailed { name: String, reason: String },
}

impl fmt::Display for DiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiError::UnknownService(name) => write!(f, "unknown service `{name}`"),
            DiError::CyclicDependency(name) => {
                write!(f, "cyclic dependency detected at `{name}`")
            }
            DiError::ServiceConstructionFailed { name, reason } => {
                write!(f, "failed to construct service `{name}`: {reason}")
            }
        }
    }
}
