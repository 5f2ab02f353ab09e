//! Tracing initialization. The teacher prints straight to stdout from
//! `server.rs`/`worker.rs`; this crate routes the same kind of startup and
//! per-request messages through `tracing` instead, following the
//! `EnvFilter` + `fmt` layer pattern used across the rest of the example
//! pack's Chopin-based applications (e.g. `chopin-examples/hello-world`).

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initializes the global tracing subscriber exactly once. Safe to call
/// from multiple places (tests, `ForgewebApp::serve`) since repeat calls
/// are no-ops rather than panics.
pub fn init(default_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
