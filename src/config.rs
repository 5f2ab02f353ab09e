//! Application configuration (SPEC_FULL's ambient configuration section).
//! The bind/workers surface is grounded directly on `chopin/src/server.rs`'s
//! `Server::bind().workers()` builder; the rest (parser limits, cache tier
//! sizes, static-file options, executor bounds, debug/log-filter) is the
//! configuration a complete implementation of the spec's modules needs,
//! gathered under one builder the way `chopin-core/src/config.rs` gathers
//! its environment-derived settings into one struct.

use crate::cache::CacheConfig;
use crate::parser::ParserLimits;
use crate::static_files::StaticFilesConfig;
use crate::tasks::ExecutorConfig;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ForgewebConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub parser_limits: ParserLimits,
    pub cache: CacheConfig,
    pub cache_authenticated: bool,
    pub l3_cache_dir: Option<PathBuf>,
    pub static_files: Vec<StaticFilesConfig>,
    pub executor: ExecutorConfig,
    pub debug: bool,
    pub log_filter: String,
    pub connection_timeout_secs: u32,
    pub max_requests_per_connection: u32,
}

impl ForgewebConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            workers: num_cpus::get(),
            parser_limits: ParserLimits::default(),
            cache: CacheConfig::default(),
            cache_authenticated: false,
            l3_cache_dir: None,
            static_files: Vec::new(),
            executor: ExecutorConfig::default(),
            debug: false,
            log_filter: "info".to_string(),
            connection_timeout_secs: 30,
            max_requests_per_connection: 10_000,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn parser_limits(mut self, limits: ParserLimits) -> Self {
        self.parser_limits = limits;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache_authenticated(mut self, allow: bool) -> Self {
        self.cache_authenticated = allow;
        self
    }

    pub fn l3_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.l3_cache_dir = Some(dir.into());
        self
    }

    pub fn static_files(mut self, config: StaticFilesConfig) -> Self {
        self.static_files.push(config);
        self
    }

    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = ForgewebConfig::new("127.0.0.1", 9000)
            .workers(4)
            .debug(true)
            .log_filter("debug");

        assert_eq!(config.host_port(), "127.0.0.1:9000");
        assert_eq!(config.workers, 4);
        assert!(config.debug);
        assert_eq!(config.log_filter, "debug");
    }
}
