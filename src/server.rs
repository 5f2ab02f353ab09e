//! Server bootstrap: one `SO_REUSEPORT` listener and epoll loop per worker
//! thread, core-pinned where possible, with a periodic metrics reporter and
//! Ctrl-C graceful shutdown. Grounded directly on `chopin/src/server.rs`'s
//! `Server::bind().workers().serve()` builder and its metrics/shutdown
//! threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::app::AppState;
use crate::error::{ForgewebError, ForgewebResult};
use crate::syscalls;
use crate::worker::Worker;

pub struct Server {
    app: Arc<AppState>,
}

impl Server {
    pub fn new(app: Arc<AppState>) -> Self {
        Self { app }
    }

    /// Spawns `config.workers` worker threads, each owning a dedicated
    /// `SO_REUSEPORT` socket bound to the same host/port (linear scaling
    /// across cores, per spec §1's performance goals), and blocks until
    /// every worker has exited after a shutdown signal.
    pub fn serve(self) -> ForgewebResult<()> {
        let host = self.app.config.host.clone();
        let port = self.app.config.port;
        let workers = self.app.config.workers.max(1);

        let core_ids = core_affinity::get_core_ids().unwrap_or_default();
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let shutdown_signal = shutdown_flag.clone();
        ctrlc::set_handler(move || {
            tracing::info!("received shutdown signal, draining active connections");
            shutdown_signal.store(true, Ordering::Release);
        })
        .map_err(|e| ForgewebError::Other(e.to_string()))?;

        let metrics_app = self.app.clone();
        let shutdown_metrics = shutdown_flag.clone();
        thread::Builder::new()
            .name("forgeweb-metrics".to_string())
            .spawn(move || {
                while !shutdown_metrics.load(Ordering::Acquire) {
                    thread::sleep(Duration::from_secs(5));
                    if shutdown_metrics.load(Ordering::Acquire) {
                        break;
                    }
                    tracing::info!(
                        active_connections = metrics_app.metrics.active_conns.load(Ordering::Relaxed),
                        total_requests = metrics_app.metrics.req_count.load(Ordering::Relaxed),
                        cache_hits = metrics_app.metrics.cache_hits.load(Ordering::Relaxed),
                        cache_misses = metrics_app.metrics.cache_misses.load(Ordering::Relaxed),
                        "metrics"
                    );
                }
            })
            .ok();

        tracing::info!(workers, host = %host, port, "starting workers with SO_REUSEPORT");

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let core_id = core_ids.get(i % core_ids.len().max(1)).copied();
            let app = self.app.clone();
            let shutdown = shutdown_flag.clone();
            let host = host.clone();

            let handle = thread::Builder::new()
                .name(format!("forgeweb-worker-{i}"))
                .spawn(move || {
                    if let Some(id) = core_id {
                        core_affinity::set_for_current(id);
                    }
                    match syscalls::create_listen_socket_reuseport(&host, port) {
                        Ok(listen_fd) => {
                            let mut worker = Worker::new(i, app);
                            worker.run(listen_fd, shutdown);
                        }
                        Err(e) => {
                            tracing::error!(worker = i, error = %e, "failed to create SO_REUSEPORT socket");
                        }
                    }
                })
                .map_err(ForgewebError::from)?;

            handles.push(handle);
        }

        for handle in handles {
            let _ = handle.join();
        }

        Ok(())
    }
}
