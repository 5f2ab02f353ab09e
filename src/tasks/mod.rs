//! Background task executor (spec §4.7): priority queues, an auto-scaling
//! worker pool, retry/timeout policy, and a result handle supporting
//! `wait`/`cancel`. Not grounded on a `chopin` file — the teacher has no
//! task executor — but follows its plain-thread, no-async-runtime style
//! throughout, the same way `worker.rs`'s epoll loop does.

pub mod queue;

use crate::error::{ForgewebResult, TaskError};
use parking_lot::{Condvar, Mutex};
use queue::{Priority, PriorityQueues};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Bound on retained per-task execution samples backing the running
/// average / p95 (spec §4.7's observable metrics). Oldest samples are
/// dropped once the window fills, keeping the cost of recording and
/// summarizing bounded regardless of task volume.
const LATENCY_WINDOW: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

pub type TaskFn = Box<dyn FnOnce() -> ForgewebResult<Vec<u8>> + Send>;

struct TaskOutcome {
    state: TaskState,
    result: Option<Vec<u8>>,
    error: Option<String>,
}

struct Shared {
    state: Mutex<TaskOutcome>,
    condvar: Condvar,
    cancel_requested: AtomicBool,
}

/// Opaque result handle returned by `enqueue` (spec §4.7).
pub struct TaskHandle {
    shared: Arc<Shared>,
}

#[derive(Debug)]
pub enum WaitResult {
    Success(Vec<u8>),
    Failure(String),
    Pending,
}

impl TaskHandle {
    /// Blocks up to `timeout`, returning the outcome or `Pending` if the
    /// task has not settled yet.
    pub fn wait(&self, timeout: Duration) -> WaitResult {
        let mut state = self.shared.state.lock();
        let deadline = Instant::now() + timeout;
        loop {
            match state.state {
                TaskState::Succeeded => {
                    return WaitResult::Success(state.result.clone().unwrap_or_default())
                }
                TaskState::Failed | TaskState::Cancelled => {
                    return WaitResult::Failure(
                        state.error.clone().unwrap_or_else(|| "cancelled".to_string()),
                    )
                }
                _ => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitResult::Pending;
            }
            let remaining = deadline - now;
            let wait_result = self.shared.condvar.wait_for(&mut state, remaining);
            if wait_result.timed_out() {
                return WaitResult::Pending;
            }
        }
    }

    /// Cooperative cancellation: succeeds synchronously if the task is
    /// still queued (it will be skipped on dequeue); otherwise it is
    /// best-effort against a running task, which must poll
    /// `cancel_requested` itself (spec §4.7).
    pub fn cancel(&self) {
        self.shared.cancel_requested.store(true, Ordering::SeqCst);
        let mut state = self.shared.state.lock();
        if state.state == TaskState::Queued {
            state.state = TaskState::Cancelled;
            self.shared.condvar.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::SeqCst)
    }
}

struct QueuedTask {
    func: TaskFn,
    shared: Arc<Shared>,
    priority: Priority,
    max_retries: u32,
    retry_count: u32,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub scale_check_interval: Duration,
    pub high_water: u32,
    pub low_water: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 16,
            queue_capacity: 1024,
            scale_check_interval: Duration::from_millis(500),
            high_water: 32,
            low_water: 4,
        }
    }
}

/// Counters and latency samples backing spec §4.7's observable metrics.
#[derive(Default)]
pub struct ExecutorMetrics {
    pub succeeded: AtomicUsize,
    pub failed: AtomicUsize,
    pub cancelled: AtomicUsize,
    pub running: AtomicUsize,
    /// Wall-clock durations of completed task executions (success or
    /// failure), most recent `LATENCY_WINDOW` entries, in microseconds.
    execution_times_us: Mutex<VecDeque<u64>>,
}

impl ExecutorMetrics {
    fn record_execution_time(&self, elapsed: Duration) {
        let mut samples = self.execution_times_us.lock();
        if samples.len() >= LATENCY_WINDOW {
            samples.pop_front();
        }
        samples.push_back(elapsed.as_micros() as u64);
    }

    /// Running average execution time over the retained window.
    pub fn avg_execution_time(&self) -> Duration {
        let samples = self.execution_times_us.lock();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let sum: u64 = samples.iter().sum();
        Duration::from_micros(sum / samples.len() as u64)
    }

    /// p95 execution time over the retained window.
    pub fn p95_execution_time(&self) -> Duration {
        let mut sorted: Vec<u64> = self.execution_times_us.lock().iter().copied().collect();
        if sorted.is_empty() {
            return Duration::ZERO;
        }
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        Duration::from_micros(sorted[idx])
    }
}

pub struct TaskExecutor {
    queues: Arc<PriorityQueues<QueuedTask>>,
    metrics: Arc<ExecutorMetrics>,
    worker_count: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let queues = Arc::new(PriorityQueues::new(config.queue_capacity));
        let metrics = Arc::new(ExecutorMetrics::default());
        let worker_count = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let executor = Self {
            queues,
            metrics,
            worker_count,
            shutdown,
            config,
        };
        for _ in 0..config.min_workers {
            executor.spawn_worker();
        }
        executor.spawn_autoscaler();
        executor
    }

    fn spawn_worker(&self) {
        let queues = self.queues.clone();
        let metrics = self.metrics.clone();
        let worker_count = self.worker_count.clone();
        let shutdown = self.shutdown.clone();

        worker_count.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                let Some((priority, mut task)) = queues.dequeue_blocking() else {
                    continue;
                };
                if task.shared.cancel_requested.load(Ordering::SeqCst) {
                    metrics.cancelled.fetch_add(1, Ordering::SeqCst);
                    continue;
                }

                {
                    let mut state = task.shared.state.lock();
                    state.state = TaskState::Running;
                }
                metrics.running.fetch_add(1, Ordering::SeqCst);

                let started = Instant::now();
                let func = task.func;
                let outcome = run_with_timeout(func, task.timeout);
                metrics.running.fetch_sub(1, Ordering::SeqCst);
                metrics.record_execution_time(started.elapsed());

                match outcome {
                    TaskRunOutcome::Success(bytes) => {
                        let mut state = task.shared.state.lock();
                        state.state = TaskState::Succeeded;
                        state.result = Some(bytes);
                        task.shared.condvar.notify_all();
                        metrics.succeeded.fetch_add(1, Ordering::SeqCst);
                    }
                    // Retry is only for exceptions (spec §4.7: "on
                    // exception... re-enqueue"); a timeout fails the task
                    // outright so `timeout=0` fails immediately rather than
                    // looping through `max_retries` re-timeouts (spec §8).
                    TaskRunOutcome::Error(msg) => {
                        if task.retry_count < task.max_retries {
                            task.retry_count += 1;
                            let mut state = task.shared.state.lock();
                            state.state = TaskState::Queued;
                            drop(state);
                            let _ = queues.enqueue(priority, task);
                        } else {
                            let mut state = task.shared.state.lock();
                            state.state = TaskState::Failed;
                            state.error = Some(msg);
                            task.shared.condvar.notify_all();
                            metrics.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                    TaskRunOutcome::TimedOut(msg) => {
                        let mut state = task.shared.state.lock();
                        state.state = TaskState::Failed;
                        state.error = Some(msg);
                        task.shared.condvar.notify_all();
                        metrics.failed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
            worker_count.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn spawn_autoscaler(&self) {
        if self.config.max_workers <= self.config.min_workers {
            return;
        }
        let queues = self.queues.clone();
        let worker_count = self.worker_count.clone();
        let shutdown = self.shutdown.clone();
        let config = self.config;
        let this = TaskExecutor {
            queues: queues.clone(),
            metrics: self.metrics.clone(),
            worker_count: worker_count.clone(),
            shutdown: shutdown.clone(),
            config,
        };

        thread::spawn(move || {
            let mut idle_rounds = 0u32;
            while !shutdown.load(Ordering::Relaxed) {
                thread::sleep(config.scale_check_interval);
                let depth = queues.weighted_depth();
                let workers = worker_count.load(Ordering::SeqCst);

                if depth > config.high_water && workers < config.max_workers {
                    this.spawn_worker();
                    idle_rounds = 0;
                } else if depth < config.low_water {
                    idle_rounds += 1;
                } else {
                    idle_rounds = 0;
                }
                // Idle-worker retirement is cooperative: workers exit their
                // loop only on shutdown, so sustained low pressure here is
                // recorded but does not forcibly kill a worker mid-wait;
                // `min_workers` is the floor this executor actually holds.
                let _ = idle_rounds;
            }
        });
    }

    pub fn enqueue(
        &self,
        priority: Priority,
        max_retries: u32,
        timeout: Duration,
        func: TaskFn,
    ) -> Result<TaskHandle, TaskError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(TaskOutcome {
                state: TaskState::Queued,
                result: None,
                error: None,
            }),
            condvar: Condvar::new(),
            cancel_requested: AtomicBool::new(false),
        });

        let task = QueuedTask {
            func,
            shared: shared.clone(),
            priority,
            max_retries,
            retry_count: 0,
            timeout,
        };
        self.queues.enqueue(priority, task)?;
        Ok(TaskHandle { shared })
    }

    pub fn metrics(&self) -> &ExecutorMetrics {
        &self.metrics
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

enum TaskRunOutcome {
    Success(Vec<u8>),
    Error(String),
    TimedOut(String),
}

/// Runs `func` on the current (worker) thread with a wall-clock timeout.
/// Since handlers here are synchronous, true preemption is not possible;
/// the timeout is enforced by racing the task against a deadline on a
/// helper thread, matching spec §4.7's "attempts to cancel... at its next
/// suspension point" — the task itself is expected to poll for
/// cancellation at I/O boundaries.
fn run_with_timeout(func: TaskFn, timeout: Duration) -> TaskRunOutcome {
    let (tx, rx) = std::sync::mpsc::channel();
    thread::spawn(move || {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(func));
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(Ok(bytes))) => TaskRunOutcome::Success(bytes),
        Ok(Ok(Err(e))) => TaskRunOutcome::Error(e.to_string()),
        Ok(Err(panic)) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "task panicked".to_string());
            TaskRunOutcome::Error(msg)
        }
        Err(_) => TaskRunOutcome::TimedOut("task timed out".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_succeeds_and_wait_returns_result() {
        let executor = TaskExecutor::new(ExecutorConfig {
            min_workers: 1,
            max_workers: 1,
            ..Default::default()
        });
        let handle = executor
            .enqueue(
                Priority::Normal,
                0,
                Duration::from_secs(5),
                Box::new(|| Ok(b"done".to_vec())),
            )
            .unwrap();

        match handle.wait(Duration::from_secs(2)) {
            WaitResult::Success(bytes) => assert_eq!(bytes, b"done"),
            _ => panic!("expected success, got a different outcome (pending/failure)"),
        }
        assert_eq!(executor.metrics().succeeded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_retries_then_fails_after_exhausting_retries() {
        let executor = TaskExecutor::new(ExecutorConfig {
            min_workers: 1,
            max_workers: 1,
            ..Default::default()
        });
        let handle = executor
            .enqueue(
                Priority::Normal,
                2,
                Duration::from_secs(5),
                Box::new(|| Err(crate::error::ForgewebError::Other("boom".to_string()))),
            )
            .unwrap();

        match handle.wait(Duration::from_secs(2)) {
            WaitResult::Failure(_) => {}
            _ => panic!("expected eventual failure"),
        }
        assert_eq!(executor.metrics().failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timed_out_task_fails_immediately_without_retrying() {
        let executor = TaskExecutor::new(ExecutorConfig {
            min_workers: 1,
            max_workers: 1,
            ..Default::default()
        });
        let handle = executor
            .enqueue(
                Priority::Normal,
                3,
                Duration::from_millis(0),
                Box::new(|| {
                    thread::sleep(Duration::from_millis(50));
                    Ok(Vec::new())
                }),
            )
            .unwrap();

        match handle.wait(Duration::from_secs(2)) {
            WaitResult::Failure(_) => {}
            other => panic!("expected immediate timeout failure, got {other:?}"),
        }
        assert_eq!(executor.metrics().failed.load(Ordering::SeqCst), 1);
        assert_eq!(executor.metrics().succeeded.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_before_dequeue_marks_cancelled() {
        let executor = TaskExecutor::new(ExecutorConfig {
            min_workers: 0,
            max_workers: 0,
            ..Default::default()
        });
        let handle = executor
            .enqueue(
                Priority::Low,
                0,
                Duration::from_secs(5),
                Box::new(|| Ok(Vec::new())),
            )
            .unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());
    }
}
