//! Time-sliced cooperative executor for deferred CPU-bound work.
//!
//! Tasks start in FIFO order. A drain runs queued tasks until the current
//! slice has used its budget, then yields to the runtime and picks up where
//! it left off. The scheduler has no priority notion; callers order their
//! `schedule` calls.
//!
//! Must be used from within a tokio runtime.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::SchedulerConfig;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub executed: u64,
    /// Times the drain yielded because a slice used its budget.
    pub yields: u64,
    /// Single tasks that alone ran longer than a whole slice.
    pub overruns: u64,
    /// Chunks that re-submitted their remainder.
    pub chunk_splits: u64,
}

struct State {
    queue: VecDeque<Job>,
    draining: bool,
    stats: SchedulerStats,
    chunk_size: usize,
}

/// Handle on a scheduled task's output.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// `None` if the task panicked.
    pub async fn join(self) -> Option<T> {
        self.rx.await.ok()
    }
}

/// Cooperative scheduler shared by clones.
#[derive(Clone)]
pub struct Scheduler {
    state: Arc<Mutex<State>>,
    budget: Duration,
    max_chunk_size: usize,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("budget", &self.budget)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let chunk_size = config.initial_chunk_size.max(1);
        Self {
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                draining: false,
                stats: SchedulerStats::default(),
                chunk_size,
            })),
            budget: config.slice_budget(),
            max_chunk_size: chunk_size,
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Queue a task. Draining starts if the scheduler was idle.
    pub fn schedule<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.push(Box::new(move || {
            let _ = tx.send(task());
        }));
        TaskHandle { rx }
    }

    /// Process `items` in chunks, each chunk one time-sliced unit.
    ///
    /// A chunk that runs out of budget mid-iteration re-queues its remainder
    /// as a new unit. The handle resolves to the number of items processed.
    /// A `chunk_size` of 0 uses [`Self::suggested_chunk_size`].
    pub fn schedule_chunked<T, F>(&self, items: Vec<T>, chunk_size: usize, f: F) -> TaskHandle<usize>
    where
        T: Send + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let total = items.len();
        if total == 0 {
            let _ = tx.send(0);
            return TaskHandle { rx };
        }

        let chunk_size = if chunk_size == 0 {
            self.suggested_chunk_size()
        } else {
            chunk_size
        };

        let progress = Arc::new(ChunkProgress {
            remaining: AtomicUsize::new(total),
            total,
            done: Mutex::new(Some(tx)),
        });
        let f: Arc<dyn Fn(T) + Send + Sync> = Arc::new(f);

        let mut items = items.into_iter();
        loop {
            let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
            if chunk.is_empty() {
                break;
            }
            self.push_chunk(chunk.into_iter(), Arc::clone(&f), Arc::clone(&progress));
        }

        TaskHandle { rx }
    }

    /// Chunk size adapted to recent overruns.
    pub fn suggested_chunk_size(&self) -> usize {
        self.lock().chunk_size
    }

    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats.clone()
    }

    fn push_chunk<T: Send + 'static>(
        &self,
        mut chunk: std::vec::IntoIter<T>,
        f: Arc<dyn Fn(T) + Send + Sync>,
        progress: Arc<ChunkProgress>,
    ) {
        let scheduler = self.clone();
        self.push(Box::new(move || {
            let started = Instant::now();
            while let Some(item) = chunk.next() {
                f(item);
                progress.complete_one();
                if started.elapsed() >= scheduler.budget && chunk.len() > 0 {
                    scheduler.lock().stats.chunk_splits += 1;
                    debug!(remaining = chunk.len(), "chunk out of budget, re-queueing remainder");
                    scheduler.push_chunk(chunk, f, progress);
                    return;
                }
            }
        }));
    }

    fn push(&self, job: Job) {
        let start_drain = {
            let mut state = self.lock();
            state.queue.push_back(job);
            !std::mem::replace(&mut state.draining, true)
        };
        if start_drain {
            tokio::spawn(drain(self.clone()));
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn drain(scheduler: Scheduler) {
    loop {
        let slice_started = Instant::now();
        loop {
            let job = {
                let mut state = scheduler.lock();
                match state.queue.pop_front() {
                    Some(job) => job,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };

            let job_started = Instant::now();
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                warn!("scheduled task panicked");
            }
            let job_elapsed = job_started.elapsed();

            {
                let mut state = scheduler.lock();
                state.stats.executed += 1;
                if job_elapsed > scheduler.budget {
                    state.stats.overruns += 1;
                    state.chunk_size = (state.chunk_size / 2).max(1);
                    warn!(
                        elapsed_ms = job_elapsed.as_millis() as u64,
                        budget_ms = scheduler.budget.as_millis() as u64,
                        next_chunk_size = state.chunk_size,
                        "scheduler overrun"
                    );
                } else if state.chunk_size < scheduler.max_chunk_size {
                    state.chunk_size += 1;
                }
            }

            if slice_started.elapsed() >= scheduler.budget {
                break;
            }
        }

        scheduler.lock().stats.yields += 1;
        tokio::task::yield_now().await;
    }
}

struct ChunkProgress {
    remaining: AtomicUsize,
    total: usize,
    done: Mutex<Option<oneshot::Sender<usize>>>,
}

impl ChunkProgress {
    fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let sender = self
                .done
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(tx) = sender {
                let _ = tx.send(self.total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(budget_ms: u64) -> Scheduler {
        Scheduler::new(&SchedulerConfig {
            slice_budget_ms: budget_ms,
            initial_chunk_size: 8,
        })
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |s: &str| sink.lock().unwrap().push(s.to_string()))
    }

    #[tokio::test]
    async fn test_fifo_start_order() {
        let sched = scheduler(50);
        let (log, record) = recorder();

        let mut last = None;
        for i in 0..5 {
            let record = record.clone();
            last = Some(sched.schedule(move || record(&i.to_string())));
        }
        last.unwrap().join().await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(sched.stats().executed, 5);
    }

    #[tokio::test]
    async fn test_schedule_returns_output() {
        let sched = scheduler(3);
        let handle = sched.schedule(|| 21 * 2);
        assert_eq!(handle.join().await, Some(42));
    }

    #[tokio::test]
    async fn test_yields_once_budget_used() {
        let sched = scheduler(3);
        let (log, record) = recorder();

        let r = record.clone();
        sched.schedule(move || {
            std::thread::sleep(Duration::from_millis(6));
            r("slow");
        });
        let r = record.clone();
        let last = sched.schedule(move || r("next"));
        let r = record.clone();
        tokio::spawn(async move { r("host") });

        last.join().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["slow", "host", "next"]);
        assert!(sched.stats().yields >= 1);
    }

    #[tokio::test]
    async fn test_runs_whole_queue_within_budget() {
        let sched = scheduler(1_000);
        let (log, record) = recorder();

        let r = record.clone();
        sched.schedule(move || r("a"));
        let r = record.clone();
        let last = sched.schedule(move || r("b"));
        let r = record.clone();
        tokio::spawn(async move { r("host") });

        last.join().await.unwrap();
        let log = log.lock().unwrap();
        assert_eq!(&log[..2], ["a", "b"]);
    }

    #[tokio::test]
    async fn test_overrun_shrinks_chunk_size() {
        let sched = scheduler(1);
        assert_eq!(sched.suggested_chunk_size(), 8);

        sched
            .schedule(|| std::thread::sleep(Duration::from_millis(5)))
            .join()
            .await;

        let stats = sched.stats();
        assert_eq!(stats.overruns, 1);
        assert_eq!(sched.suggested_chunk_size(), 4);
    }

    #[tokio::test]
    async fn test_chunked_processes_everything() {
        let sched = scheduler(50);
        let sum = Arc::new(AtomicUsize::new(0));
        let acc = Arc::clone(&sum);

        let processed = sched
            .schedule_chunked((1..=100).collect::<Vec<usize>>(), 10, move |n| {
                acc.fetch_add(n, Ordering::Relaxed);
            })
            .join()
            .await;

        assert_eq!(processed, Some(100));
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
    }

    #[tokio::test]
    async fn test_chunk_requeues_remainder_when_over_budget() {
        let sched = scheduler(1);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);

        let processed = sched
            .schedule_chunked(vec![(); 6], 3, move |_| {
                std::thread::sleep(Duration::from_millis(2));
                c.fetch_add(1, Ordering::Relaxed);
            })
            .join()
            .await;

        assert_eq!(processed, Some(6));
        assert_eq!(count.load(Ordering::Relaxed), 6);
        assert!(sched.stats().chunk_splits >= 2);
    }

    #[tokio::test]
    async fn test_chunked_empty_input() {
        let sched = scheduler(3);
        let processed = sched.schedule_chunked(Vec::<u8>::new(), 4, |_| {}).join().await;
        assert_eq!(processed, Some(0));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stall_queue() {
        let sched = scheduler(50);
        let failed = sched.schedule(|| panic!("boom"));
        let next = sched.schedule(|| "ok");

        assert_eq!(failed.join().await, None::<()>);
        assert_eq!(next.join().await, Some("ok"));
    }
}
