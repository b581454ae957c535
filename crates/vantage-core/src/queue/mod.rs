//! Bounded-concurrency priority load queue.
//!
//! At most `max_concurrent` fetches run at once. Admission always picks the
//! pending task with the highest effective priority (declared priority plus
//! one point per aging interval spent waiting), FIFO among equals. Admission
//! after `enqueue` runs as a scheduler task, so a burst of enqueues is fully
//! ordered before the first task starts; admission after a settlement is
//! immediate.
//!
//! A key that is queued, in flight, or held by the [`ResultStore`] is never
//! fetched twice: duplicates attach to the existing outcome.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::fetch::Fetcher;
use crate::policy::PolicyContext;
use crate::scheduler::Scheduler;
use crate::types::{ResourceRequest, Response};

mod admission;
mod results;

use admission::pick_next;
pub use results::{MemoryResults, ResultStore};

/// What to load and how urgently.
#[derive(Debug, Clone)]
pub struct LoadDescriptor {
    pub request: ResourceRequest,

    /// Higher is more urgent.
    pub priority: u32,

    /// Critical loads are admitted even while the policy defers preloads.
    pub critical: bool,
}

impl LoadDescriptor {
    pub fn new(request: ResourceRequest, priority: u32) -> Self {
        Self {
            request,
            priority,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn key(&self) -> String {
        self.request.key()
    }
}

/// Lifecycle of a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Queued,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// Terminal result shared by every handle on the same key.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Completed(Response),
    /// `response` is set when the server answered with a non-2xx status.
    Failed {
        message: String,
        response: Option<Response>,
    },
    Cancelled,
}

impl LoadOutcome {
    pub fn state(&self) -> LoadState {
        match self {
            Self::Completed(_) => LoadState::Completed,
            Self::Failed { .. } => LoadState::Failed,
            Self::Cancelled => LoadState::Cancelled,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Completed(response) => Some(response),
            _ => None,
        }
    }
}

/// Snapshot of one live task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTask {
    pub resource_key: String,
    pub priority_score: u32,
    pub attempts: u32,
    pub state: LoadState,
}

/// Awaitable view on a task's outcome.
#[derive(Debug)]
pub struct LoadHandle {
    key: String,
    rx: watch::Receiver<Option<LoadOutcome>>,
}

impl LoadHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the task to settle. A task dropped without settling reads
    /// as cancelled.
    pub async fn outcome(mut self) -> LoadOutcome {
        match self.rx.wait_for(Option::is_some).await {
            Ok(value) => value.as_ref().cloned().unwrap_or(LoadOutcome::Cancelled),
            Err(_) => LoadOutcome::Cancelled,
        }
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    /// Enqueues that attached to an existing task.
    pub deduplicated: u64,
    /// Enqueues answered from the result store.
    pub cached: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub pending: usize,
    pub in_flight: usize,
    /// Highest in-flight count ever observed.
    pub peak_in_flight: usize,
}

pub(crate) struct Pending {
    pub(crate) key: String,
    pub(crate) descriptor: LoadDescriptor,
    pub(crate) seq: u64,
    pub(crate) enqueued_at: Instant,
}

struct Live {
    task: LoadTask,
    seq: u64,
    tx: watch::Sender<Option<LoadOutcome>>,
    fetch: Option<AbortHandle>,
}

struct State {
    pending: Vec<Pending>,
    live: HashMap<String, Live>,
    in_flight: usize,
    max_concurrent: usize,
    defer_non_critical: bool,
    admission_scheduled: bool,
    next_seq: u64,
    stats: QueueStats,
}

struct Shared {
    fetcher: Arc<dyn Fetcher>,
    scheduler: Scheduler,
    results: Arc<dyn ResultStore>,
    aging_interval: Duration,
    state: Mutex<State>,
}

/// Priority load queue shared by clones.
#[derive(Clone)]
pub struct LoadQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("LoadQueue")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight)
            .field("max_concurrent", &state.max_concurrent)
            .finish()
    }
}

impl LoadQueue {
    /// Queue with an in-memory result store.
    pub fn new(fetcher: Arc<dyn Fetcher>, scheduler: Scheduler, config: &QueueConfig) -> Self {
        let results = Arc::new(MemoryResults::new(config));
        Self::with_results(fetcher, scheduler, config, results)
    }

    pub fn with_results(
        fetcher: Arc<dyn Fetcher>,
        scheduler: Scheduler,
        config: &QueueConfig,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                fetcher,
                scheduler,
                results,
                aging_interval: Duration::from_millis(config.aging_interval_ms.max(1)),
                state: Mutex::new(State {
                    pending: Vec::new(),
                    live: HashMap::new(),
                    in_flight: 0,
                    max_concurrent: config.max_concurrent.max(1),
                    defer_non_critical: false,
                    admission_scheduled: false,
                    next_seq: 0,
                    stats: QueueStats::default(),
                }),
            }),
        }
    }

    /// Queue a load, or attach to the existing one for the same key. A
    /// result already held by the result store completes immediately.
    pub async fn enqueue(&self, descriptor: LoadDescriptor) -> LoadHandle {
        let key = descriptor.key();

        if let Some(handle) = self.attach(&key, &descriptor) {
            return handle;
        }

        if let Some(response) = self.shared.results.lookup(&descriptor.request).await {
            self.shared.lock().stats.cached += 1;
            debug!(key = %key, "load answered from result store");
            let (_tx, rx) = watch::channel(Some(LoadOutcome::Completed(response)));
            return LoadHandle { key, rx };
        }

        self.submit(key, descriptor)
    }

    /// Like [`enqueue`](Self::enqueue) but always goes to the network unless
    /// a load for the key is already live.
    pub(crate) fn enqueue_fresh(&self, descriptor: LoadDescriptor) -> LoadHandle {
        let key = descriptor.key();
        if let Some(handle) = self.attach(&key, &descriptor) {
            return handle;
        }
        self.submit(key, descriptor)
    }

    /// Drop a live load nobody waits for any more. A queued load leaves the
    /// queue; an in-flight fetch is aborted and its slot freed.
    pub(crate) fn abandon(&self, key: &str) {
        let abandoned = {
            let mut state = self.shared.lock();
            let unwatched = state
                .live
                .get(key)
                .is_some_and(|live| live.tx.receiver_count() == 0);
            if !unwatched {
                return;
            }
            let Some(live) = state.live.remove(key) else {
                return;
            };
            if live.task.state == LoadState::InFlight {
                state.in_flight = state.in_flight.saturating_sub(1);
            }
            state.pending.retain(|p| p.key != key);
            state.stats.cancelled += 1;
            live
        };

        if let Some(fetch) = &abandoned.fetch {
            fetch.abort();
        }
        debug!(key, "abandoned unwatched load");
        admit(&self.shared);
    }

    /// Current state of a key, if the queue knows it.
    pub async fn state(&self, key: &str) -> Option<LoadState> {
        if let Some(live) = self.shared.lock().live.get(key) {
            return Some(live.task.state);
        }
        self.shared
            .results
            .holds(key)
            .await
            .then_some(LoadState::Completed)
    }

    /// Snapshot of every queued or in-flight task.
    pub fn tasks(&self) -> Vec<LoadTask> {
        let state = self.shared.lock();
        let mut tasks: Vec<LoadTask> = state.live.values().map(|l| l.task.clone()).collect();
        tasks.sort_by(|a, b| a.resource_key.cmp(&b.resource_key));
        tasks
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.lock().max_concurrent
    }

    /// Change the concurrency bound. Raising it admits immediately; lowering
    /// it lets running fetches finish.
    pub fn set_max_concurrent(&self, max: usize) {
        self.shared.lock().max_concurrent = max.max(1);
        admit(&self.shared);
    }

    /// While set, only critical tasks are admitted.
    pub fn set_defer_non_critical(&self, defer: bool) {
        self.shared.lock().defer_non_critical = defer;
        admit(&self.shared);
    }

    /// Track a policy publisher's concurrency and deferral until the
    /// publisher goes away.
    pub fn follow_policy(&self, mut rx: watch::Receiver<PolicyContext>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                let (max, defer) = {
                    let ctx = rx.borrow_and_update();
                    (ctx.max_concurrency, ctx.defer_non_critical_preloads())
                };
                queue.apply_policy(max, defer);
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Settle every pending task as cancelled. In-flight fetches run to
    /// completion. Returns the number cancelled.
    pub fn cancel_pending(&self) -> usize {
        let cancelled: Vec<Live> = {
            let mut state = self.shared.lock();
            let pending = std::mem::take(&mut state.pending);
            let live: Vec<Live> = pending
                .iter()
                .filter_map(|p| state.live.remove(&p.key))
                .collect();
            state.stats.cancelled += live.len() as u64;
            live
        };
        for live in &cancelled {
            live.tx.send_replace(Some(LoadOutcome::Cancelled));
        }
        if !cancelled.is_empty() {
            info!(cancelled = cancelled.len(), "cancelled pending loads");
        }
        cancelled.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        QueueStats {
            pending: state.pending.len(),
            in_flight: state.in_flight,
            ..state.stats.clone()
        }
    }

    fn apply_policy(&self, max: usize, defer: bool) {
        {
            let mut state = self.shared.lock();
            state.max_concurrent = max.max(1);
            state.defer_non_critical = defer;
        }
        debug!(max_concurrent = max, defer_non_critical = defer, "load queue follows policy");
        admit(&self.shared);
    }

    fn attach(&self, key: &str, descriptor: &LoadDescriptor) -> Option<LoadHandle> {
        attach_locked(&mut self.shared.lock(), key, descriptor)
    }

    fn submit(&self, key: String, descriptor: LoadDescriptor) -> LoadHandle {
        let handle = {
            let mut state = self.shared.lock();
            // A result-store lookup may have awaited; another enqueue may have won.
            if let Some(handle) = attach_locked(&mut state, &key, &descriptor) {
                return handle;
            }

            let (tx, rx) = watch::channel(None);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.live.insert(
                key.clone(),
                Live {
                    task: LoadTask {
                        resource_key: key.clone(),
                        priority_score: descriptor.priority,
                        attempts: 0,
                        state: LoadState::Queued,
                    },
                    seq,
                    tx,
                    fetch: None,
                },
            );
            state.pending.push(Pending {
                key: key.clone(),
                descriptor,
                seq,
                enqueued_at: Instant::now(),
            });
            state.stats.enqueued += 1;
            LoadHandle { key, rx }
        };

        self.schedule_admission();
        handle
    }

    fn schedule_admission(&self) {
        {
            let mut state = self.shared.lock();
            if std::mem::replace(&mut state.admission_scheduled, true) {
                return;
            }
        }
        let shared = Arc::clone(&self.shared);
        self.shared.scheduler.schedule(move || {
            shared.lock().admission_scheduled = false;
            admit(&shared);
        });
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Attach to a live task. A more urgent or critical duplicate upgrades the
/// queued task.
fn attach_locked(state: &mut State, key: &str, descriptor: &LoadDescriptor) -> Option<LoadHandle> {
    let rx = {
        let live = state.live.get_mut(key)?;
        if live.task.state == LoadState::Queued && descriptor.priority > live.task.priority_score {
            live.task.priority_score = descriptor.priority;
        }
        live.tx.subscribe()
    };
    if let Some(pending) = state.pending.iter_mut().find(|p| p.key == key) {
        pending.descriptor.priority = pending.descriptor.priority.max(descriptor.priority);
        pending.descriptor.critical |= descriptor.critical;
    }
    state.stats.deduplicated += 1;
    debug!(key, "load deduplicated");
    Some(LoadHandle {
        key: key.to_string(),
        rx,
    })
}

/// Start pending tasks while slots are free.
fn admit(shared: &Arc<Shared>) {
    let mut state = shared.lock();
    let now = Instant::now();
    while state.in_flight < state.max_concurrent {
        let Some(index) = pick_next(
            &state.pending,
            now,
            shared.aging_interval,
            state.defer_non_critical,
        ) else {
            break;
        };
        let task = state.pending.remove(index);
        state.in_flight += 1;
        state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight);
        debug!(
            key = %task.key,
            priority = task.descriptor.priority,
            in_flight = state.in_flight,
            "load admitted"
        );
        let key = task.key.clone();
        let fetch = tokio::spawn(run(Arc::clone(shared), task)).abort_handle();
        if let Some(live) = state.live.get_mut(&key) {
            live.task.state = LoadState::InFlight;
            live.task.attempts += 1;
            live.fetch = Some(fetch);
        }
    }
}

async fn run(shared: Arc<Shared>, task: Pending) {
    let request = &task.descriptor.request;
    let outcome = match shared.fetcher.fetch(request).await {
        Ok(response) if response.is_success() => {
            shared
                .results
                .store(request, &response, task.descriptor.critical)
                .await;
            LoadOutcome::Completed(response)
        }
        Ok(response) => LoadOutcome::Failed {
            message: format!("HTTP {}", response.status),
            response: Some(response),
        },
        Err(e) => LoadOutcome::Failed {
            message: e.to_string(),
            response: None,
        },
    };

    let live = {
        let mut state = shared.lock();
        // An abandoned task already gave its slot back.
        let owned = state
            .live
            .get(&task.key)
            .is_some_and(|live| live.seq == task.seq);
        if owned {
            state.in_flight = state.in_flight.saturating_sub(1);
            match &outcome {
                LoadOutcome::Completed(_) => state.stats.completed += 1,
                LoadOutcome::Failed { .. } => state.stats.failed += 1,
                LoadOutcome::Cancelled => state.stats.cancelled += 1,
            }
            state.live.remove(&task.key)
        } else {
            None
        }
    };

    if let Some(live) = live {
        if let LoadOutcome::Failed { message, .. } = &outcome {
            warn!(key = %task.key, error = %message, "load failed");
        }
        live.tx.send_replace(Some(outcome));
    }

    admit(&shared);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::error::{DeliveryError, DeliveryResult};
    use crate::policy::{EnvironmentSignals, PolicySelector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records start order; every fetch takes `delay`.
    struct StubFetcher {
        delay: Duration,
        started: Mutex<Vec<String>>,
        calls: AtomicUsize,
        fail_paths: Vec<&'static str>,
    }

    impl StubFetcher {
        fn new(delay_ms: u64) -> Arc<Self> {
            Self::failing(delay_ms, vec![])
        }

        fn failing(delay_ms: u64, fail_paths: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                started: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
                fail_paths,
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: &ResourceRequest) -> DeliveryResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started
                .lock()
                .unwrap()
                .push(request.url.path().trim_start_matches('/').to_string());
            tokio::time::sleep(self.delay).await;
            if self.fail_paths.iter().any(|p| *p == request.url.path()) {
                return Err(DeliveryError::Network {
                    message: "connection reset".into(),
                });
            }
            Ok(Response::new(200, request.url.path().to_string()))
        }
    }

    fn queue(fetcher: Arc<StubFetcher>, max_concurrent: usize) -> LoadQueue {
        LoadQueue::new(
            fetcher,
            Scheduler::new(&SchedulerConfig::default()),
            &QueueConfig {
                max_concurrent,
                ..QueueConfig::default()
            },
        )
    }

    fn load(name: &str, priority: u32) -> LoadDescriptor {
        LoadDescriptor::new(
            ResourceRequest::get(&format!("https://site.dev/{name}")).unwrap(),
            priority,
        )
    }

    #[tokio::test]
    async fn test_higher_priority_submitted_later_starts_first() {
        let fetcher = StubFetcher::new(10);
        let queue = queue(Arc::clone(&fetcher), 1);

        let task1 = queue.enqueue(load("task1", 5)).await;
        let task2 = queue.enqueue(load("task2", 9)).await;

        assert!(matches!(task1.outcome().await, LoadOutcome::Completed(_)));
        assert!(matches!(task2.outcome().await, LoadOutcome::Completed(_)));
        assert_eq!(fetcher.started(), vec!["task2", "task1"]);
    }

    #[tokio::test]
    async fn test_fifo_within_equal_priority() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 1);

        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            handles.push(queue.enqueue(load(name, 3)).await);
        }
        for handle in handles {
            handle.outcome().await;
        }
        assert_eq!(fetcher.started(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_share_one_fetch() {
        let fetcher = StubFetcher::new(20);
        let queue = queue(Arc::clone(&fetcher), 4);

        let first = queue.enqueue(load("hero.png", 1)).await;
        let second = queue.enqueue(load("hero.png", 1)).await;

        let (a, b) = tokio::join!(first.outcome(), second.outcome());
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn test_completed_result_answers_later_enqueue() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 2);

        queue.enqueue(load("app.js", 1)).await.outcome().await;
        let again = queue.enqueue(load("app.js", 1)).await.outcome().await;

        assert!(matches!(again, LoadOutcome::Completed(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().cached, 1);
        assert_eq!(
            queue.state("https://site.dev/app.js").await,
            Some(LoadState::Completed)
        );
    }

    #[tokio::test]
    async fn test_concurrency_bound_holds() {
        let fetcher = StubFetcher::new(15);
        let queue = queue(Arc::clone(&fetcher), 2);

        let mut handles = Vec::new();
        for i in 0..6 {
            handles.push(queue.enqueue(load(&format!("r{i}"), i)).await);
        }
        for handle in handles {
            handle.outcome().await;
        }

        let stats = queue.stats();
        assert_eq!(stats.completed, 6);
        assert_eq!(stats.peak_in_flight, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_failure_reported_without_retry() {
        let fetcher = StubFetcher::failing(1, vec!["/broken.js"]);
        let queue = queue(Arc::clone(&fetcher), 1);

        let outcome = queue.enqueue(load("broken.js", 1)).await.outcome().await;
        assert!(matches!(outcome, LoadOutcome::Failed { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(queue.state("https://site.dev/broken.js").await, None);
    }

    #[tokio::test]
    async fn test_cancel_pending_settles_waiters() {
        let fetcher = StubFetcher::new(30);
        let queue = queue(Arc::clone(&fetcher), 1);

        let running = queue.enqueue(load("first", 9)).await;
        let waiting = queue.enqueue(load("second", 1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(queue.cancel_pending(), 1);
        assert_eq!(waiting.outcome().await, LoadOutcome::Cancelled);
        assert!(matches!(running.outcome().await, LoadOutcome::Completed(_)));
        assert_eq!(fetcher.started(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_deferral_admits_only_critical() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 4);
        queue.set_defer_non_critical(true);

        let preload = queue.enqueue(load("later.png", 9)).await;
        let critical = queue.enqueue(load("above-fold.css", 1).critical()).await;

        assert!(matches!(critical.outcome().await, LoadOutcome::Completed(_)));
        assert_eq!(
            queue.state("https://site.dev/later.png").await,
            Some(LoadState::Queued)
        );

        queue.set_defer_non_critical(false);
        assert!(matches!(preload.outcome().await, LoadOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_follows_policy_concurrency() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 4);
        let selector = PolicySelector::default();
        let follower = queue.follow_policy(selector.subscribe());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.max_concurrent(), 6);

        selector.update(EnvironmentSignals {
            battery_level: Some(0.1),
            ..EnvironmentSignals::default()
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.max_concurrent(), 2);

        follower.abort();
    }

    #[tokio::test]
    async fn test_raising_bound_admits_waiting_tasks() {
        let fetcher = StubFetcher::new(30);
        let queue = queue(Arc::clone(&fetcher), 1);

        let first = queue.enqueue(load("one", 1)).await;
        let second = queue.enqueue(load("two", 1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.stats().in_flight, 1);

        queue.set_max_concurrent(2);
        assert_eq!(queue.stats().in_flight, 2);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fetcher.started(), vec!["one", "two"]);

        first.outcome().await;
        second.outcome().await;
    }

    #[tokio::test]
    async fn test_abandoned_fetch_frees_its_slot() {
        let fetcher = StubFetcher::new(3_600_000);
        let queue = queue(Arc::clone(&fetcher), 1);

        let stuck = queue.enqueue_fresh(load("stuck", 9));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(queue.state("https://site.dev/stuck").await, Some(LoadState::InFlight));

        // Still watched: nothing happens.
        queue.abandon("https://site.dev/stuck");
        assert_eq!(queue.stats().in_flight, 1);

        drop(stuck);
        queue.abandon("https://site.dev/stuck");
        let stats = queue.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(queue.state("https://site.dev/stuck").await, None);
    }

    #[tokio::test]
    async fn test_fresh_enqueue_skips_result_store() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 2);

        queue.enqueue(load("data.json", 1)).await.outcome().await;
        let again = queue.enqueue_fresh(load("data.json", 1)).outcome().await;

        assert!(matches!(again, LoadOutcome::Completed(_)));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(queue.stats().cached, 0);
    }

    #[tokio::test]
    async fn test_critical_duplicate_lifts_deferral() {
        let fetcher = StubFetcher::new(1);
        let queue = queue(Arc::clone(&fetcher), 4);
        queue.set_defer_non_critical(true);

        let preload = queue.enqueue(load("hero.png", 1)).await;
        let page = queue.enqueue(load("hero.png", 1).critical()).await;

        let (a, b) = tokio::join!(preload.outcome(), page.outcome());
        assert!(matches!(a, LoadOutcome::Completed(_)));
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
