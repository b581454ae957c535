//! Request interception and the three cache strategies.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};
use url::Url;

use super::classify::{is_dev_tooling, Classification, RouteTable};
use super::partitions::PartitionSet;
use super::results::PartitionResults;
use crate::config::{DeliveryConfig, QueueConfig};
use crate::error::{DeliveryError, DeliveryResult};
use crate::fetch::Fetcher;
use crate::policy::PolicyContext;
use crate::queue::{LoadDescriptor, LoadOutcome, LoadQueue};
use crate::scheduler::Scheduler;
use crate::store::{CacheEntry, Partition, PartitionUsage};
use crate::tasks::BackgroundTasks;
use crate::types::{RequestMode, ResourceClass, ResourceRequest, Response, Strategy};

/// Queue priority of a fetch a caller is waiting on.
pub const FOREGROUND_PRIORITY: u32 = 1_000;

/// Queue priority of a stale-while-revalidate refresh.
pub const REFRESH_PRIORITY: u32 = 500;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseSource {
    /// Fresh cached entry.
    Cache,
    Network,
    /// Cached entry past its TTL.
    StaleCache,
    /// Synthetic 503; neither network nor cache could answer.
    Offline,
}

/// A response chosen by the engine.
#[derive(Debug, Clone)]
pub struct Served {
    pub response: Response,
    pub source: ResponseSource,
    pub class: ResourceClass,
    pub strategy: Strategy,
}

/// What the host should do with a request.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    Served(Served),
}

impl Disposition {
    pub fn served(&self) -> Option<&Served> {
        match self {
            Self::Served(served) => Some(served),
            Self::Passthrough => None,
        }
    }

    pub fn into_served(self) -> Option<Served> {
        match self {
            Self::Served(served) => Some(served),
            Self::Passthrough => None,
        }
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub passthrough: u64,
    pub cache_hits: u64,
    pub stale_hits: u64,
    pub network_fetches: u64,
    pub network_failures: u64,
    pub offline_responses: u64,
    pub background_refreshes: u64,
    pub storage_failures: u64,
}

/// Cache strategy engine shared by clones.
///
/// Network fetches go through the engine's [`LoadQueue`], so a page request
/// and a preload for the same resource share one fetch, and every
/// successful load is written back to its partition.
#[derive(Clone)]
pub struct CacheStrategyEngine {
    origin: Url,
    routes: Arc<RouteTable>,
    partitions: Arc<PartitionSet>,
    fetcher: Arc<dyn Fetcher>,
    scheduler: Scheduler,
    queue_config: QueueConfig,
    queue: LoadQueue,
    network_timeout: Duration,
    refreshes: BackgroundTasks,
    policy: Option<watch::Receiver<PolicyContext>>,
    stats: Arc<Mutex<EngineStats>>,
}

impl std::fmt::Debug for CacheStrategyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStrategyEngine")
            .field("origin", &self.origin.as_str())
            .field("network_timeout", &self.network_timeout)
            .field("pending_refreshes", &self.refreshes.len())
            .field("queue", &self.queue)
            .finish()
    }
}

impl CacheStrategyEngine {
    /// Engine with its own scheduler for queue admission.
    pub fn new(config: &DeliveryConfig, fetcher: Arc<dyn Fetcher>) -> DeliveryResult<Self> {
        Self::with_scheduler(config, fetcher, Scheduler::new(&config.scheduler))
    }

    pub fn with_scheduler(
        config: &DeliveryConfig,
        fetcher: Arc<dyn Fetcher>,
        scheduler: Scheduler,
    ) -> DeliveryResult<Self> {
        let origin = Url::parse(&config.origin).map_err(|e| DeliveryError::Config {
            message: format!("invalid origin {}: {}", config.origin, e),
        })?;
        let routes = Arc::new(RouteTable::standard()?);
        let partitions = Arc::new(PartitionSet::new(
            &config.cache_dir,
            &config.cache_version,
            config.partitions.clone(),
        ));
        let stats = Arc::new(Mutex::new(EngineStats::default()));
        let queue = build_queue(&fetcher, &scheduler, &config.queue, &routes, &partitions, &stats);

        Ok(Self {
            origin,
            routes,
            partitions,
            fetcher,
            scheduler,
            queue_config: config.queue.clone(),
            queue,
            network_timeout: config.network_timeout(),
            refreshes: BackgroundTasks::new(),
            policy: None,
            stats,
        })
    }

    /// Replace the route table. Call before the engine serves traffic: the
    /// load queue is rebuilt around the new table.
    pub fn with_routes(mut self, routes: RouteTable) -> Self {
        self.routes = Arc::new(routes);
        self.queue = build_queue(
            &self.fetcher,
            &self.scheduler,
            &self.queue_config,
            &self.routes,
            &self.partitions,
            &self.stats,
        );
        self
    }

    /// Serve prefetches cache-only while the policy defers preloads.
    pub fn with_policy(mut self, policy: watch::Receiver<PolicyContext>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Queue every engine fetch runs through. Preloads enqueued here share
    /// fetches and partitions with [`handle`](Self::handle).
    pub fn load_queue(&self) -> &LoadQueue {
        &self.queue
    }

    pub fn classify(&self, request: &ResourceRequest) -> Classification {
        self.routes.classify(request.url.path())
    }

    /// Serve one request. Never fails: every error degrades to a cached or
    /// offline response.
    pub async fn handle(&self, request: &ResourceRequest) -> Disposition {
        if !self.intercepts(request) {
            self.bump(|s| s.passthrough += 1);
            return Disposition::Passthrough;
        }

        let Classification { class, strategy } = self.classify(request);
        let key = request.key();
        let partition = match self.partitions.get(class).await {
            Ok(partition) => Some(partition),
            Err(e) => {
                warn!(class = %class, error = %e, "partition unavailable, serving without cache");
                self.bump(|s| s.storage_failures += 1);
                None
            }
        };

        let (response, source) =
            if request.mode == RequestMode::Prefetch && self.defers_preloads() {
                debug!(key = %key, "prefetch deferred by policy, cache only");
                let cached = self.lookup(partition.as_ref(), &key).await;
                self.fallback(request, cached)
            } else {
                match strategy {
                    Strategy::CacheFirst => self.cache_first(request, &key, partition).await,
                    Strategy::NetworkFirst => self.network_first(request, &key, partition).await,
                    Strategy::StaleWhileRevalidate => {
                        self.stale_while_revalidate(request, &key, partition).await
                    }
                }
            };

        debug!(key = %key, class = %class, strategy = %strategy, source = ?source, status = response.status, "served");
        Disposition::Served(Served {
            response,
            source,
            class,
            strategy,
        })
    }

    /// Switch to `version`, deleting every partition not tagged with it.
    pub async fn activate(&self, version: &str) -> DeliveryResult<Vec<String>> {
        self.partitions.activate(version).await
    }

    pub async fn version(&self) -> String {
        self.partitions.version().await
    }

    /// Current-version partition for `class`.
    pub async fn partition(&self, class: ResourceClass) -> DeliveryResult<Partition> {
        self.partitions.get(class).await
    }

    pub async fn list_partitions(&self) -> DeliveryResult<Vec<String>> {
        self.partitions.list().await
    }

    pub async fn usage_report(&self) -> DeliveryResult<Vec<PartitionUsage>> {
        self.partitions.usage_report().await
    }

    /// Drop the cached entry for a request. Returns whether one existed.
    pub async fn invalidate(&self, request: &ResourceRequest) -> DeliveryResult<bool> {
        let class = self.classify(request).class;
        self.partitions.get(class).await?.delete(&request.key()).await
    }

    /// Background refreshes not yet reaped.
    pub fn pending_refreshes(&self) -> usize {
        self.refreshes.len()
    }

    /// Wait up to `grace` for background refreshes, then abort the rest.
    /// Returns the number aborted.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.refreshes.drain(grace).await
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn intercepts(&self, request: &ResourceRequest) -> bool {
        request.method == reqwest::Method::GET
            && request.url.origin() == self.origin.origin()
            && !is_dev_tooling(&request.url[url::Position::BeforePath..])
    }

    fn defers_preloads(&self) -> bool {
        self.policy
            .as_ref()
            .is_some_and(|rx| rx.borrow().defer_non_critical_preloads())
    }

    async fn cache_first(
        &self,
        request: &ResourceRequest,
        key: &str,
        partition: Option<Partition>,
    ) -> (Response, ResponseSource) {
        let cached = self.lookup(partition.as_ref(), key).await;
        if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh()) {
            self.bump(|s| s.cache_hits += 1);
            return (entry.response.clone(), ResponseSource::Cache);
        }

        match self.fetch(request, FOREGROUND_PRIORITY, None).await {
            Ok(response) => (response, ResponseSource::Network),
            Err(_) => self.fallback(request, cached),
        }
    }

    async fn network_first(
        &self,
        request: &ResourceRequest,
        key: &str,
        partition: Option<Partition>,
    ) -> (Response, ResponseSource) {
        match self
            .fetch(request, FOREGROUND_PRIORITY, Some(self.network_timeout))
            .await
        {
            Ok(response) => (response, ResponseSource::Network),
            Err(_) => {
                let cached = self.lookup(partition.as_ref(), key).await;
                self.fallback(request, cached)
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &ResourceRequest,
        key: &str,
        partition: Option<Partition>,
    ) -> (Response, ResponseSource) {
        match self.lookup(partition.as_ref(), key).await {
            Some(entry) => {
                self.spawn_refresh(request.clone());
                self.from_cache(entry)
            }
            None => self.network_first(request, key, partition).await,
        }
    }

    /// The refresh writes back through the queue's result store, which
    /// resolves the partition when the fetch lands.
    fn spawn_refresh(&self, request: ResourceRequest) {
        self.bump(|s| s.background_refreshes += 1);
        let engine = self.clone();
        self.refreshes.spawn(async move {
            if let Err(e) = engine
                .fetch(&request, REFRESH_PRIORITY, Some(engine.network_timeout))
                .await
            {
                debug!(key = %request.key(), error = %e, "background refresh failed");
            }
        });
    }

    /// Any cached entry, else the offline floor.
    fn fallback(
        &self,
        request: &ResourceRequest,
        cached: Option<CacheEntry>,
    ) -> (Response, ResponseSource) {
        match cached {
            Some(entry) => self.from_cache(entry),
            None => {
                self.bump(|s| s.offline_responses += 1);
                (Response::offline(request.is_navigation()), ResponseSource::Offline)
            }
        }
    }

    fn from_cache(&self, entry: CacheEntry) -> (Response, ResponseSource) {
        if entry.is_fresh() {
            self.bump(|s| s.cache_hits += 1);
            (entry.response, ResponseSource::Cache)
        } else {
            self.bump(|s| s.stale_hits += 1);
            (entry.response, ResponseSource::StaleCache)
        }
    }

    /// Cached entry, fresh or stale. Storage errors read as a miss.
    async fn lookup(&self, partition: Option<&Partition>, key: &str) -> Option<CacheEntry> {
        match partition?.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                self.bump(|s| s.storage_failures += 1);
                None
            }
        }
    }

    /// One network attempt through the queue, optionally bounded. On timeout
    /// the load is abandoned, which aborts it unless another caller still
    /// waits on it. Non-2xx answers come back as `Ok`.
    async fn fetch(
        &self,
        request: &ResourceRequest,
        priority: u32,
        deadline: Option<Duration>,
    ) -> DeliveryResult<Response> {
        self.bump(|s| s.network_fetches += 1);
        let handle = self
            .queue
            .enqueue_fresh(LoadDescriptor::new(request.clone(), priority).critical());
        let key = handle.key().to_string();

        let outcome = match deadline {
            Some(after) => {
                // The handle is dropped with the timed-out future.
                let waited = tokio::time::timeout(after, handle.outcome()).await;
                match waited {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.queue.abandon(&key);
                        LoadOutcome::Failed {
                            message: DeliveryError::Timeout { after }.to_string(),
                            response: None,
                        }
                    }
                }
            }
            None => handle.outcome().await,
        };

        let result = match outcome {
            LoadOutcome::Completed(response) => Ok(response),
            LoadOutcome::Failed {
                response: Some(response),
                ..
            } => Ok(response),
            LoadOutcome::Failed { message, .. } => Err(DeliveryError::Network { message }),
            LoadOutcome::Cancelled => Err(DeliveryError::Network {
                message: "load cancelled".to_string(),
            }),
        };

        if let Err(e) = &result {
            warn!(url = %request.url, error = %e, "network fetch failed");
            self.bump(|s| s.network_failures += 1);
        }
        result
    }

    fn bump(&self, update: impl FnOnce(&mut EngineStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        update(&mut *stats);
    }
}

fn build_queue(
    fetcher: &Arc<dyn Fetcher>,
    scheduler: &Scheduler,
    config: &QueueConfig,
    routes: &Arc<RouteTable>,
    partitions: &Arc<PartitionSet>,
    stats: &Arc<Mutex<EngineStats>>,
) -> LoadQueue {
    let results = PartitionResults::new(Arc::clone(routes), Arc::clone(partitions), Arc::clone(stats));
    LoadQueue::with_results(Arc::clone(fetcher), scheduler.clone(), config, Arc::new(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EnvironmentSignals, PolicySelector};
    use crate::queue::LoadDescriptor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ORIGIN: &str = "https://site.dev";

    /// Fixed reply for every request; `None` simulates a connection failure.
    struct FixedFetcher {
        reply: Option<Response>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FixedFetcher {
        fn ok(body: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(Response::new(200, body.to_string())),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(body: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(Response::new(200, body.to_string())),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                reply: Some(Response::new(200, "late")),
                delay: Duration::from_secs(3600),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for FixedFetcher {
        async fn fetch(&self, _request: &ResourceRequest) -> DeliveryResult<Response> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.reply.clone().ok_or_else(|| DeliveryError::Network {
                message: "connection refused".into(),
            })
        }
    }

    fn config(temp_dir: &TempDir) -> DeliveryConfig {
        DeliveryConfig::default()
            .with_cache_dir(temp_dir.path().join("partitions"))
            .with_origin(ORIGIN)
            .with_network_timeout(Duration::from_millis(50))
    }

    fn engine(temp_dir: &TempDir, fetcher: Arc<FixedFetcher>) -> CacheStrategyEngine {
        CacheStrategyEngine::new(&config(temp_dir), fetcher).unwrap()
    }

    fn request(path: &str) -> ResourceRequest {
        ResourceRequest::get(&format!("{ORIGIN}{path}")).unwrap()
    }

    async fn seed(engine: &CacheStrategyEngine, path: &str, body: &str) {
        let req = request(path);
        let class = engine.classify(&req).class;
        let partition = engine.partition(class).await.unwrap();
        let entry = CacheEntry::new(req.key(), Response::new(200, body.to_string()), partition.spec().ttl());
        partition.put(&entry).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_get_and_cross_origin_pass_through() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::ok("x");
        let engine = engine(&temp_dir, Arc::clone(&fetcher));

        let post = request("/api/form").with_method(reqwest::Method::POST);
        assert!(matches!(engine.handle(&post).await, Disposition::Passthrough));

        let foreign = ResourceRequest::get("https://cdn.example.com/lib.js").unwrap();
        assert!(matches!(engine.handle(&foreign).await, Disposition::Passthrough));

        let hmr = request("/_next/webpack-hmr?page=/");
        assert!(matches!(engine.handle(&hmr).await, Disposition::Passthrough));

        assert_eq!(fetcher.calls(), 0);
        assert_eq!(engine.stats().passthrough, 3);
    }

    #[tokio::test]
    async fn test_network_first_times_out_to_cache() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, FixedFetcher::hanging());
        seed(&engine, "/api/profile", "cached-profile").await;

        let served = engine
            .handle(&request("/api/profile"))
            .await
            .into_served()
            .unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.strategy, Strategy::NetworkFirst);
        assert_eq!(&served.response.body[..], b"cached-profile");
        assert_eq!(engine.stats().network_failures, 1);
    }

    #[tokio::test]
    async fn test_swr_miss_is_one_shot_network_first() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, FixedFetcher::hanging());

        let served = engine.handle(&request("/about").navigate()).await.into_served().unwrap();
        assert_eq!(served.source, ResponseSource::Offline);
        assert_eq!(served.response.status, 503);
        assert_eq!(served.response.header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn test_unwritable_store_degrades_to_network() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("partitions");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let fetcher = FixedFetcher::ok("fresh");
        let engine = engine(&temp_dir, Arc::clone(&fetcher));
        let served = engine.handle(&request("/app.js")).await.into_served().unwrap();

        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(&served.response.body[..], b"fresh");
        assert!(engine.stats().storage_failures >= 1);
    }

    #[tokio::test]
    async fn test_non_success_returned_but_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(FixedFetcher {
            reply: Some(Response::new(404, "missing")),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(&temp_dir, Arc::clone(&fetcher));

        for _ in 0..2 {
            let served = engine.handle(&request("/gone.png")).await.into_served().unwrap();
            assert_eq!(served.response.status, 404);
            assert_eq!(served.source, ResponseSource::Network);
        }
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_deferred_prefetch_is_cache_only() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::ok("net");
        let selector = PolicySelector::new(EnvironmentSignals {
            battery_level: Some(0.05),
            charging: false,
            ..EnvironmentSignals::default()
        });
        let engine = engine(&temp_dir, Arc::clone(&fetcher)).with_policy(selector.subscribe());
        seed(&engine, "/next-page.js", "cached").await;

        let hit = engine
            .handle(&request("/next-page.js").prefetch())
            .await
            .into_served()
            .unwrap();
        assert_eq!(&hit.response.body[..], b"cached");

        let miss = engine
            .handle(&request("/other-page.js").prefetch())
            .await
            .into_served()
            .unwrap();
        assert_eq!(miss.source, ResponseSource::Offline);
        assert_eq!(fetcher.calls(), 0);

        selector.modify(|s| s.charging = true);
        let live = engine
            .handle(&request("/other-page.js").prefetch())
            .await
            .into_served()
            .unwrap();
        assert_eq!(live.source, ResponseSource::Network);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::ok("v2");
        let engine = engine(&temp_dir, Arc::clone(&fetcher));
        seed(&engine, "/logo.svg", "v1").await;

        assert!(engine.invalidate(&request("/logo.svg")).await.unwrap());
        let served = engine.handle(&request("/logo.svg")).await.into_served().unwrap();
        assert_eq!(&served.response.body[..], b"v2");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_bounded_refresh() {
        let temp_dir = TempDir::new().unwrap();
        let engine = engine(&temp_dir, FixedFetcher::hanging())
            .with_routes(RouteTable::new(Vec::new()));
        seed(&engine, "/page", "old").await;

        let served = engine.handle(&request("/page")).await.into_served().unwrap();
        assert_eq!(served.strategy, Strategy::StaleWhileRevalidate);
        assert_eq!(engine.pending_refreshes(), 1);

        // The refresh itself is bounded by the network timeout.
        assert_eq!(engine.shutdown(Duration::from_secs(5)).await, 0);
        assert_eq!(engine.stats().background_refreshes, 1);
        assert_eq!(engine.stats().network_failures, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::slow("img", Duration::from_millis(20));
        let engine = engine(&temp_dir, Arc::clone(&fetcher));

        let req = request("/other.png");
        let (a, b) = tokio::join!(engine.handle(&req), engine.handle(&req));

        assert_eq!(a.served().unwrap().source, ResponseSource::Network);
        assert_eq!(b.served().unwrap().source, ResponseSource::Network);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(engine.load_queue().stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn test_preload_and_page_request_share_fetch_and_partition() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::slow("hero", Duration::from_millis(20));
        let engine = engine(&temp_dir, Arc::clone(&fetcher));
        let req = request("/hero.png");

        let preload = engine.load_queue().enqueue(LoadDescriptor::new(req.clone(), 1)).await;
        let (outcome, page) = tokio::join!(preload.outcome(), engine.handle(&req));
        assert!(matches!(outcome, LoadOutcome::Completed(_)));
        assert_eq!(&page.served().unwrap().response.body[..], b"hero");
        assert_eq!(fetcher.calls(), 1);

        // The queue wrote the result to the image partition.
        let partition = engine.partition(ResourceClass::Image).await.unwrap();
        assert!(partition.get(&req.key()).await.unwrap().is_some());

        // A later preload is answered from the partition.
        let again = engine
            .load_queue()
            .enqueue(LoadDescriptor::new(req.clone(), 1))
            .await
            .outcome()
            .await;
        assert_eq!(&again.response().unwrap().body[..], b"hero");
        assert_eq!(engine.load_queue().stats().cached, 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_in_flight_during_activate_keeps_old_version_deleted() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = FixedFetcher::slow("refreshed", Duration::from_millis(200));
        let config = config(&temp_dir).with_network_timeout(Duration::from_secs(2));
        let engine = CacheStrategyEngine::new(&config, Arc::clone(&fetcher) as Arc<dyn Fetcher>)
            .unwrap()
            .with_routes(RouteTable::new(Vec::new()));
        seed(&engine, "/page", "old").await;

        let served = engine.handle(&request("/page")).await.into_served().unwrap();
        assert_eq!(&served.response.body[..], b"old");
        assert_eq!(engine.pending_refreshes(), 1);

        assert_eq!(engine.activate("v2").await.unwrap(), vec!["static-v1".to_string()]);
        assert_eq!(engine.shutdown(Duration::from_secs(5)).await, 0);

        assert_eq!(engine.list_partitions().await.unwrap(), vec!["static-v2".to_string()]);
        let partition = engine.partition(ResourceClass::Static).await.unwrap();
        let entry = partition.get(&request("/page").key()).await.unwrap().unwrap();
        assert_eq!(&entry.response.body[..], b"refreshed");
    }
}
