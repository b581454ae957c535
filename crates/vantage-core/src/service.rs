//! The long-lived service object that owns every delivery component.
//!
//! Constructed once at startup, handed to consumers by reference, torn down
//! with [`DeliveryService::shutdown`]. There is no process-global state.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::DeliveryConfig;
use crate::error::DeliveryResult;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::memory::IntelligentCache;
use crate::policy::{EnvironmentSignals, PolicySelector};
use crate::queue::LoadQueue;
use crate::scheduler::Scheduler;
use crate::strategy::CacheStrategyEngine;

/// Grace period for background refreshes at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// What [`DeliveryService::start`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReport {
    pub version: String,
    /// Partitions of other versions that were deleted.
    pub removed_partitions: Vec<String>,
    /// Mirrored in-memory entries reloaded.
    pub restored_entries: usize,
}

/// What [`DeliveryService::shutdown`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub cancelled_loads: usize,
    pub aborted_refreshes: usize,
}

pub struct DeliveryService {
    config: DeliveryConfig,
    cache: IntelligentCache<serde_json::Value>,
    scheduler: Scheduler,
    load_queue: LoadQueue,
    policy: PolicySelector,
    engine: CacheStrategyEngine,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeliveryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryService")
            .field("origin", &self.config.origin)
            .field("cache_version", &self.config.cache_version)
            .field("engine", &self.engine)
            .field("load_queue", &self.load_queue)
            .finish()
    }
}

impl DeliveryService {
    /// Build with the reqwest fetcher.
    pub fn new(config: DeliveryConfig) -> DeliveryResult<Self> {
        let fetcher = HttpFetcher::new(config.request_timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Build from the environment (`VANTAGE_*`).
    pub fn from_env() -> DeliveryResult<Self> {
        Self::new(DeliveryConfig::from_env())
    }

    pub fn with_fetcher(config: DeliveryConfig, fetcher: Arc<dyn Fetcher>) -> DeliveryResult<Self> {
        config.validate()?;

        let policy = PolicySelector::new(EnvironmentSignals::default());
        let scheduler = Scheduler::new(&config.scheduler);
        let engine = CacheStrategyEngine::with_scheduler(&config, fetcher, scheduler.clone())?
            .with_policy(policy.subscribe());
        let load_queue = engine.load_queue().clone();
        let cache = IntelligentCache::new(config.memory.clone());

        Ok(Self {
            config,
            cache,
            scheduler,
            load_queue,
            policy,
            engine,
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Activate the configured version, restore the memory mirror and start
    /// the pressure monitor and policy follower.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) -> DeliveryResult<StartReport> {
        let version = self.config.cache_version.clone();
        let removed_partitions = self.engine.activate(&version).await?;

        let restored_entries = match self.cache.restore_mirror().await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "failed to restore memory mirror");
                0
            }
        };

        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.push(self.load_queue.follow_policy(self.policy.subscribe()));

        #[cfg(feature = "pressure-monitor")]
        {
            let sampler = crate::memory::ProcessMemorySampler::new(self.config.memory.memory_budget_bytes);
            watchers.push(self.cache.spawn_pressure_monitor(Arc::new(sampler)));
        }

        info!(
            version = %version,
            removed = removed_partitions.len(),
            restored = restored_entries,
            "delivery service started"
        );
        Ok(StartReport {
            version,
            removed_partitions,
            restored_entries,
        })
    }

    /// Cancel pending loads, stop watchers and drain background refreshes.
    pub async fn shutdown(&self) -> ShutdownReport {
        let cancelled_loads = self.load_queue.cancel_pending();

        let watchers = std::mem::take(&mut *self.watchers.lock().unwrap_or_else(PoisonError::into_inner));
        for watcher in watchers {
            watcher.abort();
        }

        let aborted_refreshes = self.engine.shutdown(SHUTDOWN_GRACE).await;
        info!(cancelled_loads, aborted_refreshes, "delivery service stopped");
        ShutdownReport {
            cancelled_loads,
            aborted_refreshes,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// In-memory cache for derived values.
    pub fn cache(&self) -> &IntelligentCache<serde_json::Value> {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn load_queue(&self) -> &LoadQueue {
        &self.load_queue
    }

    pub fn policy(&self) -> &PolicySelector {
        &self.policy
    }

    pub fn engine(&self) -> &CacheStrategyEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::memory::SetOptions;
    use crate::queue::{LoadDescriptor, LoadOutcome};
    use crate::types::{ResourceRequest, Response};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct EchoFetcher;

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: &ResourceRequest) -> DeliveryResult<Response> {
            Ok(Response::new(200, request.url.path().to_string()))
        }
    }

    fn service(temp_dir: &TempDir) -> DeliveryService {
        let config = DeliveryConfig::default()
            .with_cache_dir(temp_dir.path().join("partitions"))
            .with_cache_version("v2")
            .with_origin("https://site.dev");
        DeliveryService::with_fetcher(config, Arc::new(EchoFetcher)).unwrap()
    }

    #[tokio::test]
    async fn test_start_busts_old_versions() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("partitions/static-v1")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("partitions/image-v2")).unwrap();

        let svc = service(&temp_dir);
        let report = svc.start().await.unwrap();

        assert_eq!(report.version, "v2");
        assert_eq!(report.removed_partitions, vec!["static-v1".to_string()]);
        assert_eq!(svc.engine().list_partitions().await.unwrap(), vec!["image-v2"]);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_public_seams_reachable() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(&temp_dir);
        svc.start().await.unwrap();

        svc.cache()
            .set("layout", serde_json::json!({"cols": 3}), SetOptions::default())
            .await;
        assert_eq!(svc.cache().get("layout").await, Some(serde_json::json!({"cols": 3})));

        assert_eq!(svc.scheduler().schedule(|| 7).join().await, Some(7));

        let request = ResourceRequest::get("https://site.dev/hero.png").unwrap();
        let outcome = svc
            .load_queue()
            .enqueue(LoadDescriptor::new(request, 5))
            .await
            .outcome()
            .await;
        assert!(matches!(outcome, LoadOutcome::Completed(_)));

        assert_eq!(svc.policy().current().max_concurrency, 6);
        svc.shutdown().await;
    }

    #[tokio::test]
    async fn test_policy_changes_reach_queue() {
        let temp_dir = TempDir::new().unwrap();
        let svc = service(&temp_dir);
        svc.start().await.unwrap();

        svc.policy().modify(|s| s.network = crate::policy::NetworkClass::Slow);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(svc.load_queue().max_concurrent(), 2);
        svc.shutdown().await;
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let config = DeliveryConfig::default().with_origin("not a url");
        let err = DeliveryService::with_fetcher(config, Arc::new(EchoFetcher)).unwrap_err();
        assert!(matches!(err, DeliveryError::Config { .. }));
    }

}
