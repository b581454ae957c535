//! Durable partitions as the load queue's result store.
//!
//! Every load that succeeds, whether a page request, a background refresh
//! or a preload, is written to the current-version partition of its class.
//! Enqueues consult the same partitions, so a preload never refetches a
//! resource the engine already holds fresh.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::warn;
use url::Url;

use super::classify::RouteTable;
use super::engine::EngineStats;
use super::partitions::PartitionSet;
use crate::queue::ResultStore;
use crate::store::{CacheEntry, Partition};
use crate::types::{PriorityTier, ResourceRequest, Response};

pub(crate) struct PartitionResults {
    routes: Arc<RouteTable>,
    partitions: Arc<PartitionSet>,
    stats: Arc<Mutex<EngineStats>>,
}

impl PartitionResults {
    pub(crate) fn new(
        routes: Arc<RouteTable>,
        partitions: Arc<PartitionSet>,
        stats: Arc<Mutex<EngineStats>>,
    ) -> Self {
        Self {
            routes,
            partitions,
            stats,
        }
    }

    async fn partition_for(&self, url: &Url) -> Option<Partition> {
        let class = self.routes.classify(url.path()).class;
        match self.partitions.get(class).await {
            Ok(partition) => Some(partition),
            Err(e) => {
                warn!(class = %class, error = %e, "partition unavailable for load result");
                self.storage_failure();
                None
            }
        }
    }

    async fn fresh(&self, url: &Url, key: &str) -> Option<Response> {
        let partition = self.partition_for(url).await?;
        match partition.get(key).await {
            Ok(entry) => entry.filter(CacheEntry::is_fresh).map(|e| e.response),
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                self.storage_failure();
                None
            }
        }
    }

    fn storage_failure(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .storage_failures += 1;
    }
}

#[async_trait]
impl ResultStore for PartitionResults {
    async fn lookup(&self, request: &ResourceRequest) -> Option<Response> {
        self.fresh(&request.url, &request.key()).await
    }

    /// Write back a cacheable response. Failures are logged and swallowed.
    async fn store(&self, request: &ResourceRequest, response: &Response, critical: bool) {
        if !response.is_cacheable() {
            return;
        }
        let Some(partition) = self.partition_for(&request.url).await else {
            return;
        };
        let key = request.key();
        let priority = if critical {
            PriorityTier::High
        } else {
            PriorityTier::Medium
        };
        let entry =
            CacheEntry::new(&key, response.clone(), partition.spec().ttl()).with_priority(priority);
        if let Err(e) = partition.put(&entry).await {
            warn!(key, partition = %partition.name(), error = %e, "cache write failed");
            self.storage_failure();
        }
    }

    async fn holds(&self, key: &str) -> bool {
        match Url::parse(key) {
            Ok(url) => self.fresh(&url, key).await.is_some(),
            Err(_) => false,
        }
    }
}
