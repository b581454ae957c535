//! Where completed loads land and where enqueues look for them first.

use async_trait::async_trait;

use crate::config::{MemoryCacheConfig, QueueConfig};
use crate::memory::{IntelligentCache, SetOptions};
use crate::types::{PriorityTier, ResourceRequest, Response};

/// Result tier behind a [`LoadQueue`](super::LoadQueue).
///
/// `lookup` answers an enqueue without a fetch; `store` receives every
/// successful load.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn lookup(&self, request: &ResourceRequest) -> Option<Response>;

    async fn store(&self, request: &ResourceRequest, response: &Response, critical: bool);

    /// Whether a usable result is held for `key`.
    async fn holds(&self, key: &str) -> bool;
}

/// In-memory results for a standalone queue.
pub struct MemoryResults {
    cache: IntelligentCache<Response>,
}

impl MemoryResults {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            cache: IntelligentCache::new(MemoryCacheConfig {
                max_entries: config.result_cache_entries.max(1),
                ..MemoryCacheConfig::default()
            }),
        }
    }
}

#[async_trait]
impl ResultStore for MemoryResults {
    async fn lookup(&self, request: &ResourceRequest) -> Option<Response> {
        self.cache.get(&request.key()).await
    }

    async fn store(&self, request: &ResourceRequest, response: &Response, critical: bool) {
        let tier = if critical {
            PriorityTier::High
        } else {
            PriorityTier::Medium
        };
        self.cache
            .set(&request.key(), response.clone(), SetOptions::default().priority(tier))
            .await;
    }

    async fn holds(&self, key: &str) -> bool {
        self.cache.contains(key).await
    }
}
