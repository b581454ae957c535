//! Size-, TTL- and priority-bounded in-memory cache for derived values.
//!
//! Expiry is lazy: an entry past its TTL is dropped by the `get` that finds
//! it. Bounds are enforced eagerly: `set` evicts the lowest-priority,
//! least-recently-used entries until the new value fits, so
//! `len() <= max_entries` and `total_bytes() <= max_bytes` hold after every
//! call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MemoryCacheConfig;
use crate::error::DeliveryResult;
use crate::types::{PriorityTier, Response};

mod mirror;
pub mod policy;
pub mod pressure;

use mirror::{Mirror, MirrorRecord};
pub use pressure::{MemorySample, MemorySampler, StaticSampler};

#[cfg(feature = "pressure-monitor")]
pub use pressure::ProcessMemorySampler;

/// A value the cache can hold, weigh and mirror.
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Weight counted against the byte budget. Defaults to the JSON length.
    fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

impl CacheValue for String {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl CacheValue for Vec<u8> {
    fn size_bytes(&self) -> usize {
        self.len()
    }
}

impl CacheValue for serde_json::Value {}

impl CacheValue for Response {
    fn size_bytes(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// Per-call options for [`IntelligentCache::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the priority-scaled TTL.
    pub ttl: Option<Duration>,

    /// Overrides priority inference.
    pub priority: Option<PriorityTier>,

    /// Mirror to the durable store (only honored for high and critical).
    pub persistent: bool,
}

impl SetOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn priority(mut self, priority: PriorityTier) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub pressure_evictions: u64,
    pub rejected: u64,
    pub entries: usize,
    pub total_bytes: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct MemoryEntry<V> {
    value: V,
    stored_at: Instant,
    stored_wall: DateTime<Utc>,
    ttl: Duration,
    priority: PriorityTier,
    access_count: u64,
    last_access_tick: u64,
    size_bytes: usize,
}

impl<V> MemoryEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, MemoryEntry<V>>,
    total_bytes: usize,
    tick: u64,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<MemoryEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Keys in eviction order: lowest priority, then least recently used.
    fn eviction_candidates(&self) -> Vec<String> {
        let mut ranked: Vec<(&String, (PriorityTier, u64))> = self
            .entries
            .iter()
            .map(|(k, e)| (k, policy::eviction_rank(e.priority, e.last_access_tick)))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1));
        ranked.into_iter().map(|(k, _)| k.clone()).collect()
    }
}

/// In-memory cache shared by clones.
#[derive(Debug)]
pub struct IntelligentCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    config: Arc<MemoryCacheConfig>,
    mirror: Option<Mirror>,
}

impl<V> Clone for IntelligentCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: Arc::clone(&self.config),
            mirror: self.mirror.clone(),
        }
    }
}

impl<V: CacheValue> IntelligentCache<V> {
    pub fn new(config: MemoryCacheConfig) -> Self {
        let mirror = config.mirror_dir.clone().map(Mirror::new);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                total_bytes: 0,
                tick: 0,
                stats: CacheStats::default(),
            })),
            config: Arc::new(config),
            mirror,
        }
    }

    pub fn config(&self) -> &MemoryCacheConfig {
        &self.config
    }

    /// Insert or replace a value, evicting as needed to stay within bounds.
    ///
    /// Returns `false` when the value alone exceeds the byte budget; it is
    /// not stored in that case.
    pub async fn set(&self, key: &str, value: V, options: SetOptions) -> bool {
        let size_bytes = value.size_bytes();
        let priority = options
            .priority
            .unwrap_or_else(|| policy::infer_priority(key, size_bytes));
        let ttl = options
            .ttl
            .unwrap_or_else(|| policy::scaled_ttl(self.config.base_ttl(), priority));
        let mirrored = options.persistent && priority >= PriorityTier::High;

        let record = {
            let mut inner = self.inner.lock().await;

            if size_bytes > self.config.max_bytes {
                inner.stats.rejected += 1;
                warn!(key, size_bytes, max_bytes = self.config.max_bytes, "value exceeds cache budget");
                return false;
            }

            inner.remove(key);

            let mut evicted = 0u64;
            let candidates = inner.eviction_candidates();
            for victim in candidates {
                if inner.entries.len() < self.config.max_entries
                    && inner.total_bytes + size_bytes <= self.config.max_bytes
                {
                    break;
                }
                inner.remove(&victim);
                evicted += 1;
                debug!(key = %victim, "evicted for space");
            }
            inner.stats.evictions += evicted;

            let tick = inner.next_tick();
            let stored_wall = Utc::now();
            inner.entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: value.clone(),
                    stored_at: Instant::now(),
                    stored_wall,
                    ttl,
                    priority,
                    access_count: 0,
                    last_access_tick: tick,
                    size_bytes,
                },
            );
            inner.total_bytes += size_bytes;

            mirrored.then(|| MirrorRecord {
                key: key.to_string(),
                value,
                stored_at: stored_wall,
                ttl_ms: ttl.as_millis() as u64,
                priority,
            })
        };

        match (record, &self.mirror) {
            (Some(record), Some(mirror)) => {
                if let Err(e) = mirror.write(&record).await {
                    warn!(key, error = %e, "failed to mirror cache entry");
                }
            }
            // A non-persistent overwrite must not leave the old value to be restored.
            (None, Some(_)) => self.forget_mirror(key).await,
            _ => {}
        }
        true
    }

    /// Look up a value; an expired entry is removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let expired = {
            let mut guard = self.inner.lock().await;
            let inner = &mut *guard;
            let now = Instant::now();
            let tick = inner.next_tick();

            let expired = match inner.entries.get_mut(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.access_count += 1;
                    entry.last_access_tick = tick;
                    inner.stats.hits += 1;
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                inner.remove(key);
                inner.stats.expirations += 1;
            }
            inner.stats.misses += 1;
            expired
        };

        if expired {
            debug!(key, "memory entry expired");
            self.forget_mirror(key).await;
        }
        None
    }

    /// Presence check that neither counts as a hit nor refreshes recency.
    pub async fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }

    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.inner.lock().await.remove(key).is_some();
        self.forget_mirror(key).await;
        removed
    }

    /// Drop every entry, mirrored records included.
    pub async fn clear(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.entries.clear();
            inner.total_bytes = 0;
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.clear().await {
                warn!(error = %e, "failed to clear cache mirror");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn total_bytes(&self) -> usize {
        self.inner.lock().await.total_bytes
    }

    /// Access count of a live entry.
    pub async fn access_count(&self, key: &str) -> Option<u64> {
        self.inner
            .lock()
            .await
            .entries
            .get(key)
            .map(|e| e.access_count)
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            ..inner.stats.clone()
        }
    }

    /// Drop every expired entry now rather than on next access.
    pub async fn purge_expired(&self) -> usize {
        let expired: Vec<String> = {
            let mut inner = self.inner.lock().await;
            let now = Instant::now();
            let keys: Vec<String> = inner
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &keys {
                inner.remove(key);
            }
            inner.stats.expirations += keys.len() as u64;
            keys
        };
        for key in &expired {
            self.forget_mirror(key).await;
        }
        expired.len()
    }

    /// Evict roughly `fraction` of the entries, lowest priority first,
    /// regardless of TTL.
    pub async fn evict_fraction(&self, fraction: f64) -> usize {
        let mut inner = self.inner.lock().await;
        let len = inner.entries.len();
        if len == 0 || fraction <= 0.0 {
            return 0;
        }
        let target = ((len as f64) * fraction.min(1.0)).ceil() as usize;

        let victims: Vec<String> = inner.eviction_candidates().into_iter().take(target).collect();
        for key in &victims {
            inner.remove(key);
        }
        inner.stats.pressure_evictions += victims.len() as u64;
        victims.len()
    }

    /// One pressure check: evict when utilization crosses the threshold.
    pub async fn check_pressure(&self, sampler: &dyn MemorySampler) -> usize {
        let Some(sample) = sampler.sample() else {
            return 0;
        };
        let utilization = sample.utilization();
        if utilization <= self.config.pressure_threshold {
            return 0;
        }
        let evicted = self.evict_fraction(self.config.pressure_evict_fraction).await;
        info!(utilization, evicted, "memory pressure eviction");
        evicted
    }

    /// Run [`Self::check_pressure`] on the configured interval until aborted.
    pub fn spawn_pressure_monitor(&self, sampler: Arc<dyn MemorySampler>) -> JoinHandle<()> {
        let cache = self.clone();
        let period = Duration::from_millis(self.config.monitor_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                cache.check_pressure(sampler.as_ref()).await;
            }
        })
    }

    /// Reload mirrored entries still within their TTL; expired ones are
    /// deleted from the mirror. Returns the number restored.
    pub async fn restore_mirror(&self) -> DeliveryResult<usize> {
        let Some(mirror) = &self.mirror else {
            return Ok(0);
        };

        let records = mirror.load_all::<V>().await?;
        let now_wall = Utc::now();
        let mut restored = 0usize;

        for (path, record) in records {
            let age = now_wall
                .signed_duration_since(record.stored_at)
                .to_std()
                .unwrap_or_default();
            let ttl = Duration::from_millis(record.ttl_ms);
            if age >= ttl {
                mirror.remove_path(&path).await?;
                continue;
            }

            let size_bytes = record.value.size_bytes();
            let mut inner = self.inner.lock().await;
            if size_bytes > self.config.max_bytes
                || inner.entries.len() >= self.config.max_entries
                || inner.total_bytes + size_bytes > self.config.max_bytes
            {
                continue;
            }
            let tick = inner.next_tick();
            let stored_at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
            if let Some(old) = inner.entries.insert(
                record.key.clone(),
                MemoryEntry {
                    value: record.value,
                    stored_at,
                    stored_wall: record.stored_at,
                    ttl,
                    priority: record.priority,
                    access_count: 0,
                    last_access_tick: tick,
                    size_bytes,
                },
            ) {
                inner.total_bytes -= old.size_bytes;
            }
            inner.total_bytes += size_bytes;
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "restored mirrored cache entries");
        }
        Ok(restored)
    }

    /// Wall-clock write time of a live entry.
    pub async fn stored_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .await
            .entries
            .get(key)
            .map(|e| e.stored_wall)
    }

    async fn forget_mirror(&self, key: &str) {
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.remove(key).await {
                debug!(key, error = %e, "failed to remove mirror record");
            }
        }
    }
}
