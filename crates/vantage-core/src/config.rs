//! Service configuration.
//!
//! Every field has a default, so a partial YAML file or a bare environment
//! yields a usable config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, DeliveryResult};
use crate::types::ResourceClass;

/// Top-level configuration for [`crate::service::DeliveryService`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Root directory holding the durable partitions.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Active partition version (`<family>-<version>`).
    #[serde(default = "default_cache_version")]
    pub cache_version: String,

    /// Origin whose GET requests are intercepted.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Network-first fetch deadline in milliseconds.
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,

    /// Client-level deadline for every other fetch, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub memory: MemoryCacheConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub partitions: PartitionsConfig,
}

/// Bounds and pressure settings for the in-memory cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    #[serde(default = "default_memory_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_memory_max_bytes")]
    pub max_bytes: usize,

    /// Base TTL before priority scaling.
    #[serde(default = "default_memory_base_ttl_ms")]
    pub base_ttl_ms: u64,

    /// Utilization above which the pressure valve fires.
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,

    /// Share of entries dropped when the valve fires.
    #[serde(default = "default_pressure_evict_fraction")]
    pub pressure_evict_fraction: f64,

    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Process memory budget that utilization is measured against.
    #[serde(default = "default_memory_budget_bytes")]
    pub memory_budget_bytes: u64,

    /// Directory for durable mirroring of persistent high-priority entries.
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,
}

/// Load queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// A queued task gains one priority point per interval spent waiting.
    #[serde(default = "default_aging_interval_ms")]
    pub aging_interval_ms: u64,

    /// Completed results kept for dedup.
    #[serde(default = "default_result_cache_entries")]
    pub result_cache_entries: usize,
}

/// Cooperative scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_slice_budget_ms")]
    pub slice_budget_ms: u64,

    #[serde(default = "default_chunk_size")]
    pub initial_chunk_size: usize,
}

/// Per-class partition budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionsConfig {
    #[serde(default = "default_static_partition")]
    pub r#static: PartitionSpec,

    #[serde(default = "default_image_partition")]
    pub image: PartitionSpec,

    #[serde(default = "default_api_partition")]
    pub api: PartitionSpec,

    #[serde(default = "default_font_partition")]
    pub font: PartitionSpec,
}

/// Default TTL and size budget for one partition family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub ttl_secs: u64,
    pub max_bytes: u64,
    pub max_entries: usize,
}

impl PartitionSpec {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

const DAY_SECS: u64 = 24 * 60 * 60;
const MIB: u64 = 1024 * 1024;

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("vantage")
        .join("partitions")
}

fn default_cache_version() -> String {
    "v1".to_string()
}

fn default_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_network_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_memory_max_entries() -> usize {
    500
}

fn default_memory_max_bytes() -> usize {
    50 * MIB as usize
}

fn default_memory_base_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_pressure_threshold() -> f64 {
    0.8
}

fn default_pressure_evict_fraction() -> f64 {
    0.3
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

fn default_memory_budget_bytes() -> u64 {
    512 * MIB
}

fn default_max_concurrent() -> usize {
    4
}

fn default_aging_interval_ms() -> u64 {
    2_000
}

fn default_result_cache_entries() -> usize {
    256
}

fn default_slice_budget_ms() -> u64 {
    3
}

fn default_chunk_size() -> usize {
    16
}

fn default_static_partition() -> PartitionSpec {
    PartitionSpec {
        ttl_secs: 7 * DAY_SECS,
        max_bytes: 50 * MIB,
        max_entries: 200,
    }
}

fn default_image_partition() -> PartitionSpec {
    PartitionSpec {
        ttl_secs: 30 * DAY_SECS,
        max_bytes: 100 * MIB,
        max_entries: 300,
    }
}

fn default_api_partition() -> PartitionSpec {
    PartitionSpec {
        ttl_secs: 5 * 60,
        max_bytes: 10 * MIB,
        max_entries: 100,
    }
}

fn default_font_partition() -> PartitionSpec {
    PartitionSpec {
        ttl_secs: 365 * DAY_SECS,
        max_bytes: 20 * MIB,
        max_entries: 30,
    }
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_memory_max_entries(),
            max_bytes: default_memory_max_bytes(),
            base_ttl_ms: default_memory_base_ttl_ms(),
            pressure_threshold: default_pressure_threshold(),
            pressure_evict_fraction: default_pressure_evict_fraction(),
            monitor_interval_ms: default_monitor_interval_ms(),
            memory_budget_bytes: default_memory_budget_bytes(),
            mirror_dir: None,
        }
    }
}

impl MemoryCacheConfig {
    pub fn base_ttl(&self) -> Duration {
        Duration::from_millis(self.base_ttl_ms)
    }

    pub fn with_limits(mut self, max_entries: usize, max_bytes: usize) -> Self {
        self.max_entries = max_entries;
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_base_ttl(mut self, ttl: Duration) -> Self {
        self.base_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = Some(dir.into());
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            aging_interval_ms: default_aging_interval_ms(),
            result_cache_entries: default_result_cache_entries(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slice_budget_ms: default_slice_budget_ms(),
            initial_chunk_size: default_chunk_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn slice_budget(&self) -> Duration {
        Duration::from_millis(self.slice_budget_ms)
    }
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            r#static: default_static_partition(),
            image: default_image_partition(),
            api: default_api_partition(),
            font: default_font_partition(),
        }
    }
}

impl PartitionsConfig {
    pub fn for_class(&self, class: ResourceClass) -> &PartitionSpec {
        match class {
            ResourceClass::Static => &self.r#static,
            ResourceClass::Image => &self.image,
            ResourceClass::Api => &self.api,
            ResourceClass::Font => &self.font,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_version: default_cache_version(),
            origin: default_origin(),
            network_timeout_ms: default_network_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            memory: MemoryCacheConfig::default(),
            queue: QueueConfig::default(),
            scheduler: SchedulerConfig::default(),
            partitions: PartitionsConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `VANTAGE_CACHE_DIR` | Partition root directory |
    /// | `VANTAGE_CACHE_VERSION` | Active partition version |
    /// | `VANTAGE_ORIGIN` | Intercepted origin |
    /// | `VANTAGE_NETWORK_TIMEOUT_MS` | Network-first deadline |
    /// | `VANTAGE_MAX_CONCURRENT` | Load queue concurrency |
    /// | `VANTAGE_SLICE_BUDGET_MS` | Scheduler time slice |
    /// | `VANTAGE_MEMORY_MAX_ENTRIES` | In-memory cache entry bound |
    /// | `VANTAGE_MEMORY_MAX_BYTES` | In-memory cache byte bound |
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("VANTAGE_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(version) = std::env::var("VANTAGE_CACHE_VERSION") {
            config.cache_version = version;
        }
        if let Ok(origin) = std::env::var("VANTAGE_ORIGIN") {
            config.origin = origin;
        }
        if let Some(ms) = env_parse("VANTAGE_NETWORK_TIMEOUT_MS") {
            config.network_timeout_ms = ms;
        }
        if let Some(n) = env_parse("VANTAGE_MAX_CONCURRENT") {
            config.queue.max_concurrent = n;
        }
        if let Some(ms) = env_parse("VANTAGE_SLICE_BUDGET_MS") {
            config.scheduler.slice_budget_ms = ms;
        }
        if let Some(n) = env_parse("VANTAGE_MEMORY_MAX_ENTRIES") {
            config.memory.max_entries = n;
        }
        if let Some(n) = env_parse("VANTAGE_MEMORY_MAX_BYTES") {
            config.memory.max_bytes = n;
        }
        config
    }

    /// Load a YAML config file; missing fields take their defaults.
    pub fn from_yaml_file(path: &Path) -> DeliveryResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DeliveryError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> DeliveryResult<Self> {
        let config: Self = serde_yaml::from_str(text).map_err(|e| DeliveryError::Config {
            message: format!("failed to parse config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the component invariants.
    pub fn validate(&self) -> DeliveryResult<()> {
        let invalid = |message: &str| {
            Err(DeliveryError::Config {
                message: message.to_string(),
            })
        };
        if self.cache_version.is_empty() || self.cache_version.contains(['/', '\\']) {
            return invalid("cache_version must be a non-empty path segment");
        }
        if self.network_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return invalid("network_timeout_ms and request_timeout_ms must be positive");
        }
        if self.queue.max_concurrent == 0 {
            return invalid("queue.max_concurrent must be at least 1");
        }
        if self.memory.max_entries == 0 || self.memory.max_bytes == 0 {
            return invalid("memory cache bounds must be positive");
        }
        if self.memory.base_ttl_ms == 0 {
            return invalid("memory.base_ttl_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.memory.pressure_threshold)
            || !(0.0..=1.0).contains(&self.memory.pressure_evict_fraction)
        {
            return invalid("memory pressure settings must be within 0..=1");
        }
        for class in ResourceClass::ALL {
            if self.partitions.for_class(class).ttl_secs == 0 {
                return invalid("partition ttl_secs must be positive");
            }
        }
        Ok(())
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.queue.max_concurrent = n;
        self
    }

    pub fn with_memory(mut self, memory: MemoryCacheConfig) -> Self {
        self.memory = memory;
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        std::env::remove_var("VANTAGE_CACHE_VERSION");
        std::env::remove_var("VANTAGE_MAX_CONCURRENT");
        std::env::remove_var("VANTAGE_NETWORK_TIMEOUT_MS");

        let config = DeliveryConfig::from_env();
        assert_eq!(config.cache_version, "v1");
        assert_eq!(config.queue.max_concurrent, 4);
        assert_eq!(config.network_timeout(), Duration::from_secs(10));
        assert_eq!(config.scheduler.slice_budget(), Duration::from_millis(3));
    }

    #[test]
    #[serial]
    fn test_config_from_env_overrides() {
        std::env::set_var("VANTAGE_CACHE_VERSION", "v7");
        std::env::set_var("VANTAGE_MAX_CONCURRENT", "6");
        std::env::set_var("VANTAGE_NETWORK_TIMEOUT_MS", "not-a-number");

        let config = DeliveryConfig::from_env();
        assert_eq!(config.cache_version, "v7");
        assert_eq!(config.queue.max_concurrent, 6);
        assert_eq!(config.network_timeout_ms, 10_000);

        std::env::remove_var("VANTAGE_CACHE_VERSION");
        std::env::remove_var("VANTAGE_MAX_CONCURRENT");
        std::env::remove_var("VANTAGE_NETWORK_TIMEOUT_MS");
    }

    #[test]
    fn test_partial_yaml_takes_defaults() {
        let config = DeliveryConfig::from_yaml_str(
            "cache_version: v2\nqueue:\n  max_concurrent: 2\npartitions:\n  image:\n    ttl_secs: 60\n    max_bytes: 1024\n    max_entries: 4\n",
        )
        .unwrap();
        assert_eq!(config.cache_version, "v2");
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.queue.aging_interval_ms, 2_000);
        assert_eq!(config.partitions.image.max_entries, 4);
        assert_eq!(config.partitions.font.ttl_secs, 365 * DAY_SECS);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let err = DeliveryConfig::from_yaml_str("queue:\n  max_concurrent: 0\n").unwrap_err();
        assert!(matches!(err, DeliveryError::Config { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let err = DeliveryConfig::from_yaml_str("network_timeout_ms: 0\n").unwrap_err();
        assert!(matches!(err, DeliveryError::Config { .. }));

        let config = DeliveryConfig::default().with_network_timeout(Duration::from_micros(500));
        assert!(config.validate().is_err());
        assert!(DeliveryConfig::from_yaml_str("request_timeout_ms: 0\n").is_err());
    }

    #[test]
    fn test_validate_checks_builder_values() {
        assert!(DeliveryConfig::default().with_max_concurrent(0).validate().is_err());
        assert!(DeliveryConfig::default().with_max_concurrent(8).validate().is_ok());

        let zero_ttl = MemoryCacheConfig::default().with_base_ttl(Duration::ZERO);
        assert!(DeliveryConfig::default().with_memory(zero_ttl).validate().is_err());

        let memory = MemoryCacheConfig::default()
            .with_limits(16, 4096)
            .with_base_ttl(Duration::from_secs(30));
        let config = DeliveryConfig::default().with_memory(memory);
        assert!(config.validate().is_ok());
        assert_eq!(config.memory.base_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_version_with_separator() {
        let config = DeliveryConfig::default().with_cache_version("v1/../x");
        assert!(config.validate().is_err());
    }
}
