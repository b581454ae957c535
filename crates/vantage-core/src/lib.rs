//! Client-side resource delivery: what to serve from cache, what to fetch,
//! and in which order.
//!
//! This crate provides:
//!
//! - A cache strategy engine (cache-first, network-first,
//!   stale-while-revalidate) over an ordered route table
//! - Durable, versioned cache partitions with integrity checks and budgets
//! - A size-, TTL- and priority-bounded in-memory cache with a pressure valve
//! - A time-sliced cooperative scheduler for deferred CPU-bound work
//! - A bounded-concurrency priority load queue with deduplication
//! - An adaptive policy selector driven by network, device and battery signals
//!
//! # Quick Start
//!
//! ```no_run
//! use vantage_core::{DeliveryService, Disposition, ResourceRequest};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = DeliveryService::from_env()?;
//! service.start().await?;
//!
//! let request = ResourceRequest::get("http://localhost:3000/_next/static/app.js")?;
//! if let Disposition::Served(served) = service.engine().handle(&request).await {
//!     println!("{} from {:?}", served.response.status, served.source);
//! }
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `VANTAGE_CACHE_DIR` | Durable partition root (default: `<cache dir>/vantage/partitions`) |
//! | `VANTAGE_CACHE_VERSION` | Active partition version (default: `v1`) |
//! | `VANTAGE_ORIGIN` | Origin whose requests are intercepted (default: `http://localhost:3000`) |
//! | `VANTAGE_NETWORK_TIMEOUT_MS` | Network-first timeout (default: 10000) |
//! | `VANTAGE_MAX_CONCURRENT` | Load queue concurrency (default: 4) |
//! | `VANTAGE_SLICE_BUDGET_MS` | Scheduler time slice (default: 3) |
//! | `VANTAGE_MEMORY_MAX_ENTRIES` | In-memory cache entry bound (default: 500) |
//! | `VANTAGE_MEMORY_MAX_BYTES` | In-memory cache byte bound (default: 50 MiB) |

pub mod config;
pub mod error;
pub mod fetch;
pub mod memory;
pub mod policy;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod strategy;
mod tasks;
pub mod types;

// Re-export main types
pub use config::{
    DeliveryConfig, MemoryCacheConfig, PartitionSpec, PartitionsConfig, QueueConfig,
    SchedulerConfig,
};
pub use error::{DeliveryError, DeliveryResult};
pub use fetch::{Fetcher, HttpFetcher};
pub use memory::{CacheStats, CacheValue, IntelligentCache, SetOptions};
pub use policy::{
    select, EnvironmentSignals, ImageParams, NetworkClass, PolicyContext, PolicySelector,
    PreloadMode, QualityBand,
};
pub use queue::{
    LoadDescriptor, LoadHandle, LoadOutcome, LoadQueue, LoadState, LoadTask, MemoryResults,
    QueueStats, ResultStore,
};
pub use scheduler::{Scheduler, SchedulerStats, TaskHandle};
pub use service::{DeliveryService, ShutdownReport, StartReport};
pub use store::{CacheEntry, Partition, PartitionStore, PartitionUsage};
pub use strategy::{
    CacheStrategyEngine, Classification, Disposition, EngineStats, ResponseSource, Route,
    RouteTable, Served, FOREGROUND_PRIORITY, REFRESH_PRIORITY,
};
pub use types::{
    PriorityTier, RequestMode, ResourceClass, ResourceRequest, Response, Strategy,
};
