//! Cache strategy engine.
//!
//! Classifies each intercepted request through an ordered [`RouteTable`],
//! then serves it with the class's strategy:
//!
//! - **cache-first**: fresh entry, else network (written back), else any
//!   cached entry, else offline.
//! - **network-first**: network within the timeout (written back), else any
//!   cached entry, else offline.
//! - **stale-while-revalidate**: any cached entry immediately plus a tracked
//!   background refresh; on a miss, one-shot network-first.
//!
//! Only same-origin `GET` requests are intercepted. Network fetches run
//! through the engine's load queue and land in the partitions.

mod classify;
mod engine;
mod partitions;
mod results;

pub use classify::{is_dev_tooling, Classification, Route, RouteTable, DEV_TOOLING_MARKERS, FALLBACK};
pub use engine::{
    CacheStrategyEngine, Disposition, EngineStats, ResponseSource, Served, FOREGROUND_PRIORITY,
    REFRESH_PRIORITY,
};
