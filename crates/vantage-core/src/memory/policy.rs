//! Priority inference, TTL scaling and eviction order.

use std::time::Duration;

use crate::types::PriorityTier;

/// Payloads above this size default to low priority.
pub const LARGE_PAYLOAD_BYTES: usize = 1024 * 1024;

const HIGH_PRIORITY_MARKERS: [&str; 2] = ["critical", "vendor"];

/// Key markers win over payload size.
pub fn infer_priority(key: &str, size_bytes: usize) -> PriorityTier {
    let key = key.to_ascii_lowercase();
    if HIGH_PRIORITY_MARKERS.iter().any(|m| key.contains(m)) {
        PriorityTier::High
    } else if size_bytes > LARGE_PAYLOAD_BYTES {
        PriorityTier::Low
    } else {
        PriorityTier::Medium
    }
}

pub fn scaled_ttl(base: Duration, priority: PriorityTier) -> Duration {
    match priority {
        PriorityTier::High | PriorityTier::Critical => base.saturating_mul(2),
        PriorityTier::Low => base / 2,
        PriorityTier::Medium => base,
    }
}

/// Sort key: lowest priority first, then least recently used.
pub(crate) fn eviction_rank(priority: PriorityTier, last_access_tick: u64) -> (PriorityTier, u64) {
    (priority, last_access_tick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_markers_are_high_priority() {
        assert_eq!(infer_priority("chunk-vendor.js", 10), PriorityTier::High);
        assert_eq!(infer_priority("CRITICAL-css", 10), PriorityTier::High);
        assert_eq!(
            infer_priority("vendor-bundle", LARGE_PAYLOAD_BYTES + 1),
            PriorityTier::High
        );
    }

    #[test]
    fn test_large_payload_is_low_priority() {
        assert_eq!(infer_priority("hero", LARGE_PAYLOAD_BYTES + 1), PriorityTier::Low);
        assert_eq!(infer_priority("hero", LARGE_PAYLOAD_BYTES), PriorityTier::Medium);
    }

    #[test]
    fn test_ttl_scaling() {
        let base = Duration::from_secs(60);
        assert_eq!(scaled_ttl(base, PriorityTier::High), Duration::from_secs(120));
        assert_eq!(scaled_ttl(base, PriorityTier::Critical), Duration::from_secs(120));
        assert_eq!(scaled_ttl(base, PriorityTier::Medium), base);
        assert_eq!(scaled_ttl(base, PriorityTier::Low), Duration::from_secs(30));
    }

    #[test]
    fn test_eviction_rank_orders_priority_before_recency() {
        let old_high = eviction_rank(PriorityTier::High, 1);
        let new_low = eviction_rank(PriorityTier::Low, 99);
        assert!(new_low < old_high);
    }
}
