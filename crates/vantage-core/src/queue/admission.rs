//! Admission order: highest effective priority first, FIFO among equals.

use std::time::{Duration, Instant};

use super::Pending;

/// Declared priority plus one point per full `aging` interval waited.
pub(crate) fn effective_priority(priority: u32, waited: Duration, aging: Duration) -> u64 {
    let boost = waited.as_millis() / aging.as_millis().max(1);
    u64::from(priority).saturating_add(u64::try_from(boost).unwrap_or(u64::MAX))
}

/// Index of the next task to admit, if any is admissible.
pub(crate) fn pick_next(
    pending: &[Pending],
    now: Instant,
    aging: Duration,
    critical_only: bool,
) -> Option<usize> {
    pending
        .iter()
        .enumerate()
        .filter(|(_, p)| !critical_only || p.descriptor.critical)
        .max_by(|(_, a), (_, b)| {
            let ea = effective_priority(
                a.descriptor.priority,
                now.saturating_duration_since(a.enqueued_at),
                aging,
            );
            let eb = effective_priority(
                b.descriptor.priority,
                now.saturating_duration_since(b.enqueued_at),
                aging,
            );
            // Lower sequence wins ties, so reverse it.
            ea.cmp(&eb).then_with(|| b.seq.cmp(&a.seq))
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::LoadDescriptor;
    use crate::types::ResourceRequest;

    fn pending(name: &str, priority: u32, seq: u64, enqueued_at: Instant) -> Pending {
        let request = ResourceRequest::get(&format!("https://site.dev/{name}")).unwrap();
        Pending {
            key: request.key(),
            descriptor: LoadDescriptor::new(request, priority),
            seq,
            enqueued_at,
        }
    }

    #[test]
    fn test_effective_priority_ages() {
        let aging = Duration::from_secs(2);
        assert_eq!(effective_priority(3, Duration::from_millis(1_999), aging), 3);
        assert_eq!(effective_priority(3, Duration::from_secs(2), aging), 4);
        assert_eq!(effective_priority(3, Duration::from_secs(9), aging), 7);
    }

    #[test]
    fn test_highest_priority_wins() {
        let now = Instant::now();
        let queue = vec![pending("a", 5, 0, now), pending("b", 9, 1, now)];
        assert_eq!(pick_next(&queue, now, Duration::from_secs(2), false), Some(1));
    }

    #[test]
    fn test_ties_go_to_earliest() {
        let now = Instant::now();
        let queue = vec![
            pending("a", 5, 3, now),
            pending("b", 5, 1, now),
            pending("c", 5, 2, now),
        ];
        assert_eq!(pick_next(&queue, now, Duration::from_secs(2), false), Some(1));
    }

    #[test]
    fn test_long_wait_overtakes_fresh_high_priority() {
        let now = Instant::now();
        let old = now.checked_sub(Duration::from_secs(20)).unwrap_or(now);
        let queue = vec![pending("starved", 1, 0, old), pending("fresh", 5, 1, now)];
        assert_eq!(pick_next(&queue, now, Duration::from_secs(2), false), Some(0));
    }

    #[test]
    fn test_critical_only_filter() {
        let now = Instant::now();
        let mut critical = pending("css", 1, 1, now);
        critical.descriptor.critical = true;
        let queue = vec![pending("img", 9, 0, now), critical];

        assert_eq!(pick_next(&queue, now, Duration::from_secs(2), true), Some(1));
        assert_eq!(pick_next(&queue[..1], now, Duration::from_secs(2), true), None);
        assert_eq!(pick_next(&[], now, Duration::from_secs(2), false), None);
    }
}
