//! Per-creative impression/click counters backed by DashMap for lock-free
//! concurrent access.
//!
//! Each creative owns its own pair of atomics, so outcome recording for one
//! creative never serializes behind another. Entries appear on first
//! observation and leave only through [`PerformanceStore::retire`].

use adselect_core::types::CreativeStats;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
struct Counters {
    impressions: AtomicU64,
    clicks: AtomicU64,
}

impl Counters {
    // Clicks are read before impressions. Every click recorded together with
    // its impression bumped `impressions` first, so the later load can only
    // be larger. The clamp covers stand-alone click events that overtook
    // their impression.
    fn snapshot(&self) -> CreativeStats {
        let clicks = self.clicks.load(Ordering::SeqCst);
        let impressions = self.impressions.load(Ordering::SeqCst);
        CreativeStats {
            impressions,
            clicks: clicks.min(impressions),
        }
    }
}

pub struct PerformanceStore {
    entries: DashMap<String, Counters>,
}

impl PerformanceStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Count one served impression, and its click if `did_click`.
    pub fn record_outcome(&self, creative_id: &str, did_click: bool) {
        self.with_counters(creative_id, |c| {
            c.impressions.fetch_add(1, Ordering::SeqCst);
            if did_click {
                c.clicks.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    pub fn record_impression(&self, creative_id: &str) {
        self.record_outcome(creative_id, false);
    }

    /// Count a click reported separately from its impression.
    pub fn record_click(&self, creative_id: &str) {
        self.with_counters(creative_id, |c| {
            c.clicks.fetch_add(1, Ordering::SeqCst);
        });
    }

    /// Consistent copy of one creative's counters. Unknown ids read as zero.
    pub fn snapshot(&self, creative_id: &str) -> CreativeStats {
        self.entries
            .get(creative_id)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    pub fn snapshot_all(&self) -> Vec<(String, CreativeStats)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }

    /// Drop a permanently retired creative's counters. Returns the final
    /// counts if the creative was known.
    pub fn retire(&self, creative_id: &str) -> Option<CreativeStats> {
        let (_, counters) = self.entries.remove(creative_id)?;
        metrics::counter!("stats.retired").increment(1);
        let stats = counters.snapshot();
        debug!(
            creative_id,
            impressions = stats.impressions,
            clicks = stats.clicks,
            "Creative stats retired"
        );
        Some(stats)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn with_counters<R>(&self, creative_id: &str, f: impl FnOnce(&Counters) -> R) -> R {
        if let Some(counters) = self.entries.get(creative_id) {
            return f(&counters);
        }
        let counters = self.entries.entry(creative_id.to_string()).or_default();
        f(&counters)
    }
}

impl Default for PerformanceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_creative_reads_zero() {
        let store = PerformanceStore::new();
        assert_eq!(store.snapshot("nope"), CreativeStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_record_outcome() {
        let store = PerformanceStore::new();
        store.record_outcome("cr-1", false);
        store.record_outcome("cr-1", true);
        store.record_impression("cr-1");

        assert_eq!(
            store.snapshot("cr-1"),
            CreativeStats {
                impressions: 3,
                clicks: 1
            }
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_outcomes_sum_exactly() {
        let store = PerformanceStore::new();
        let threads = 8u64;
        let per_thread = 5_000u64;

        std::thread::scope(|scope| {
            for t in 0..threads {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        // every third event of odd threads is a click
                        store.record_outcome("hot", t % 2 == 1 && i % 3 == 0);
                    }
                });
            }
        });

        let expected_clicks = (threads / 2) * per_thread.div_ceil(3);
        assert_eq!(
            store.snapshot("hot"),
            CreativeStats {
                impressions: threads * per_thread,
                clicks: expected_clicks
            }
        );
    }

    #[test]
    fn test_separate_click_events_reconcile() {
        let store = PerformanceStore::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..1_000 {
                    store.record_impression("cr");
                }
            });
            scope.spawn(|| {
                for _ in 0..400 {
                    store.record_click("cr");
                }
            });
            scope.spawn(|| {
                for _ in 0..1_000 {
                    let s = store.snapshot("cr");
                    assert!(s.clicks <= s.impressions, "{s:?}");
                }
            });
        });
        assert_eq!(
            store.snapshot("cr"),
            CreativeStats {
                impressions: 1_000,
                clicks: 400
            }
        );
    }

    #[test]
    fn test_snapshot_never_exceeds_impressions_under_load() {
        let store = PerformanceStore::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        store.record_outcome("cr", true);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..10_000 {
                    let s = store.snapshot("cr");
                    assert!(s.clicks <= s.impressions);
                }
            });
        });
    }

    #[test]
    fn test_retire() {
        let store = PerformanceStore::new();
        store.record_outcome("old", true);
        store.record_outcome("keep", false);

        let last = store.retire("old").unwrap();
        assert_eq!(last.clicks, 1);
        assert!(store.retire("old").is_none());
        assert_eq!(store.snapshot("old"), CreativeStats::default());

        let all = store.snapshot_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "keep");
    }
}
