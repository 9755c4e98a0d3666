//! Bounded window of labeled impressions feeding periodic retraining.
//!
//! Impressions enter labelled "no click"; a later click for the same
//! decision flips the label. Entries are kept in arrival order and the
//! oldest are evicted once capacity is reached.

use adselect_core::types::{FeatureVector, TrainingExample};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
struct HistoryEntry {
    decision_id: Uuid,
    creative_id: String,
    features: FeatureVector,
    clicked: AtomicBool,
    served_at: DateTime<Utc>,
}

impl HistoryEntry {
    fn example(&self) -> TrainingExample {
        TrainingExample::new(self.features.clone(), self.clicked.load(Ordering::Relaxed))
    }
}

pub struct TrainingHistory {
    entries: Mutex<VecDeque<Arc<HistoryEntry>>>,
    by_decision: DashMap<Uuid, Arc<HistoryEntry>>,
    capacity: usize,
}

impl TrainingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(65_536))),
            by_decision: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a served impression. Returns `false` if the decision was
    /// already recorded.
    pub fn record_impression(
        &self,
        decision_id: Uuid,
        creative_id: &str,
        features: FeatureVector,
    ) -> bool {
        let mut entries = self.entries.lock();
        if self.by_decision.contains_key(&decision_id) {
            return false;
        }

        let entry = Arc::new(HistoryEntry {
            decision_id,
            creative_id: creative_id.to_string(),
            features,
            clicked: AtomicBool::new(false),
            served_at: Utc::now(),
        });
        self.by_decision.insert(decision_id, entry.clone());
        entries.push_back(entry);

        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                self.by_decision.remove(&evicted.decision_id);
            }
        }
        true
    }

    /// Label a recorded impression as clicked. Returns `false` when the
    /// decision is unknown or already evicted.
    pub fn mark_click(&self, decision_id: &Uuid) -> bool {
        match self.by_decision.get(decision_id) {
            Some(entry) => {
                entry.clicked.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// The most recent `max_examples` impressions, oldest first.
    pub fn window(&self, max_examples: usize) -> Vec<TrainingExample> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(max_examples);
        entries.iter().skip(skip).map(|e| e.example()).collect()
    }

    /// Served/clicked counts per creative over the retained window.
    ///
    /// Linear in the window size and meant for reporting. The lock is held
    /// only to copy entry handles, not for the scan.
    pub fn creative_summary(&self, creative_id: &str) -> (u64, u64) {
        let entries: Vec<Arc<HistoryEntry>> = self.entries.lock().iter().cloned().collect();
        entries
            .iter()
            .filter(|e| e.creative_id == creative_id)
            .fold((0, 0), |(served, clicked), e| {
                (served + 1, clicked + e.clicked.load(Ordering::Relaxed) as u64)
            })
    }

    pub fn oldest_served_at(&self) -> Option<DateTime<Utc>> {
        self.entries.lock().front().map(|e| e.served_at)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
