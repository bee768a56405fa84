// =============================================================================
// Audit Trail — Weight adjustments and ingested prediction ids
// =============================================================================
//
// Two bounded buffers owned by the engine state:
//   - the most recent weight adjustments, oldest evicted first
//   - the most recent prediction ids, used to reject replayed outcomes
// =============================================================================

use std::collections::{HashSet, VecDeque};

use parking_lot::RwLock;

use crate::health::WeightAdjustment;

/// Maximum number of recent weight adjustments to retain.
pub const MAX_RECENT_ADJUSTMENTS: usize = 100;
/// Maximum number of prediction ids remembered for replay detection.
pub const MAX_RECENT_PREDICTION_IDS: usize = 1000;

// =============================================================================
// AdjustmentLog
// =============================================================================

pub struct AdjustmentLog {
    entries: RwLock<Vec<WeightAdjustment>>,
    capacity: usize,
}

impl Default for AdjustmentLog {
    fn default() -> Self {
        Self::new(MAX_RECENT_ADJUSTMENTS)
    }
}

impl AdjustmentLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    /// Append adjustments; the oldest are evicted past capacity.
    pub fn extend(&self, adjustments: &[WeightAdjustment]) {
        if adjustments.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        entries.extend_from_slice(adjustments);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
    }

    /// Newest last.
    pub fn recent(&self) -> Vec<WeightAdjustment> {
        self.entries.read().clone()
    }
}

// =============================================================================
// RecentIds
// =============================================================================

#[derive(Default)]
struct IdWindow {
    order: VecDeque<String>,
    members: HashSet<String>,
}

/// Bounded set of recently seen prediction ids.
pub struct RecentIds {
    inner: RwLock<IdWindow>,
    capacity: usize,
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(MAX_RECENT_PREDICTION_IDS)
    }
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(IdWindow::default()),
            capacity: capacity.max(1),
        }
    }

    /// Remember `id`.  Returns false if it was already in the window.
    pub fn insert(&self, id: &str) -> bool {
        let mut w = self.inner.write();
        if w.members.contains(id) {
            return false;
        }
        w.order.push_back(id.to_string());
        w.members.insert(id.to_string());
        while w.order.len() > self.capacity {
            if let Some(old) = w.order.pop_front() {
                w.members.remove(&old);
            }
        }
        true
    }

    /// Forget `id` (used when ingestion fails after the id was claimed).
    pub fn remove(&self, id: &str) {
        let mut w = self.inner.write();
        if w.members.remove(id) {
            w.order.retain(|x| x != id);
        }
    }

    /// Oldest first.
    pub fn ids(&self) -> Vec<String> {
        self.inner.read().order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalSource;
    use crate::types::Timeframe;

    fn adj(i: usize) -> WeightAdjustment {
        WeightAdjustment {
            timeframe: Timeframe::H1,
            source: SignalSource::Rsi,
            old_weight: i as f64,
            new_weight: i as f64 + 1.0,
            cause: "test".into(),
            at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn adjustment_log_is_capped() {
        let log = AdjustmentLog::new(3);
        let batch: Vec<_> = (0..5).map(adj).collect();
        log.extend(&batch);
        let recent = log.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].old_weight, 2.0);
        assert_eq!(recent[2].old_weight, 4.0);
    }

    #[test]
    fn recent_ids_reject_duplicates_and_evict() {
        let ids = RecentIds::new(2);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        assert_eq!(ids.len(), 2);
        // "a" was evicted, so it is accepted again.
        assert!(ids.insert("a"));
        assert_eq!(ids.ids(), vec!["c".to_string(), "a".to_string()]);
    }

    #[test]
    fn removed_id_can_be_reused() {
        let ids = RecentIds::default();
        ids.insert("x");
        ids.remove("x");
        assert!(ids.is_empty());
        assert!(ids.insert("x"));
    }
}
