//! # Generation Filter
//!
//! Status writes do not bump `generation`. Forwarding only generation changes
//! and deletion transitions keeps a reconciler's own status writes from
//! triggering it again.

use crate::store::ObjectKey;
use std::collections::HashMap;

/// Whether a watch event should reach the work queue
#[must_use]
pub fn should_dispatch(
    old_generation: Option<i64>,
    new_generation: Option<i64>,
    deletion_timestamp_changed: bool,
) -> bool {
    deletion_timestamp_changed || old_generation != new_generation
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Forwarded {
    generation: Option<i64>,
    deleting: bool,
}

/// Last forwarded state per key
#[derive(Debug, Default)]
pub struct GenerationTracker {
    forwarded: HashMap<ObjectKey, Forwarded>,
}

impl GenerationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter a watch event; records the state when it is forwarded
    pub fn observe(&mut self, key: &ObjectKey, generation: Option<i64>, deleting: bool) -> bool {
        let dispatch = match self.forwarded.get(key) {
            None => true,
            Some(last) => should_dispatch(last.generation, generation, last.deleting != deleting),
        };
        if dispatch {
            self.record(key, generation, deleting);
        }
        dispatch
    }

    /// Record a state forwarded unconditionally (resync)
    pub fn record(&mut self, key: &ObjectKey, generation: Option<i64>, deleting: bool) {
        self.forwarded
            .insert(key.clone(), Forwarded { generation, deleting });
    }

    pub fn forget(&mut self, key: &ObjectKey) {
        self.forwarded.remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.forwarded.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forwarded.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_dispatch() {
        assert!(!should_dispatch(Some(3), Some(3), false), "status-only change");
        assert!(should_dispatch(Some(3), Some(4), false), "spec change");
        assert!(should_dispatch(Some(3), Some(3), true), "deletion requested");
        assert!(should_dispatch(None, Some(1), false), "first sighting");
    }

    #[test]
    fn test_tracker_filters_status_churn() {
        let mut tracker = GenerationTracker::new();
        let key = ObjectKey::new("Team", None, "t1");

        assert!(tracker.observe(&key, Some(1), false));
        assert!(!tracker.observe(&key, Some(1), false));
        assert!(tracker.observe(&key, Some(2), false));
        assert!(tracker.observe(&key, Some(2), true));
        assert!(!tracker.observe(&key, Some(2), true));

        tracker.forget(&key);
        assert!(tracker.is_empty());
        assert!(tracker.observe(&key, Some(2), true));
    }

    #[test]
    fn test_resync_record_sets_baseline() {
        let mut tracker = GenerationTracker::new();
        let key = ObjectKey::new("Team", None, "t1");
        tracker.record(&key, Some(5), false);
        assert!(!tracker.observe(&key, Some(5), false));
        assert_eq!(tracker.len(), 1);
    }
}
