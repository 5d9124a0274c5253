use std::collections::VecDeque;

use crate::model::MetricValue;

/// Bounded, most-recent-first run of metric values for one history key
///
/// The front always holds the newest timestamp. Callers reach it only
/// through [`HistoryStore`](super::HistoryStore), which owns the locking.
#[derive(Debug, Clone, Default)]
pub struct HistorySequence {
    entries: VecDeque<MetricValue>,
}

impl HistorySequence {
    /// Create an empty sequence
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Prepend `point` and evict from the back until `len <= cap`
    ///
    /// Returns false, leaving the sequence untouched, when the timestamp is
    /// not positive or not strictly newer than the current front.
    pub fn push_front_and_maintain(&mut self, point: MetricValue, cap: usize) -> bool {
        if point.timestamp <= 0 {
            return false;
        }
        if let Some(front) = self.entries.front() {
            if point.timestamp <= front.timestamp {
                return false;
            }
        }

        self.entries.push_front(point);
        while self.entries.len() > cap {
            self.entries.pop_back();
        }
        true
    }

    /// Number of values held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the sequence holds no values
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate newest first
    pub fn iter(&self) -> impl Iterator<Item = &MetricValue> {
        self.entries.iter()
    }

    /// Values only, newest first
    pub fn values(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.value).collect()
    }

    /// Owned copy, newest first
    pub fn to_vec(&self) -> Vec<MetricValue> {
        self.entries.iter().cloned().collect()
    }
}
