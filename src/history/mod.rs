//! Sharded per-rule metric history
//!
//! Each rule, or each query group of a rule, owns one bounded
//! [`HistorySequence`]. Sequences live in a fixed array of independently
//! locked shards so that evaluating unrelated rules never contends on a
//! single lock. The shard is picked from a stable fingerprint of the rule id
//! and group.

mod sequence;

pub use sequence::HistorySequence;

use parking_lot::RwLock;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hasher;

use crate::model::MetricValue;

/// Number of shards in a default store
pub const DEFAULT_SHARD_COUNT: usize = 256;

/// Default maximum length of a history sequence
pub const DEFAULT_HISTORY_CAP: usize = 10;

/// Stable hash of a history key, used only for routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint a rule's default (ungrouped) history
    pub fn of(rule_id: &str) -> Self {
        Self::of_group(rule_id, "")
    }

    /// Fingerprint the history of one query group of a rule
    ///
    /// Both parts are length-prefixed, so no choice of rule id and group
    /// can alias another pair.
    pub fn of_group(rule_id: &str, group: &str) -> Self {
        // Fixed keys keep fingerprints identical across processes.
        let mut hasher = SipHasher13::new_with_keys(0, 0);
        for part in [rule_id, group] {
            hasher.write_u64(part.len() as u64);
            hasher.write(part.as_bytes());
        }
        Fingerprint(hasher.finish())
    }

    /// Raw hash value
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn shard_index(&self, shard_count: usize) -> usize {
        (self.0 % shard_count as u64) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

type Shard = RwLock<HashMap<Fingerprint, HistorySequence>>;

/// Fixed set of lock-guarded shards holding every history sequence
#[derive(Debug)]
pub struct HistoryStore {
    shards: Vec<Shard>,
}

impl HistoryStore {
    /// Create a store with [`DEFAULT_SHARD_COUNT`] shards
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARD_COUNT)
    }

    /// Create a store with a specific shard count (at least one)
    pub fn with_shards(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard(&self, fingerprint: Fingerprint) -> &Shard {
        &self.shards[fingerprint.shard_index(self.shards.len())]
    }

    /// Prepend `point` to the sequence for `fingerprint`
    ///
    /// Returns false when the point is stale or has a non-positive
    /// timestamp; the sequence is unchanged in that case. A sequence is only
    /// created once a point has been accepted.
    pub fn push(&self, fingerprint: Fingerprint, point: MetricValue, cap: usize) -> bool {
        let mut shard = self.shard(fingerprint).write();
        match shard.get_mut(&fingerprint) {
            Some(sequence) => sequence.push_front_and_maintain(point, cap),
            None => {
                let mut sequence = HistorySequence::new();
                if !sequence.push_front_and_maintain(point, cap) {
                    return false;
                }
                shard.insert(fingerprint, sequence);
                true
            }
        }
    }

    /// Snapshot of the sequence for `fingerprint`, newest first
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Vec<MetricValue>> {
        self.shard(fingerprint)
            .read()
            .get(&fingerprint)
            .map(HistorySequence::to_vec)
    }

    /// Run `f` against the sequence under the shard's read lock
    pub fn with_sequence<R>(
        &self,
        fingerprint: Fingerprint,
        f: impl FnOnce(&HistorySequence) -> R,
    ) -> Option<R> {
        self.shard(fingerprint).read().get(&fingerprint).map(f)
    }

    /// Length of the sequence for `fingerprint` (0 if unknown)
    pub fn len(&self, fingerprint: Fingerprint) -> usize {
        self.with_sequence(fingerprint, HistorySequence::len)
            .unwrap_or(0)
    }

    /// Total number of sequences across all shards
    pub fn tracked_sequences(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(Fingerprint::of("rule-1"), Fingerprint::of("rule-1"));
        assert_ne!(Fingerprint::of("rule-1"), Fingerprint::of("rule-2"));
        assert_eq!(Fingerprint::of("rule-1").to_string().len(), 16);
    }

    #[test]
    fn test_group_fingerprints() {
        assert_eq!(Fingerprint::of("r1"), Fingerprint::of_group("r1", ""));
        assert_ne!(Fingerprint::of("r1"), Fingerprint::of_group("r1", "host-a"));
        // a separator inside the rule id must not alias another group
        assert_ne!(Fingerprint::of("a#b"), Fingerprint::of_group("a", "b"));
        assert_ne!(Fingerprint::of_group("ab", "c"), Fingerprint::of_group("a", "bc"));
    }

    #[test]
    fn test_colliding_labels_keep_separate_histories() {
        let store = HistoryStore::new();
        assert!(store.push(Fingerprint::of("a#b"), MetricValue::new("a#b", 1.0, 100), 10));
        assert!(store.push(Fingerprint::of_group("a", "b"), MetricValue::new("a", 2.0, 100), 10));
        assert_eq!(store.tracked_sequences(), 2);
        assert_eq!(store.get(Fingerprint::of("a#b")).unwrap()[0].value, 1.0);
    }

    #[test]
    fn test_push_and_get() {
        let store = HistoryStore::new();
        let fp = Fingerprint::of("r1");
        assert!(store.get(fp).is_none());

        assert!(store.push(fp, MetricValue::new("r1", 1.0, 100), DEFAULT_HISTORY_CAP));
        assert!(store.push(fp, MetricValue::new("r1", 2.0, 101), DEFAULT_HISTORY_CAP));

        let seq = store.get(fp).unwrap();
        assert_eq!(seq[0].timestamp, 101);
        assert_eq!(seq[1].timestamp, 100);
        assert_eq!(store.len(fp), 2);
        assert_eq!(store.tracked_sequences(), 1);
    }

    #[test]
    fn test_rejected_first_push_creates_nothing() {
        let store = HistoryStore::new();
        let fp = Fingerprint::of("r1");
        assert!(!store.push(fp, MetricValue::new("r1", 1.0, 0), DEFAULT_HISTORY_CAP));
        assert!(store.get(fp).is_none());
        assert_eq!(store.tracked_sequences(), 0);
    }

    #[test]
    fn test_single_shard_store_isolates_keys() {
        let store = HistoryStore::with_shards(1);
        let a = Fingerprint::of("a");
        let b = Fingerprint::of("b");
        assert!(store.push(a, MetricValue::new("a", 1.0, 10), 10));
        assert!(store.push(b, MetricValue::new("b", 1.0, 5), 10));
        assert_eq!(store.len(a), 1);
        assert_eq!(store.len(b), 1);
    }

    #[test]
    fn test_concurrent_rules() {
        let store = Arc::new(HistoryStore::with_shards(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let rule = format!("rule-{}", i);
                    let fp = Fingerprint::of(&rule);
                    for ts in 1..=50 {
                        assert!(store.push(fp, MetricValue::new(rule.as_str(), 0.0, ts), 10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.tracked_sequences(), 8);
        for i in 0..8 {
            let seq = store.get(Fingerprint::of(&format!("rule-{}", i))).unwrap();
            assert_eq!(seq.len(), 10);
            assert_eq!(seq[0].timestamp, 50);
            assert_eq!(seq[9].timestamp, 41);
        }
    }
}
