//! Property tests for the sharded metric history

use alertflow::history::{Fingerprint, HistoryStore};
use alertflow::MetricValue;
use proptest::prelude::*;

fn point(value: f64, timestamp: i64) -> MetricValue {
    MetricValue::new("rule", value, timestamp)
}

proptest! {
    #[test]
    fn history_is_strictly_newest_first(timestamps in prop::collection::vec(-5i64..200, 0..64), cap in 1usize..16) {
        let store = HistoryStore::new();
        let fp = Fingerprint::of("rule");

        for ts in &timestamps {
            store.push(fp, point(*ts as f64, *ts), cap);
        }

        let history = store.get(fp).unwrap_or_default();
        prop_assert!(history.len() <= cap);
        for pair in history.windows(2) {
            prop_assert!(pair[0].timestamp > pair[1].timestamp);
        }
        for p in &history {
            prop_assert!(p.timestamp > 0);
        }
    }

    #[test]
    fn accepted_push_becomes_front(start in 1i64..1000, steps in prop::collection::vec(1i64..50, 1..40), cap in 1usize..12) {
        let store = HistoryStore::new();
        let fp = Fingerprint::of("rule");
        let mut ts = start;

        for step in steps {
            ts += step;
            prop_assert!(store.push(fp, point(1.0, ts), cap));
            let history = store.get(fp).unwrap();
            prop_assert_eq!(history[0].timestamp, ts);
            prop_assert!(history.len() <= cap);
        }
    }

    #[test]
    fn stale_push_leaves_history_untouched(newest in 10i64..1000, stale_offset in 0i64..10) {
        let store = HistoryStore::new();
        let fp = Fingerprint::of("rule");
        store.push(fp, point(1.0, newest - 5), 10);
        store.push(fp, point(2.0, newest), 10);
        let before = store.get(fp).unwrap();

        prop_assert!(!store.push(fp, point(9.0, newest - stale_offset), 10));
        prop_assert_eq!(store.get(fp).unwrap(), before);
    }
}

#[test]
fn test_groups_are_independent_keys() {
    let store = HistoryStore::with_shards(4);
    let plain = Fingerprint::of("cpu");
    let grouped = Fingerprint::of_group("cpu", "host-a");
    assert_ne!(plain, grouped);

    assert!(store.push(plain, point(1.0, 100), 10));
    assert!(store.push(grouped, point(2.0, 100), 10));
    assert_eq!(store.tracked_sequences(), 2);
    assert_eq!(store.len(plain), 1);
    assert_eq!(store.len(grouped), 1);
}

#[test]
fn test_concurrent_pushes_keep_ordering() {
    let store = std::sync::Arc::new(HistoryStore::new());
    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = store.clone();
            std::thread::spawn(move || {
                let fp = Fingerprint::of(&format!("rule-{}", worker));
                for ts in 1..=100 {
                    store.push(fp, point(ts as f64, ts), 10);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for worker in 0..4 {
        let history = store.get(Fingerprint::of(&format!("rule-{}", worker))).unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].timestamp, 100);
        assert_eq!(history[9].timestamp, 91);
    }
}
