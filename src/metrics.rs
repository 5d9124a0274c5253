//! Pipeline metrics collection

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ErrorKind;

/// Counters shared by every pipeline task
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Raw records read from a source
    pub documents_received: AtomicU64,
    /// Records that passed enrichment
    pub documents_enriched: AtomicU64,
    /// Records dropped by enrichment
    pub enrichment_failures: AtomicU64,
    /// Records handed to the dispatcher
    pub documents_dispatched: AtomicU64,
    /// Alert ticks evaluated
    pub alert_ticks: AtomicU64,
    /// Rule evaluations performed
    pub rules_evaluated: AtomicU64,
    /// Metric points accepted into history
    pub points_accepted: AtomicU64,
    /// Metric points rejected as stale
    pub points_rejected: AtomicU64,
    /// Events handed to the sink
    pub events_emitted: AtomicU64,
    /// Events the sink failed to accept
    pub emit_failures: AtomicU64,
    /// Rules abandoned mid-tick
    pub rule_failures: AtomicU64,
    /// Documents encoded into bulk actions
    pub documents_encoded: AtomicU64,
    /// Documents that failed bulk encoding
    pub encode_failures: AtomicU64,
    /// Flush tasks launched
    pub flushes_started: AtomicU64,
    /// Flush tasks that failed
    pub flushes_failed: AtomicU64,
    /// Batches dropped because too many flushes were in flight
    pub flushes_dropped: AtomicU64,
    /// Successful rule table refreshes
    pub sync_successes: AtomicU64,
    /// Failed rule table refreshes
    pub sync_failures: AtomicU64,
    /// Drops per dispatcher output
    dispatch_drops: RwLock<HashMap<String, u64>>,
    /// Error counts by kind
    error_counts: RwLock<HashMap<&'static str, u64>>,
    start_time: Instant,
}

/// Point-in-time view of [`PipelineMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Seconds since the metrics were created
    pub uptime_secs: u64,
    /// Raw records read from a source
    pub documents_received: u64,
    /// Records that passed enrichment
    pub documents_enriched: u64,
    /// Records dropped by enrichment
    pub enrichment_failures: u64,
    /// Records handed to the dispatcher
    pub documents_dispatched: u64,
    /// Drops per dispatcher output
    pub dispatch_drops: BTreeMap<String, u64>,
    /// Alert ticks evaluated
    pub alert_ticks: u64,
    /// Rule evaluations performed
    pub rules_evaluated: u64,
    /// Metric points accepted into history
    pub points_accepted: u64,
    /// Metric points rejected as stale
    pub points_rejected: u64,
    /// Events handed to the sink
    pub events_emitted: u64,
    /// Events the sink failed to accept
    pub emit_failures: u64,
    /// Rules abandoned mid-tick
    pub rule_failures: u64,
    /// Documents encoded into bulk actions
    pub documents_encoded: u64,
    /// Documents that failed bulk encoding
    pub encode_failures: u64,
    /// Flush tasks launched
    pub flushes_started: u64,
    /// Flush tasks that failed
    pub flushes_failed: u64,
    /// Batches dropped at the flush permit pool
    pub flushes_dropped: u64,
    /// Successful rule table refreshes
    pub sync_successes: u64,
    /// Failed rule table refreshes
    pub sync_failures: u64,
    /// Error counts by kind
    pub errors: BTreeMap<String, u64>,
}

fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineMetrics {
    /// Create a zeroed collector
    pub fn new() -> Self {
        Self {
            documents_received: AtomicU64::new(0),
            documents_enriched: AtomicU64::new(0),
            enrichment_failures: AtomicU64::new(0),
            documents_dispatched: AtomicU64::new(0),
            alert_ticks: AtomicU64::new(0),
            rules_evaluated: AtomicU64::new(0),
            points_accepted: AtomicU64::new(0),
            points_rejected: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            emit_failures: AtomicU64::new(0),
            rule_failures: AtomicU64::new(0),
            documents_encoded: AtomicU64::new(0),
            encode_failures: AtomicU64::new(0),
            flushes_started: AtomicU64::new(0),
            flushes_failed: AtomicU64::new(0),
            flushes_dropped: AtomicU64::new(0),
            sync_successes: AtomicU64::new(0),
            sync_failures: AtomicU64::new(0),
            dispatch_drops: RwLock::new(HashMap::new()),
            error_counts: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Record a raw record read from a source
    pub fn increment_received(&self) {
        incr(&self.documents_received);
    }

    /// Record a successful enrichment
    pub fn increment_enriched(&self) {
        incr(&self.documents_enriched);
    }

    /// Record an enrichment failure
    pub fn increment_enrichment_failure(&self) {
        incr(&self.enrichment_failures);
    }

    /// Record a dispatched document
    pub fn increment_dispatched(&self) {
        incr(&self.documents_dispatched);
    }

    /// Record a dropped copy for one dispatcher output
    pub fn record_dispatch_drop(&self, output: &str) {
        let mut drops = self.dispatch_drops.write();
        *drops.entry(output.to_string()).or_insert(0) += 1;
    }

    /// Drops recorded for one dispatcher output
    pub fn dispatch_drops(&self, output: &str) -> u64 {
        self.dispatch_drops.read().get(output).copied().unwrap_or(0)
    }

    /// Record an error by kind
    pub fn record_error(&self, kind: ErrorKind) {
        let mut errors = self.error_counts.write();
        *errors.entry(kind.as_str()).or_insert(0) += 1;
    }

    /// Errors recorded for one kind
    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_counts
            .read()
            .get(kind.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Take a consistent-enough snapshot of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            documents_received: load(&self.documents_received),
            documents_enriched: load(&self.documents_enriched),
            enrichment_failures: load(&self.enrichment_failures),
            documents_dispatched: load(&self.documents_dispatched),
            dispatch_drops: self
                .dispatch_drops
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            alert_ticks: load(&self.alert_ticks),
            rules_evaluated: load(&self.rules_evaluated),
            points_accepted: load(&self.points_accepted),
            points_rejected: load(&self.points_rejected),
            events_emitted: load(&self.events_emitted),
            emit_failures: load(&self.emit_failures),
            rule_failures: load(&self.rule_failures),
            documents_encoded: load(&self.documents_encoded),
            encode_failures: load(&self.encode_failures),
            flushes_started: load(&self.flushes_started),
            flushes_failed: load(&self.flushes_failed),
            flushes_dropped: load(&self.flushes_dropped),
            sync_successes: load(&self.sync_successes),
            sync_failures: load(&self.sync_failures),
            errors: self
                .error_counts
                .read()
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that logs a metrics summary every `interval`
pub fn spawn_metrics_reporter(
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let s = metrics.snapshot();
                    let dropped: u64 = s.dispatch_drops.values().sum();
                    info!(
                        received = s.documents_received,
                        enriched = s.documents_enriched,
                        dispatched = s.documents_dispatched,
                        dropped,
                        ticks = s.alert_ticks,
                        events = s.events_emitted,
                        emit_failures = s.emit_failures,
                        encoded = s.documents_encoded,
                        flushes = s.flushes_started,
                        flush_failures = s.flushes_failed,
                        "Pipeline metrics"
                    );
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PipelineMetrics::new();
        metrics.increment_received();
        metrics.increment_received();
        metrics.increment_enriched();
        metrics.record_dispatch_drop("dump");
        metrics.record_dispatch_drop("dump");
        metrics.record_dispatch_drop("alert");
        metrics.record_error(ErrorKind::Transient);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_received, 2);
        assert_eq!(snapshot.documents_enriched, 1);
        assert_eq!(snapshot.dispatch_drops.get("dump"), Some(&2));
        assert_eq!(metrics.dispatch_drops("alert"), 1);
        assert_eq!(metrics.dispatch_drops("unknown"), 0);
        assert_eq!(snapshot.errors.get("transient"), Some(&1));
        assert_eq!(metrics.error_count(ErrorKind::Data), 0);
    }

    #[tokio::test]
    async fn test_reporter_stops_on_shutdown() {
        let metrics = Arc::new(PipelineMetrics::new());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_metrics_reporter(metrics, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
