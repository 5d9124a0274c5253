//! Shutdown signalling and in-flight work tracking

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

/// Create the shutdown signal shared by every pipeline task
///
/// Tasks hold a receiver and leave their loop once the value turns `true`
/// (or the sender is dropped).
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Tracks detached work that must finish before a task may exit
#[derive(Debug)]
pub struct InflightTracker {
    /// Number of in-flight operations
    inflight: AtomicUsize,
}

impl InflightTracker {
    /// Create a tracker with nothing in flight
    pub fn new() -> Self {
        Self {
            inflight: AtomicUsize::new(0),
        }
    }

    /// Register one in-flight operation
    pub fn add_inflight(&self) {
        let count = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(inflight = count, "In-flight operation started");
    }

    /// Release one in-flight operation
    pub fn remove_inflight(&self) {
        let previous = self
            .inflight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if previous > 0 {
            debug!(inflight = previous - 1, "In-flight operation finished");
        }
    }

    /// Current in-flight count
    pub fn inflight_count(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Wait until nothing is in flight, or fail after `timeout`
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<(), String> {
        let start = Instant::now();
        let deadline = start + timeout;

        while self.inflight_count() > 0 {
            if Instant::now() > deadline {
                return Err(format!(
                    "Shutdown timeout with {} operations still in flight",
                    self.inflight_count()
                ));
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        info!("In-flight work drained in {:?}", start.elapsed());
        Ok(())
    }
}

impl Default for InflightTracker {
    fn default() -> Self {
        Self::new()
    }
}
