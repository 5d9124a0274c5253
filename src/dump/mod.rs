//! Bulk dump of the document stream to a search backend
//!
//! Documents are encoded into bulk actions as they arrive and appended to
//! an in-memory buffer. Every tick the buffer is handed to a detached
//! flush task and reset, so a slow backend never stalls the stream. The
//! number of concurrent flushes is bounded; once every permit is taken a
//! tick's batch is dropped instead of queueing behind the backend.

mod encode;
mod sink;

pub use encode::{encode_bulk, index_name, EncodeError};
pub use sink::{BulkSink, HttpBulkSink};

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EsDumpConfig;
use crate::error::ErrorKind;
use crate::metrics::PipelineMetrics;
use crate::model::Document;
use crate::shutdown::InflightTracker;

/// Buffers encoded documents and flushes them on a fixed cadence
pub struct BulkDumper {
    sink: Arc<dyn BulkSink>,
    index_prefix: String,
    index_suffix: String,
    interval: Duration,
    drain_timeout: Duration,
    buffer: String,
    buffered_docs: usize,
    permits: Arc<Semaphore>,
    inflight: Arc<InflightTracker>,
    metrics: Arc<PipelineMetrics>,
}

impl BulkDumper {
    /// Create a dumper writing through `sink`
    pub fn new(sink: Arc<dyn BulkSink>, config: &EsDumpConfig, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            sink,
            index_prefix: config.index_prefix.clone(),
            index_suffix: config.index_suffix.clone(),
            interval: config.interval(),
            drain_timeout: config.drain_timeout(),
            buffer: String::new(),
            buffered_docs: 0,
            permits: Arc::new(Semaphore::new(config.max_inflight_flushes.max(1))),
            inflight: Arc::new(InflightTracker::new()),
            metrics,
        }
    }

    /// Encode `doc` and append it to the buffer
    ///
    /// Returns false when the document cannot be encoded; it is dropped.
    pub fn push(&mut self, doc: &str) -> bool {
        match encode_bulk(doc, &self.index_prefix, &self.index_suffix, Utc::now()) {
            Ok(bulk) => {
                self.buffer.push_str(&bulk);
                self.buffered_docs += 1;
                self.metrics.documents_encoded.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.metrics.encode_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_error(ErrorKind::Data);
                debug!("Dropping document from dump: {}", e);
                false
            }
        }
    }

    /// Documents waiting for the next tick
    pub fn buffered_docs(&self) -> usize {
        self.buffered_docs
    }

    /// Bytes waiting for the next tick
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Flushes currently running
    pub fn inflight_flushes(&self) -> usize {
        self.inflight.inflight_count()
    }

    /// Hand the buffer to a detached flush task and reset it
    ///
    /// Returns the task handle, or `None` when the buffer was empty or the
    /// batch was dropped because every flush permit is taken.
    pub fn tick(&mut self) -> Option<JoinHandle<()>> {
        if self.buffer.is_empty() {
            return None;
        }

        let body = std::mem::take(&mut self.buffer);
        let docs = std::mem::replace(&mut self.buffered_docs, 0);

        let permit = match self.permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.metrics.flushes_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    docs,
                    bytes = body.len(),
                    "Too many flushes in flight, dropping bulk batch"
                );
                return None;
            }
        };

        self.metrics.flushes_started.fetch_add(1, Ordering::Relaxed);
        self.inflight.add_inflight();

        let sink = self.sink.clone();
        let inflight = self.inflight.clone();
        let metrics = self.metrics.clone();
        Some(tokio::spawn(async move {
            let _permit = permit;
            let bytes = body.len();
            match sink.flush(body).await {
                Ok(()) => debug!(docs, bytes, sink = sink.name(), "Bulk flush complete"),
                Err(e) => {
                    metrics.flushes_failed.fetch_add(1, Ordering::Relaxed);
                    metrics.record_error(e.kind());
                    warn!(docs, bytes, sink = sink.name(), "Bulk flush failed: {}", e);
                }
            }
            inflight.remove_inflight();
        }))
    }

    /// Buffer `inbound` and flush every interval until it closes or shutdown
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Document>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;
        info!(interval = ?self.interval, sink = self.sink.name(), "Bulk dumper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                doc = inbound.recv() => match doc {
                    Some(doc) => {
                        self.push(&doc);
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    while let Ok(doc) = inbound.try_recv() {
                        self.push(&doc);
                    }
                    break;
                }
            }
        }

        self.tick();
        if let Err(e) = self.inflight.wait_for_completion(self.drain_timeout).await {
            warn!("Bulk dumper stopped with flushes outstanding: {}", e);
        }
        info!("Bulk dumper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct RecordingSink {
        bodies: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BulkSink for RecordingSink {
        async fn flush(&self, body: String) -> crate::Result<()> {
            self.bodies.lock().push(body);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn doc(guid: &str) -> String {
        format!(
            r#"{{"type":"t","guid":"{}","kafka":{{"topic":"k"}}}}"#,
            guid
        )
    }

    #[tokio::test]
    async fn test_push_and_tick() {
        let sink = Arc::new(RecordingSink::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let mut dumper = BulkDumper::new(sink.clone(), &EsDumpConfig::default(), metrics.clone());

        assert!(dumper.tick().is_none());
        assert!(dumper.push(&doc("a")));
        assert!(!dumper.push("{}"));
        assert!(dumper.push(&doc("b")));
        assert_eq!(dumper.buffered_docs(), 2);

        dumper.tick().unwrap().await.unwrap();
        assert_eq!(dumper.buffered_bytes(), 0);

        let bodies = sink.bodies.lock();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].lines().count(), 4);
        assert_eq!(metrics.snapshot().encode_failures, 1);
        assert_eq!(metrics.snapshot().flushes_started, 1);
    }
}
