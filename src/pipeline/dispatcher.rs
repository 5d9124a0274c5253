//! Non-blocking fan-out of the enriched stream

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::PipelineMetrics;
use crate::model::Document;

/// Result of offering one document to every output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Outputs that accepted the document
    pub delivered: usize,
    /// Outputs that were full and lost their copy
    pub dropped: usize,
}

struct Output {
    name: String,
    tx: mpsc::Sender<Document>,
}

/// Copies every inbound document to each registered output
///
/// A full output loses its copy; the dispatcher never waits for a slow
/// consumer. A closed output is removed.
pub struct Dispatcher {
    outputs: Vec<Output>,
    metrics: Arc<PipelineMetrics>,
}

impl Dispatcher {
    /// Create a dispatcher with no outputs
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            outputs: Vec::new(),
            metrics,
        }
    }

    /// Register an existing sender under `name`
    pub fn add_output(&mut self, name: impl Into<String>, tx: mpsc::Sender<Document>) {
        self.outputs.push(Output {
            name: name.into(),
            tx,
        });
    }

    /// Create a bounded output named `name` and return its receiving end
    pub fn output(&mut self, name: impl Into<String>, capacity: usize) -> mpsc::Receiver<Document> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.add_output(name, tx);
        rx
    }

    /// Names of the live outputs
    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|o| o.name.as_str()).collect()
    }

    /// Offer `doc` to every output without waiting
    pub fn dispatch(&mut self, doc: &Document) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let metrics = &self.metrics;

        self.outputs.retain(|output| match output.tx.try_send(doc.clone()) {
            Ok(()) => {
                outcome.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                outcome.dropped += 1;
                metrics.record_dispatch_drop(&output.name);
                warn!(output = %output.name, "Output full, dropping document");
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!(output = %output.name, "Output closed, removing it");
                false
            }
        });

        metrics.documents_dispatched.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    /// Fan out `inbound` until it closes or shutdown is signalled
    ///
    /// Returning drops every output sender, so consumers see end-of-stream.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Document>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(outputs = ?self.output_names(), "Dispatcher started");

        loop {
            tokio::select! {
                doc = inbound.recv() => match doc {
                    Some(doc) => {
                        self.dispatch(&doc);
                    }
                    None => {
                        debug!("Dispatcher inbound closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    while let Ok(doc) = inbound.try_recv() {
                        self.dispatch(&doc);
                    }
                    break;
                }
            }
        }

        info!("Dispatcher stopped");
    }
}
