//! Streaming log alerting
//!
//! `alertflow` ingests a stream of JSON log documents, evaluates a
//! live-reloadable rule set against tumbling batches of that stream, keeps a
//! bounded metric history per rule, applies threshold functions over that
//! history and pushes prioritized alert events to a queue. In parallel the
//! same stream is buffered and flushed in bulk to an Elasticsearch-compatible
//! endpoint.
//!
//! # Example
//!
//! ```no_run
//! use alertflow::{Config, StreamEngine};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .rule_file("rules.yaml")
//!     .redis_url("redis://127.0.0.1:6379")
//!     .bulk_url("http://127.0.0.1:9200/_bulk")
//!     .build();
//!
//! let engine = StreamEngine::builder(config).start().await?;
//! if let Some(tx) = engine.raw_sender() {
//!     tx.send(r#"{"type":"nginx","guid":"g1","kafka":{"topic":"web"}}"#.to_string())
//!         .await?;
//! }
//! engine.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use config::Config;
pub use engine::{StreamEngine, StreamEngineBuilder};
pub use error::{AlertFlowError, ErrorKind, Result};
pub use model::{Document, Event, MetricValue, Operator, Rule, Strategy};

/// Alert engine, rule synchronization and event emission
pub mod alert;

/// Process configuration
pub mod config;

/// Bulk dump to a search backend
pub mod dump;

/// Pipeline runtime
pub mod engine;

/// Error types
pub mod error;

/// Sharded metric history
pub mod history;

/// Pipeline metrics
pub mod metrics;

/// Data model
pub mod model;

/// Dispatcher and enrichment
pub mod pipeline;

/// Query evaluation
pub mod query;

/// Debug HTTP service
#[cfg(feature = "service")]
pub mod service;

/// Shutdown signalling
pub mod shutdown;

/// Ingestion sources
pub mod source;

/// Rule and strategy stores
pub mod store;

/// Threshold functions
pub mod threshold;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides `level` when set. `json` selects JSON lines output.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}
