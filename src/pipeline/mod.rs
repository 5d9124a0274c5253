//! Stream plumbing between sources and consumers

pub mod dispatcher;
pub mod enrich;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use enrich::{run_enrichment, Enricher, TimestampEnricher};
