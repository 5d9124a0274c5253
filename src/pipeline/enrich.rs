//! Enrichment of raw records before dispatch

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{AlertFlowError, Result};
use crate::metrics::PipelineMetrics;
use crate::model::Document;

/// Turns one raw record into a dispatchable document
pub trait Enricher: Send + Sync + 'static {
    /// Enrich `raw`; an error drops the record
    fn enrich(&self, raw: &str) -> Result<Document>;
}

/// Stamps processing timestamps and requires a `type` field
///
/// Adds `cook_ts0` and `cook_ts1` (Unix microseconds at start and end of
/// enrichment), `cook_latency_us`, and `@timestamp` (RFC 3339) when the
/// record has none.
#[derive(Debug, Clone, Default)]
pub struct TimestampEnricher;

impl TimestampEnricher {
    /// Create the enricher
    pub fn new() -> Self {
        Self
    }
}

impl Enricher for TimestampEnricher {
    fn enrich(&self, raw: &str) -> Result<Document> {
        let ts0 = Utc::now();
        let mut object: Map<String, Value> = match serde_json::from_str(raw)? {
            Value::Object(map) => map,
            _ => return Err(AlertFlowError::Document("record is not a JSON object".to_string())),
        };

        object.insert("cook_ts0".to_string(), Value::from(ts0.timestamp_micros()));
        if !matches!(object.get("@timestamp"), Some(Value::String(_))) {
            object.insert(
                "@timestamp".to_string(),
                Value::from(ts0.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }

        if !matches!(object.get("type"), Some(Value::String(_))) {
            return Err(AlertFlowError::Document(
                "record has no string 'type' field".to_string(),
            ));
        }

        let ts1 = Utc::now();
        object.insert("cook_ts1".to_string(), Value::from(ts1.timestamp_micros()));
        object.insert(
            "cook_latency_us".to_string(),
            Value::from(ts1.timestamp_micros() - ts0.timestamp_micros()),
        );

        Ok(Document::from(Value::Object(object).to_string()))
    }
}

/// Enrich every raw record and forward it until `raw` closes
///
/// Records that fail to enrich are counted and dropped. Stops early when
/// the downstream channel closes.
pub async fn run_enrichment(
    mut raw: mpsc::Receiver<String>,
    enricher: Arc<dyn Enricher>,
    out: mpsc::Sender<Document>,
    metrics: Arc<PipelineMetrics>,
) {
    while let Some(record) = raw.recv().await {
        match enricher.enrich(&record) {
            Ok(doc) => {
                metrics.documents_enriched.fetch_add(1, Ordering::Relaxed);
                if out.send(doc).await.is_err() {
                    debug!("Enrichment output closed");
                    break;
                }
            }
            Err(e) => {
                metrics.enrichment_failures.fetch_add(1, Ordering::Relaxed);
                metrics.record_error(e.kind());
                debug!("Dropping record: {}", e);
            }
        }
    }
    info!("Enrichment stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stamps_fields() {
        let doc = TimestampEnricher::new()
            .enrich(r#"{"type":"nginx","status":500}"#)
            .unwrap();
        let value: Value = serde_json::from_str(&doc).unwrap();

        assert_eq!(value["type"], "nginx");
        assert!(value["cook_ts0"].as_i64().unwrap() > 0);
        assert!(value["cook_ts1"].as_i64().unwrap() >= value["cook_ts0"].as_i64().unwrap());
        assert!(value["cook_latency_us"].as_i64().unwrap() >= 0);
        assert!(value["@timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_keeps_existing_timestamp() {
        let doc = TimestampEnricher::new()
            .enrich(r#"{"type":"t","@timestamp":"2020-01-01T00:00:00Z"}"#)
            .unwrap();
        let value: Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(value["@timestamp"], "2020-01-01T00:00:00Z");
    }

    #[test]
    fn test_rejects_bad_records() {
        let enricher = TimestampEnricher::new();
        assert!(enricher.enrich("nope").is_err());
        assert!(enricher.enrich("[1,2]").is_err());
        assert!(enricher.enrich(r#"{"status":1}"#).is_err());
        assert!(enricher.enrich(r#"{"type":7}"#).is_err());
    }

    #[tokio::test]
    async fn test_run_enrichment_counts_failures() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let metrics = Arc::new(PipelineMetrics::new());

        raw_tx.send(r#"{"type":"a"}"#.to_string()).await.unwrap();
        raw_tx.send("garbage".to_string()).await.unwrap();
        drop(raw_tx);

        run_enrichment(raw_rx, Arc::new(TimestampEnricher::new()), out_tx, metrics.clone()).await;

        assert!(out_rx.recv().await.is_some());
        assert!(out_rx.recv().await.is_none());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_enriched, 1);
        assert_eq!(snapshot.enrichment_failures, 1);
    }
}
