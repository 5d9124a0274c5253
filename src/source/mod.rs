//! Ingestion sources feeding the raw record channel

pub mod stdin;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use stdin::{run_lines, run_stdin};

use serde_json::{json, Value};

use crate::error::{AlertFlowError, Result};

/// Merge `kafka.topic`, `kafka.partition` and `kafka.offset` into a payload
///
/// The payload must be a JSON object; an existing `kafka` object keeps its
/// other keys.
pub fn annotate_kafka(payload: &[u8], topic: &str, partition: i32, offset: i64) -> Result<String> {
    let mut value: Value = serde_json::from_slice(payload)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| AlertFlowError::Document("payload is not a JSON object".to_string()))?;

    let kafka = object
        .entry("kafka")
        .or_insert_with(|| json!({}));
    if !kafka.is_object() {
        *kafka = json!({});
    }
    if let Some(meta) = kafka.as_object_mut() {
        meta.insert("topic".to_string(), Value::from(topic));
        meta.insert("partition".to_string(), Value::from(partition));
        meta.insert("offset".to_string(), Value::from(offset));
    }

    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_annotate_kafka() {
        let out = annotate_kafka(br#"{"type":"t","kafka":{"key":"k"}}"#, "logs", 3, 42).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["kafka"]["topic"], "logs");
        assert_eq!(value["kafka"]["partition"], 3);
        assert_eq!(value["kafka"]["offset"], 42);
        assert_eq!(value["kafka"]["key"], "k");

        let out = annotate_kafka(br#"{"kafka":"flat"}"#, "logs", 0, 1).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["kafka"]["topic"], "logs");
    }

    #[test]
    fn test_annotate_rejects_non_objects() {
        assert!(annotate_kafka(b"[]", "t", 0, 0).is_err());
        assert!(annotate_kafka(b"\xff", "t", 0, 0).is_err());
    }
}
