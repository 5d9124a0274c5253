use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt::Write;
use thiserror::Error;

/// Reasons a document cannot become a bulk action
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Document is not a JSON object
    #[error("document is not valid JSON: {0}")]
    InvalidJson(String),

    /// A routing field is absent or not a string
    #[error("document has no string field '{0}'")]
    MissingField(&'static str),

    /// The index suffix is not a usable strftime pattern
    #[error("invalid index suffix '{0}'")]
    InvalidSuffix(String),
}

fn string_field<'a>(doc: &'a Value, path: &[&str], name: &'static str) -> Result<&'a str, EncodeError> {
    let mut current = doc;
    for segment in path {
        current = current.get(segment).ok_or(EncodeError::MissingField(name))?;
    }
    current.as_str().ok_or(EncodeError::MissingField(name))
}

/// Index a document is written to
///
/// `{prefix}-{topic}-{guid}-{now formatted with suffix}`
pub fn index_name(
    prefix: &str,
    topic: &str,
    guid: &str,
    suffix: &str,
    now: DateTime<Utc>,
) -> Result<String, EncodeError> {
    let mut index = format!("{}-{}-{}-", prefix, topic, guid);
    write!(index, "{}", now.format(suffix))
        .map_err(|_| EncodeError::InvalidSuffix(suffix.to_string()))?;
    Ok(index)
}

/// Encode one document as a bulk `create` action followed by its source line
///
/// The routing fields are `type`, `guid` and `kafka.topic`; each must be a
/// string. Output is two newline-terminated lines.
pub fn encode_bulk(
    doc: &str,
    index_prefix: &str,
    index_suffix: &str,
    now: DateTime<Utc>,
) -> Result<String, EncodeError> {
    let value: Value =
        serde_json::from_str(doc).map_err(|e| EncodeError::InvalidJson(e.to_string()))?;

    let doc_type = string_field(&value, &["type"], "type")?;
    let guid = string_field(&value, &["guid"], "guid")?;
    let topic = string_field(&value, &["kafka", "topic"], "kafka.topic")?;

    let index = index_name(index_prefix, topic, guid, index_suffix, now)?;
    let action = json!({ "create": { "_index": index, "_type": doc_type } });

    // the source line must stay on one line
    let source = doc.trim();
    let source = if source.contains('\n') {
        value.to_string()
    } else {
        source.to_string()
    };

    Ok(format!("{}\n{}\n", action, source))
}
