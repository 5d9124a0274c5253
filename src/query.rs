//! Query evaluation seam
//!
//! The alert engine does not interpret rule queries itself. It hands the
//! query text and the tick's batch to a [`QueryEvaluator`] and receives
//! grouped metric points back.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::model::Document;

/// One result point produced by a query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricPoint {
    /// Aggregated value
    pub value: f64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

/// Ordered result points keyed by group
pub type QueryResult = BTreeMap<String, Vec<MetricPoint>>;

/// Turns a rule query plus a document batch into metric points
///
/// Implementations must be safe to call from several evaluations at once
/// and must not mutate the batch.
pub trait QueryEvaluator: Send + Sync + 'static {
    /// Evaluate `query` over `batch`
    fn evaluate(&self, query: &str, batch: &[Document]) -> Result<QueryResult, String>;

    /// Evaluator name for logs
    fn name(&self) -> &str {
        "QueryEvaluator"
    }
}

/// Minimal evaluator that counts documents matching field equalities
///
/// Query text is `path=value` terms joined by `&&`; a dotted path walks
/// nested objects. `*` or an empty query matches every document. The
/// result is a single default group (`""`) holding one point: the match
/// count stamped with the evaluation time.
#[derive(Debug, Clone, Default)]
pub struct CountEvaluator;

#[derive(Debug, PartialEq)]
struct Term<'a> {
    path: Vec<&'a str>,
    expected: &'a str,
}

impl CountEvaluator {
    /// Create the evaluator
    pub fn new() -> Self {
        Self
    }

    fn parse_terms(query: &str) -> Result<Vec<Term<'_>>, String> {
        let query = query.trim();
        if query.is_empty() || query == "*" {
            return Ok(Vec::new());
        }

        query
            .split("&&")
            .map(|raw| {
                let (path, expected) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("term '{}' is not of the form path=value", raw.trim()))?;
                let path = path.trim();
                if path.is_empty() {
                    return Err(format!("term '{}' has an empty field path", raw.trim()));
                }
                Ok(Term {
                    path: path.split('.').collect(),
                    expected: expected.trim().trim_matches('"'),
                })
            })
            .collect()
    }

    fn matches(doc: &Value, terms: &[Term<'_>]) -> bool {
        terms.iter().all(|term| {
            let mut current = doc;
            for segment in &term.path {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => return false,
                }
            }
            match current {
                Value::String(s) => s == term.expected,
                Value::Number(n) => n.to_string() == term.expected,
                Value::Bool(b) => b.to_string() == term.expected,
                _ => false,
            }
        })
    }
}

impl QueryEvaluator for CountEvaluator {
    fn evaluate(&self, query: &str, batch: &[Document]) -> Result<QueryResult, String> {
        let terms = Self::parse_terms(query)?;

        let count = batch
            .iter()
            .filter_map(|doc| serde_json::from_str::<Value>(doc).ok())
            .filter(|doc| Self::matches(doc, &terms))
            .count();

        let mut result = QueryResult::new();
        result.insert(
            String::new(),
            vec![MetricPoint {
                value: count as f64,
                timestamp: Utc::now().timestamp(),
            }],
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "CountEvaluator"
    }
}
