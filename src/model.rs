//! Rules, strategies, metric points and alert events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// One serialized inbound record (self-describing JSON text)
pub type Document = Arc<str>;

/// An alerting rule: a query run against every tumbling batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule identifier
    pub rule_id: String,
    /// Query text handed to the query evaluator
    #[serde(rename = "sql", alias = "query")]
    pub query: String,
    /// Free-text description
    #[serde(default)]
    pub note: String,
}

impl Rule {
    /// Create a rule
    pub fn new(rule_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            query: query.into(),
            note: String::new(),
        }
    }

    /// Attach a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }
}

/// Comparison operator used by threshold functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    /// `=` or `==`, within tolerance
    Eq,
    /// `!=`, outside tolerance
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl Operator {
    /// Canonical textual form
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            other => Err(format!("unsupported operator '{}'", other)),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger condition attached 1:1 to a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Identifier of the owning rule
    pub rule_id: String,
    /// Threshold function spec, e.g. `all(#3)`
    pub func: String,
    /// Comparison operator
    pub op: Operator,
    /// Right-hand side of the comparison
    pub threshold: f64,
    /// Routes emitted events to `event:p{priority}`
    #[serde(default)]
    pub priority: i32,
}

/// One metric observation for a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    /// Rule that produced the value
    pub rule_id: String,
    /// Observed value
    pub value: f64,
    /// Unix timestamp in seconds
    pub timestamp: i64,
}

impl MetricValue {
    /// Create a metric value
    pub fn new(rule_id: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            rule_id: rule_id.into(),
            value,
            timestamp,
        }
    }
}

/// Snapshot emitted when a strategy triggers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Rule that triggered
    pub rule: Rule,
    /// Metric value that completed the trigger
    pub metric_value: MetricValue,
    /// Strategy that evaluated to true
    pub strategy: Strategy,
    /// Trigger time, Unix seconds
    pub ets: i64,
}

impl Event {
    /// Priority used to route the event
    pub fn priority(&self) -> i32 {
        self.strategy.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_operator_parse() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!("==".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!(" >= ".parse::<Operator>().unwrap(), Operator::Ge);
        assert!("=>".parse::<Operator>().is_err());
    }

    #[test]
    fn test_strategy_deserialize() {
        let strategy: Strategy = serde_json::from_str(
            r#"{"rule_id":"r1","func":"all(#3)","op":">=","threshold":1.5,"priority":2}"#,
        )
        .unwrap();
        assert_eq!(strategy.op, Operator::Ge);
        assert_eq!(strategy.priority, 2);

        let bad = serde_json::from_str::<Strategy>(
            r#"{"rule_id":"r1","func":"all(#3)","op":"~","threshold":1.5}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_rule_accepts_query_alias() {
        let rule: Rule =
            serde_json::from_str(r#"{"rule_id":"r1","query":"type=nginx"}"#).unwrap();
        assert_eq!(rule, Rule::new("r1", "type=nginx"));

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["sql"], "type=nginx");
    }
}
