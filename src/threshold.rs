//! Threshold functions over a rule's metric history
//!
//! A strategy carries a compact function spec such as `all(#3)`: a named
//! aggregator and the number of most recent points it looks at. The spec is
//! parsed into a [`ThresholdFunction`] closed over the strategy's operator
//! and threshold, and then evaluated against a newest-first history slice.
//!
//! Every function fails closed: a history shorter than the window never
//! triggers.

use thiserror::Error;

use crate::model::{MetricValue, Operator};

/// Absolute tolerance used by `=`/`==`/`!=`
pub const EQUALITY_TOLERANCE: f64 = 1e-4;

/// Errors produced while parsing a function spec
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FunctionParseError {
    /// Spec does not follow `<name>(#<N>)`
    #[error("malformed function spec '{spec}': {reason}")]
    Malformed {
        /// The spec as given
        spec: String,
        /// What was wrong with it
        reason: &'static str,
    },

    /// Window length is not a positive integer
    #[error("invalid window '{window}' in function spec '{spec}'")]
    InvalidWindow {
        /// The spec as given
        spec: String,
        /// The offending window text
        window: String,
    },

    /// No built-in aggregator has this name
    #[error("unsupported function '{name}'")]
    UnknownFunction {
        /// Requested aggregator name
        name: String,
    },
}

/// Parameters shared by every aggregator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    /// Number of most recent points considered
    pub limit: usize,
    /// Comparison operator
    pub op: Operator,
    /// Right-hand value
    pub threshold: f64,
}

/// A parsed threshold function
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdFunction {
    /// Every one of the last N values satisfies the comparison
    All(Window),
    /// The sum of the last N values satisfies the comparison
    Sum(Window),
    /// The mean of the last N values satisfies the comparison
    Avg(Window),
    /// The newest value minus any of the N values before it satisfies the comparison
    Diff(Window),
}

impl ThresholdFunction {
    /// Parse `<name>(#<N>)` into a function closed over `op` and `threshold`
    pub fn parse(spec: &str, op: Operator, threshold: f64) -> Result<Self, FunctionParseError> {
        let trimmed = spec.trim();
        let malformed = |reason| FunctionParseError::Malformed {
            spec: spec.to_string(),
            reason,
        };

        let open = trimmed.find("(#").ok_or_else(|| malformed("expected '(#'"))?;
        let body = trimmed[open + 2..]
            .strip_suffix(')')
            .ok_or_else(|| malformed("expected closing ')'"))?;
        let name = trimmed[..open].trim();
        if name.is_empty() {
            return Err(malformed("missing function name"));
        }

        let limit = body
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| FunctionParseError::InvalidWindow {
                spec: spec.to_string(),
                window: body.to_string(),
            })?;

        let window = Window {
            limit,
            op,
            threshold,
        };
        match name {
            "all" => Ok(ThresholdFunction::All(window)),
            "sum" => Ok(ThresholdFunction::Sum(window)),
            "avg" => Ok(ThresholdFunction::Avg(window)),
            "diff" => Ok(ThresholdFunction::Diff(window)),
            other => Err(FunctionParseError::UnknownFunction {
                name: other.to_string(),
            }),
        }
    }

    /// Aggregator name as written in a spec
    pub fn name(&self) -> &'static str {
        match self {
            ThresholdFunction::All(_) => "all",
            ThresholdFunction::Sum(_) => "sum",
            ThresholdFunction::Avg(_) => "avg",
            ThresholdFunction::Diff(_) => "diff",
        }
    }

    /// Window parameters
    pub fn window(&self) -> &Window {
        match self {
            ThresholdFunction::All(w)
            | ThresholdFunction::Sum(w)
            | ThresholdFunction::Avg(w)
            | ThresholdFunction::Diff(w) => w,
        }
    }

    /// Evaluate against a newest-first history
    pub fn compute(&self, history: &[MetricValue]) -> bool {
        let w = self.window();
        match self {
            ThresholdFunction::All(_) => {
                if history.len() < w.limit {
                    return false;
                }
                history[..w.limit]
                    .iter()
                    .all(|p| compare(p.value, w.op, w.threshold))
            }
            ThresholdFunction::Sum(_) => {
                if history.len() < w.limit {
                    return false;
                }
                let sum: f64 = history[..w.limit].iter().map(|p| p.value).sum();
                compare(sum, w.op, w.threshold)
            }
            ThresholdFunction::Avg(_) => {
                if history.len() < w.limit {
                    return false;
                }
                let sum: f64 = history[..w.limit].iter().map(|p| p.value).sum();
                compare(sum / w.limit as f64, w.op, w.threshold)
            }
            ThresholdFunction::Diff(_) => {
                if history.len() < w.limit + 1 {
                    return false;
                }
                let newest = history[0].value;
                history[1..=w.limit]
                    .iter()
                    .any(|p| compare(newest - p.value, w.op, w.threshold))
            }
        }
    }
}

/// Compare `left op right`
pub fn compare(left: f64, op: Operator, right: f64) -> bool {
    match op {
        Operator::Eq => (left - right).abs() < EQUALITY_TOLERANCE,
        Operator::Ne => (left - right).abs() > EQUALITY_TOLERANCE,
        Operator::Lt => left < right,
        Operator::Le => left <= right,
        Operator::Gt => left > right,
        Operator::Ge => left >= right,
    }
}
