//! Error types for the alerting pipeline

use thiserror::Error;

use crate::threshold::FunctionParseError;

/// Main error type for alertflow operations
#[derive(Error, Debug)]
pub enum AlertFlowError {
    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A strategy's threshold function could not be parsed
    #[error("Function parse error: {0}")]
    Function(#[from] FunctionParseError),

    /// The query evaluator rejected a rule's query
    #[error("Query error for rule '{rule_id}': {message}")]
    Query {
        /// Rule whose query failed
        rule_id: String,
        /// Evaluator message
        message: String,
    },

    /// The rule/strategy store could not be read
    #[error("Rule store error: {0}")]
    Store(String),

    /// Handing an event to the outbound queue failed
    #[error("Emit error on queue '{queue}': {message}")]
    Emit {
        /// Target queue name
        queue: String,
        /// Transport message
        message: String,
    },

    /// A document could not be enriched or encoded
    #[error("Document error: {0}")]
    Document(String),

    /// The bulk endpoint rejected or failed a flush
    #[error("Bulk flush error: {0}")]
    Bulk(String),

    /// A pipeline channel was closed unexpectedly
    #[error("Channel error: {0}")]
    Channel(String),

    /// Shutdown did not complete cleanly
    #[error("Shutdown error: {0}")]
    Shutdown(String),

    /// JSON parsing or serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing failed
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis transport failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP transport failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for alertflow operations
pub type Result<T> = std::result::Result<T, AlertFlowError>;

/// Broad classes used to decide how loudly to report an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad rule, strategy or process configuration
    Configuration,
    /// Backend or queue unreachable; may succeed later
    Transient,
    /// A single malformed record
    Data,
    /// Cannot continue
    Fatal,
}

impl ErrorKind {
    /// Label used in logs and metric keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Transient => "transient",
            ErrorKind::Data => "data",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl AlertFlowError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AlertFlowError::Configuration(_) | AlertFlowError::Function(_) => {
                ErrorKind::Configuration
            }
            AlertFlowError::Query { .. } => ErrorKind::Configuration,
            AlertFlowError::Store(_)
            | AlertFlowError::Emit { .. }
            | AlertFlowError::Bulk(_)
            | AlertFlowError::Redis(_)
            | AlertFlowError::Http(_)
            | AlertFlowError::Io(_) => ErrorKind::Transient,
            AlertFlowError::Document(_) | AlertFlowError::Json(_) | AlertFlowError::Yaml(_) => {
                ErrorKind::Data
            }
            AlertFlowError::Channel(_) | AlertFlowError::Shutdown(_) => ErrorKind::Fatal,
        }
    }

    /// Whether a later attempt may succeed without operator action
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Convert from channel send errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AlertFlowError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AlertFlowError::Channel(format!("Failed to send: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AlertFlowError::Configuration("interval must be > 0".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: interval must be > 0");

        let err = AlertFlowError::Emit {
            queue: "event:p1".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Emit error on queue 'event:p1': connection refused"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            AlertFlowError::Function(FunctionParseError::UnknownFunction {
                name: "max".to_string()
            })
            .kind(),
            ErrorKind::Configuration
        );
        assert!(AlertFlowError::Bulk("503".to_string()).is_transient());
        assert_eq!(
            AlertFlowError::Document("missing guid".to_string()).kind(),
            ErrorKind::Data
        );
        assert_eq!(ErrorKind::Transient.as_str(), "transient");
    }
}
