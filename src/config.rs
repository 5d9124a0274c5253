//! Process configuration
//!
//! Loaded once at startup from a JSON or YAML file. Every field has a
//! default, so a config file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AlertFlowError, Result};
use crate::history::DEFAULT_HISTORY_CAP;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging
    pub log: LogConfig,
    /// Debug HTTP service
    pub http: HttpConfig,
    /// Ingestion sources
    pub pull: PullConfig,
    /// Channel sizes between tasks
    pub pipeline: PipelineConfig,
    /// Alert engine and rule synchronization
    pub alert: AlertConfig,
    /// Bulk storage dump
    pub dump: DumpConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter level; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Debug HTTP service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Serve the debug endpoints
    pub enabled: bool,
    /// Listen address
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Ingestion sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullConfig {
    /// Kafka/Redpanda consumer
    pub kafka: KafkaSourceConfig,
}

/// Kafka/Redpanda source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSourceConfig {
    /// Consume from Kafka
    pub enabled: bool,
    /// Broker addresses
    pub brokers: Vec<String>,
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Consumer group id
    #[serde(alias = "consumerId")]
    pub group_id: String,
    /// Offset reset policy for new groups
    pub auto_offset_reset: String,
}

impl Default for KafkaSourceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            brokers: vec!["localhost:9092".to_string()],
            topics: Vec::new(),
            group_id: "alertflow".to_string(),
            auto_offset_reset: "latest".to_string(),
        }
    }
}

/// Bounded channel capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Source to enrichment
    pub raw_buffer: usize,
    /// Enrichment to dispatcher
    pub inbound_buffer: usize,
    /// Dispatcher to alert engine
    pub alert_buffer: usize,
    /// Dispatcher to bulk dumper
    pub dump_buffer: usize,
    /// Interval of the metrics summary log, seconds
    pub metrics_interval_secs: u64,
    /// Bound on joining tasks during shutdown, seconds
    pub shutdown_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_buffer: 10_000,
            inbound_buffer: 10_000,
            alert_buffer: 10_000,
            dump_buffer: 10_000,
            metrics_interval_secs: 60,
            shutdown_timeout_secs: 30,
        }
    }
}

impl PipelineConfig {
    /// Metrics log interval
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    /// Shutdown join bound
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Where rules and strategies are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStoreKind {
    /// YAML or JSON file
    File,
    /// MySQL tables (feature `mysql`)
    Mysql,
}

/// Rule store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleStoreConfig {
    /// Backend
    pub kind: RuleStoreKind,
    /// File path for the file backend
    pub path: Option<PathBuf>,
    /// Connection URL for the MySQL backend
    pub url: Option<String>,
}

impl Default for RuleStoreConfig {
    fn default() -> Self {
        Self {
            kind: RuleStoreKind::File,
            path: Some(PathBuf::from("rules.yaml")),
            url: None,
        }
    }
}

/// Alert engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Run the alert engine
    pub enabled: bool,
    /// Tumbling window length, seconds
    pub interval_secs: u64,
    /// Maximum history length per rule
    pub history_cap: usize,
    /// Rule table refresh interval, seconds
    pub sync_interval_secs: u64,
    /// Outbound event queue
    pub redis_url: String,
    /// Bound on connecting to Redis and on each push, milliseconds
    pub redis_timeout_ms: u64,
    /// Rule and strategy source
    pub rule_store: RuleStoreConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            history_cap: DEFAULT_HISTORY_CAP,
            sync_interval_secs: 60,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_timeout_ms: 2000,
            rule_store: RuleStoreConfig::default(),
        }
    }
}

impl AlertConfig {
    /// Tumbling window length
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Rule refresh interval
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    /// Redis connect and push timeout
    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

/// Storage dump configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Elasticsearch-compatible bulk endpoint
    pub es: EsDumpConfig,
}

/// Bulk dumper configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsDumpConfig {
    /// Run the bulk dumper
    pub enabled: bool,
    /// Flush cadence, milliseconds
    pub interval_ms: u64,
    /// Full `_bulk` URL
    #[serde(alias = "bulkUrl")]
    pub bulk_url: String,
    /// First segment of every index name
    #[serde(alias = "indexPrefix")]
    pub index_prefix: String,
    /// strftime pattern appended to every index name
    #[serde(alias = "indexSuffix")]
    pub index_suffix: String,
    /// Concurrent flushes allowed before batches are dropped
    pub max_inflight_flushes: usize,
    /// Per-request timeout, seconds
    pub request_timeout_secs: u64,
    /// Bound on waiting for in-flight flushes at shutdown, seconds
    pub drain_timeout_secs: u64,
}

impl Default for EsDumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 1000,
            bulk_url: String::new(),
            index_prefix: "alertflow".to_string(),
            index_suffix: "%Y.%m.%d".to_string(),
            max_inflight_flushes: 4,
            request_timeout_secs: 30,
            drain_timeout_secs: 10,
        }
    }
}

impl EsDumpConfig {
    /// Flush cadence
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// In-flight drain bound
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Load and validate a config file; `.yaml`/`.yml` are YAML, anything else JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AlertFlowError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => Self::from_json(&content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON text without validating
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Parse from YAML text without validating
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> {
            Err(AlertFlowError::Configuration(msg.to_string()))
        };

        let p = &self.pipeline;
        if p.raw_buffer == 0 || p.inbound_buffer == 0 || p.alert_buffer == 0 || p.dump_buffer == 0
        {
            return invalid("Channel buffers must be greater than 0");
        }
        if p.metrics_interval_secs == 0 {
            return invalid("Metrics interval must be greater than 0");
        }

        if self.alert.enabled {
            let a = &self.alert;
            if a.interval_secs == 0 {
                return invalid("Alert interval must be greater than 0");
            }
            if a.sync_interval_secs == 0 {
                return invalid("Rule sync interval must be greater than 0");
            }
            if a.history_cap == 0 {
                return invalid("History cap must be greater than 0");
            }
            if a.redis_timeout_ms == 0 {
                return invalid("Redis timeout must be greater than 0");
            }
            if a.redis_url.is_empty() {
                return invalid("Redis URL cannot be empty when alerting is enabled");
            }
            match a.rule_store.kind {
                RuleStoreKind::File if a.rule_store.path.is_none() => {
                    return invalid("File rule store requires a path");
                }
                RuleStoreKind::Mysql
                    if a.rule_store.url.as_deref().map_or(true, str::is_empty) =>
                {
                    return invalid("MySQL rule store requires a url");
                }
                _ => {}
            }
        }

        if self.dump.es.enabled {
            let es = &self.dump.es;
            if es.bulk_url.is_empty() {
                return invalid("Bulk URL cannot be empty when the dump is enabled");
            }
            if es.interval_ms == 0 {
                return invalid("Dump interval must be greater than 0");
            }
            if es.max_inflight_flushes == 0 {
                return invalid("Max in-flight flushes must be greater than 0");
            }
            if es.index_prefix.is_empty() {
                return invalid("Index prefix cannot be empty");
            }
            if !es.index_suffix.contains('%') {
                return invalid("Index suffix must be a strftime pattern such as %Y.%m.%d");
            }
        }

        let kafka = &self.pull.kafka;
        if kafka.enabled {
            if kafka.brokers.is_empty() {
                return invalid("Kafka brokers cannot be empty");
            }
            if kafka.topics.is_empty() {
                return invalid("Kafka topics cannot be empty");
            }
            if kafka.group_id.is_empty() {
                return invalid("Kafka group id cannot be empty");
            }
        }

        if self.http.enabled && self.http.listen.is_empty() {
            return invalid("HTTP listen address cannot be empty");
        }

        Ok(())
    }
}

/// Builder for [`Config`]
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from defaults
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the log level
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log.level = level.into();
        self
    }

    /// Enable the alert engine
    pub fn alert_enabled(mut self, enabled: bool) -> Self {
        self.config.alert.enabled = enabled;
        self
    }

    /// Set the tumbling window length
    pub fn alert_interval(mut self, interval: Duration) -> Self {
        self.config.alert.interval_secs = interval.as_secs();
        self
    }

    /// Set the rule refresh interval
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.alert.sync_interval_secs = interval.as_secs();
        self
    }

    /// Set the history cap
    pub fn history_cap(mut self, cap: usize) -> Self {
        self.config.alert.history_cap = cap;
        self
    }

    /// Set the Redis URL
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.alert.redis_url = url.into();
        self
    }

    /// Read rules from a file
    pub fn rule_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.alert.rule_store = RuleStoreConfig {
            kind: RuleStoreKind::File,
            path: Some(path.into()),
            url: None,
        };
        self
    }

    /// Read rules from MySQL
    pub fn rule_database(mut self, url: impl Into<String>) -> Self {
        self.config.alert.rule_store = RuleStoreConfig {
            kind: RuleStoreKind::Mysql,
            path: None,
            url: Some(url.into()),
        };
        self
    }

    /// Enable the bulk dumper against `bulk_url`
    pub fn bulk_url(mut self, url: impl Into<String>) -> Self {
        self.config.dump.es.enabled = true;
        self.config.dump.es.bulk_url = url.into();
        self
    }

    /// Enable or disable the bulk dumper
    pub fn dump_enabled(mut self, enabled: bool) -> Self {
        self.config.dump.es.enabled = enabled;
        self
    }

    /// Set the flush cadence
    pub fn dump_interval(mut self, interval: Duration) -> Self {
        self.config.dump.es.interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set index prefix and strftime suffix
    pub fn index_naming(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.config.dump.es.index_prefix = prefix.into();
        self.config.dump.es.index_suffix = suffix.into();
        self
    }

    /// Set the flush permit pool size
    pub fn max_inflight_flushes(mut self, max: usize) -> Self {
        self.config.dump.es.max_inflight_flushes = max;
        self
    }

    /// Set every dispatcher-facing channel to `size`
    pub fn channel_buffer_size(mut self, size: usize) -> Self {
        self.config.pipeline.raw_buffer = size;
        self.config.pipeline.inbound_buffer = size;
        self.config.pipeline.alert_buffer = size;
        self.config.pipeline.dump_buffer = size;
        self
    }

    /// Serve the debug HTTP endpoints on `listen`
    pub fn http_listen(mut self, listen: impl Into<String>) -> Self {
        self.config.http.enabled = true;
        self.config.http.listen = listen.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}
