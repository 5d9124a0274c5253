//! Persistent rule and strategy sources

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{AlertFlowError, Result};
use crate::model::{Rule, Strategy};

/// Source of the rule table, re-read on every synchronization cycle
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// Load every rule
    async fn load_rules(&self) -> Result<Vec<Rule>>;

    /// Load every strategy; records with an unusable operator are skipped
    async fn load_strategies(&self) -> Result<Vec<Strategy>>;

    /// Load rules and strategies for one synchronization cycle
    ///
    /// Stores that can read both from one snapshot override this so a cycle
    /// never mixes two versions of the source.
    async fn load_all(&self) -> Result<(Vec<Rule>, Vec<Strategy>)> {
        let rules = self.load_rules().await?;
        let strategies = self.load_strategies().await?;
        Ok((rules, strategies))
    }

    /// Store name for logs
    fn name(&self) -> &str;
}

/// Strategy as persisted, before its operator is checked
#[derive(Debug, Clone, Deserialize)]
struct StrategyRecord {
    rule_id: String,
    func: String,
    op: String,
    threshold: f64,
    #[serde(default)]
    priority: i32,
}

impl StrategyRecord {
    fn into_strategy(self) -> Option<Strategy> {
        match self.op.parse() {
            Ok(op) => Some(Strategy {
                rule_id: self.rule_id,
                func: self.func,
                op,
                threshold: self.threshold,
                priority: self.priority,
            }),
            Err(e) => {
                warn!(rule_id = %self.rule_id, "Skipping strategy: {}", e);
                None
            }
        }
    }
}

fn usable_strategies(records: Vec<StrategyRecord>) -> Vec<Strategy> {
    records
        .into_iter()
        .filter_map(StrategyRecord::into_strategy)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<Rule>,
    #[serde(default)]
    strategies: Vec<StrategyRecord>,
}

/// Rules and strategies kept in one YAML or JSON file
///
/// ```yaml
/// rules:
///   - rule_id: nginx-5xx
///     sql: type=nginx && status=500
/// strategies:
///   - rule_id: nginx-5xx
///     func: all(#3)
///     op: ">="
///     threshold: 10
///     priority: 1
/// ```
///
/// The file is read again on every call so edits are picked up by the
/// next synchronization cycle.
#[derive(Debug, Clone)]
pub struct FileRuleStore {
    path: PathBuf,
}

impl FileRuleStore {
    /// Create a store over `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<RuleFile> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AlertFlowError::Store(format!("cannot read {}: {}", self.path.display(), e))
        })?;

        let parsed = match self.path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| AlertFlowError::Store(format!("{}: {}", self.path.display(), e)))?,
            _ => serde_yaml::from_str(&content)
                .map_err(|e| AlertFlowError::Store(format!("{}: {}", self.path.display(), e)))?,
        };
        Ok(parsed)
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn load_rules(&self) -> Result<Vec<Rule>> {
        Ok(self.read().await?.rules)
    }

    async fn load_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(usable_strategies(self.read().await?.strategies))
    }

    async fn load_all(&self) -> Result<(Vec<Rule>, Vec<Strategy>)> {
        let file = self.read().await?;
        Ok((file.rules, usable_strategies(file.strategies)))
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(feature = "mysql")]
pub use mysql::MySqlRuleStore;

#[cfg(feature = "mysql")]
mod mysql {
    use super::*;
    use sqlx::mysql::{MySqlPool, MySqlPoolOptions};

    // `sql` is a reserved word in MySQL
    pub(super) const RULES_QUERY: &str = "SELECT rule_id, `sql`, note FROM rules";
    pub(super) const STRATEGIES_QUERY: &str =
        "SELECT rule_id, func, op, threshold, priority FROM strategies";

    /// Rules and strategies read from MySQL tables
    ///
    /// Expects `rules(rule_id, sql, note)` and
    /// `strategies(rule_id, func, op, threshold, priority)`.
    #[derive(Debug, Clone)]
    pub struct MySqlRuleStore {
        pool: MySqlPool,
    }

    impl MySqlRuleStore {
        /// Connect a small pool to `url`
        pub async fn connect(url: &str) -> Result<Self> {
            let pool = MySqlPoolOptions::new()
                .max_connections(2)
                .connect(url)
                .await
                .map_err(|e| AlertFlowError::Store(format!("mysql connect failed: {}", e)))?;
            Ok(Self { pool })
        }

        /// Wrap an existing pool
        pub fn from_pool(pool: MySqlPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl RuleStore for MySqlRuleStore {
        async fn load_rules(&self) -> Result<Vec<Rule>> {
            let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
                RULES_QUERY,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AlertFlowError::Store(format!("load rules: {}", e)))?;

            Ok(rows
                .into_iter()
                .map(|(rule_id, query, note)| Rule {
                    rule_id,
                    query,
                    note: note.unwrap_or_default(),
                })
                .collect())
        }

        async fn load_strategies(&self) -> Result<Vec<Strategy>> {
            let rows = sqlx::query_as::<_, (String, String, String, f64, i32)>(
                STRATEGIES_QUERY,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AlertFlowError::Store(format!("load strategies: {}", e)))?;

            Ok(rows
                .into_iter()
                .filter_map(|(rule_id, func, op, threshold, priority)| {
                    StrategyRecord {
                        rule_id,
                        func,
                        op,
                        threshold,
                        priority,
                    }
                    .into_strategy()
                })
                .collect())
        }

        fn name(&self) -> &str {
            "mysql"
        }
    }
}
