//! Background refresh of the rule table
//!
//! The alert engine reads rules through [`SharedRules`], an atomically
//! swappable pointer to an immutable [`RuleTable`]. The synchronizer builds
//! a fresh table from the [`RuleStore`] on a fixed interval and publishes it
//! with a single store, so a tick always sees one complete table.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::metrics::PipelineMetrics;
use crate::model::{Rule, Strategy};
use crate::store::RuleStore;

/// Immutable snapshot of every rule and strategy
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    /// Rules by id
    pub rules: HashMap<String, Rule>,
    /// Strategies by rule id
    pub strategies: HashMap<String, Strategy>,
    /// Monotonic publication counter, 0 for the empty startup table
    pub version: u64,
    /// When the table was built
    pub loaded_at: Option<DateTime<Utc>>,
}

impl RuleTable {
    /// Build a table; a later strategy for the same rule replaces an earlier one
    pub fn new(rules: Vec<Rule>, strategies: Vec<Strategy>, version: u64) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.rule_id.clone(), r)).collect(),
            strategies: strategies
                .into_iter()
                .map(|s| (s.rule_id.clone(), s))
                .collect(),
            version,
            loaded_at: Some(Utc::now()),
        }
    }

    /// Strategy attached to `rule_id`
    pub fn strategy(&self, rule_id: &str) -> Option<&Strategy> {
        self.strategies.get(rule_id)
    }

    /// Summary for diagnostics
    pub fn summary(&self) -> RuleTableSummary {
        let mut rule_ids: Vec<String> = self.rules.keys().cloned().collect();
        rule_ids.sort();
        RuleTableSummary {
            version: self.version,
            loaded_at: self.loaded_at,
            rules: self.rules.len(),
            strategies: self.strategies.len(),
            rule_ids,
        }
    }
}

/// Serializable description of a [`RuleTable`]
#[derive(Debug, Clone, Serialize)]
pub struct RuleTableSummary {
    /// Table version
    pub version: u64,
    /// Build time
    pub loaded_at: Option<DateTime<Utc>>,
    /// Number of rules
    pub rules: usize,
    /// Number of strategies
    pub strategies: usize,
    /// Sorted rule ids
    pub rule_ids: Vec<String>,
}

/// Lock-free handle to the current rule table
#[derive(Debug, Clone)]
pub struct SharedRules {
    inner: Arc<ArcSwap<RuleTable>>,
}

impl SharedRules {
    /// Start from an empty table
    pub fn new() -> Self {
        Self::from_table(RuleTable::default())
    }

    /// Start from `table`
    pub fn from_table(table: RuleTable) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(table)),
        }
    }

    /// Current table
    pub fn load(&self) -> Arc<RuleTable> {
        self.inner.load_full()
    }

    /// Replace the current table
    pub fn store(&self, table: RuleTable) {
        self.inner.store(Arc::new(table));
    }
}

impl Default for SharedRules {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically reloads [`SharedRules`] from a [`RuleStore`]
pub struct RuleSynchronizer {
    store: Arc<dyn RuleStore>,
    rules: SharedRules,
    interval: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl RuleSynchronizer {
    /// Create a synchronizer publishing into `rules`
    pub fn new(
        store: Arc<dyn RuleStore>,
        rules: SharedRules,
        interval: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            rules,
            interval,
            metrics,
        }
    }

    /// Handle the synchronizer publishes into
    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    /// Load once before the engine starts; errors here are fatal to startup
    pub async fn initial_load(&self) -> Result<Arc<RuleTable>> {
        self.refresh().await?;
        let table = self.rules.load();
        info!(
            store = self.store.name(),
            rules = table.rules.len(),
            strategies = table.strategies.len(),
            "Initial rule table loaded"
        );
        Ok(table)
    }

    /// Build and publish a fresh table; on failure the current table is kept
    pub async fn refresh(&self) -> Result<u64> {
        let (rules, strategies) = self.store.load_all().await?;
        let version = self.rules.load().version + 1;

        let table = RuleTable::new(rules, strategies, version);
        debug!(
            version,
            rules = table.rules.len(),
            strategies = table.strategies.len(),
            "Publishing rule table"
        );
        self.rules.store(table);
        Ok(version)
    }

    /// Refresh every interval until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately; initial_load already covered it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh().await {
                        Ok(_) => {
                            self.metrics.sync_successes.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.metrics.sync_failures.fetch_add(1, Ordering::Relaxed);
                            self.metrics.record_error(e.kind());
                            error!(store = self.store.name(), "Rule sync failed, keeping current table: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("Rule synchronizer stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Operator;

    fn strategy(rule_id: &str, priority: i32) -> Strategy {
        Strategy {
            rule_id: rule_id.to_string(),
            func: "all(#1)".to_string(),
            op: Operator::Gt,
            threshold: 0.0,
            priority,
        }
    }

    #[test]
    fn test_rule_table_indexes_by_id() {
        let table = RuleTable::new(
            vec![Rule::new("b", "*"), Rule::new("a", "*")],
            vec![strategy("a", 1), strategy("a", 2)],
            3,
        );
        assert_eq!(table.rules.len(), 2);
        assert_eq!(table.strategy("a").map(|s| s.priority), Some(2));
        assert!(table.strategy("b").is_none());

        let summary = table.summary();
        assert_eq!(summary.version, 3);
        assert_eq!(summary.rule_ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_shared_rules_swap() {
        let shared = SharedRules::new();
        let before = shared.load();
        assert_eq!(before.version, 0);

        shared.store(RuleTable::new(vec![Rule::new("a", "*")], vec![], 1));
        assert_eq!(shared.load().version, 1);
        // readers holding the old snapshot keep seeing it
        assert!(before.rules.is_empty());
    }

    /// Answers only whole-snapshot loads
    struct SnapshotStore;

    #[async_trait::async_trait]
    impl RuleStore for SnapshotStore {
        async fn load_rules(&self) -> Result<Vec<Rule>> {
            Err(crate::AlertFlowError::Store("partial read".to_string()))
        }

        async fn load_strategies(&self) -> Result<Vec<Strategy>> {
            Err(crate::AlertFlowError::Store("partial read".to_string()))
        }

        async fn load_all(&self) -> Result<(Vec<Rule>, Vec<Strategy>)> {
            Ok((vec![Rule::new("a", "*")], vec![strategy("a", 4)]))
        }

        fn name(&self) -> &str {
            "snapshot"
        }
    }

    #[tokio::test]
    async fn test_refresh_uses_one_snapshot() {
        let rules = SharedRules::new();
        let sync = RuleSynchronizer::new(
            Arc::new(SnapshotStore),
            rules.clone(),
            Duration::from_secs(60),
            Arc::new(PipelineMetrics::new()),
        );
        assert_eq!(sync.refresh().await.unwrap(), 1);
        assert_eq!(rules.load().strategy("a").map(|s| s.priority), Some(4));
    }
}
