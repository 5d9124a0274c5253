//! Tumbling-window rule evaluation

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::sink::EventSink;
use super::sync::SharedRules;
use crate::error::AlertFlowError;
use crate::history::{Fingerprint, HistoryStore};
use crate::metrics::PipelineMetrics;
use crate::model::{Document, Event, MetricValue, Rule};
use crate::query::QueryEvaluator;
use crate::threshold::ThresholdFunction;

/// Outcome counters for one evaluated batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Documents in the batch
    pub documents: usize,
    /// Rules whose query was run
    pub rules_evaluated: usize,
    /// Rules skipped because no strategy is attached
    pub rules_without_strategy: usize,
    /// Points accepted into history
    pub points_accepted: usize,
    /// Points rejected as stale
    pub points_rejected: usize,
    /// Events handed to the sink
    pub events_emitted: usize,
    /// Events the sink refused
    pub emit_failures: usize,
    /// Rules abandoned for this tick
    pub rule_failures: usize,
}

/// Evaluates every rule against each tumbling batch and emits triggered events
pub struct AlertEngine {
    rules: SharedRules,
    history: Arc<HistoryStore>,
    evaluator: Arc<dyn QueryEvaluator>,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
    history_cap: usize,
}

impl AlertEngine {
    /// Create an engine
    pub fn new(
        rules: SharedRules,
        history: Arc<HistoryStore>,
        evaluator: Arc<dyn QueryEvaluator>,
        sink: Arc<dyn EventSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            rules,
            history,
            evaluator,
            sink,
            metrics,
            interval: Duration::from_secs(60),
            history_cap: crate::history::DEFAULT_HISTORY_CAP,
        }
    }

    /// Set the tumbling window length
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the per-key history cap
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Evaluate every rule of the current table against `batch`
    pub async fn evaluate_batch(&self, batch: &[Document]) -> TickReport {
        let table = self.rules.load();
        let mut report = TickReport {
            documents: batch.len(),
            ..Default::default()
        };

        for rule in table.rules.values() {
            report.rules_evaluated += 1;
            if let Err(e) = self.evaluate_rule(rule, &table, batch, &mut report).await {
                report.rule_failures += 1;
                self.metrics.record_error(e.kind());
                match &e {
                    AlertFlowError::Function(_) => {
                        error!(rule_id = %rule.rule_id, "Bad strategy function: {}", e)
                    }
                    _ => warn!(rule_id = %rule.rule_id, "Rule abandoned for this tick: {}", e),
                }
            }
        }

        self.metrics.alert_ticks.fetch_add(1, Ordering::Relaxed);
        let m = &self.metrics;
        m.rules_evaluated
            .fetch_add(report.rules_evaluated as u64, Ordering::Relaxed);
        m.points_accepted
            .fetch_add(report.points_accepted as u64, Ordering::Relaxed);
        m.points_rejected
            .fetch_add(report.points_rejected as u64, Ordering::Relaxed);
        m.events_emitted
            .fetch_add(report.events_emitted as u64, Ordering::Relaxed);
        m.emit_failures
            .fetch_add(report.emit_failures as u64, Ordering::Relaxed);
        m.rule_failures
            .fetch_add(report.rule_failures as u64, Ordering::Relaxed);

        debug!(
            version = table.version,
            documents = report.documents,
            rules = report.rules_evaluated,
            events = report.events_emitted,
            "Alert tick evaluated"
        );
        report
    }

    async fn evaluate_rule(
        &self,
        rule: &Rule,
        table: &super::RuleTable,
        batch: &[Document],
        report: &mut TickReport,
    ) -> Result<(), AlertFlowError> {
        let groups = self
            .evaluator
            .evaluate(&rule.query, batch)
            .map_err(|message| AlertFlowError::Query {
                rule_id: rule.rule_id.clone(),
                message,
            })?;

        let Some(strategy) = table.strategy(&rule.rule_id) else {
            debug!(rule_id = %rule.rule_id, "No strategy attached, skipping");
            report.rules_without_strategy += 1;
            return Ok(());
        };

        for (group, points) in &groups {
            let Some(point) = points.first() else {
                continue;
            };
            let metric = MetricValue::new(rule.rule_id.as_str(), point.value, point.timestamp);

            let fingerprint = Fingerprint::of_group(&rule.rule_id, group);
            if !self
                .history
                .push(fingerprint, metric.clone(), self.history_cap)
            {
                debug!(rule_id = %rule.rule_id, group = %group, ts = metric.timestamp, "Stale point rejected");
                report.points_rejected += 1;
                continue;
            }
            report.points_accepted += 1;

            let Some(sequence) = self.history.get(fingerprint) else {
                continue;
            };

            let function = ThresholdFunction::parse(&strategy.func, strategy.op, strategy.threshold)?;
            if !function.compute(&sequence) {
                continue;
            }

            let event = Event {
                rule: rule.clone(),
                metric_value: metric,
                strategy: strategy.clone(),
                ets: Utc::now().timestamp(),
            };
            match self.sink.emit(&event).await {
                Ok(()) => {
                    info!(
                        rule_id = %rule.rule_id,
                        group = %group,
                        priority = strategy.priority,
                        value = event.metric_value.value,
                        "Alert triggered"
                    );
                    report.events_emitted += 1;
                }
                Err(e) => {
                    error!(rule_id = %rule.rule_id, sink = self.sink.name(), "Emit failed: {}", e);
                    self.metrics.record_error(e.kind());
                    report.emit_failures += 1;
                }
            }
        }

        Ok(())
    }

    /// Accumulate `inbound` into tumbling batches until it closes or shutdown
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<Document>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut batch: Vec<Document> = Vec::new();
        info!(
            interval = ?self.interval,
            evaluator = self.evaluator.name(),
            sink = self.sink.name(),
            "Alert engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let current = std::mem::take(&mut batch);
                    self.evaluate_batch(&current).await;
                }
                doc = inbound.recv() => match doc {
                    Some(doc) => batch.push(doc),
                    None => {
                        debug!("Alert inbound closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    while let Ok(doc) = inbound.try_recv() {
                        batch.push(doc);
                    }
                    break;
                }
            }
        }

        if !batch.is_empty() {
            let report = self.evaluate_batch(&batch).await;
            info!(documents = report.documents, events = report.events_emitted, "Final alert batch evaluated");
        }
        info!("Alert engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::sink::ChannelEventSink;
    use crate::alert::sync::RuleTable;
    use crate::model::{Operator, Strategy};
    use crate::query::{MetricPoint, QueryResult};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Returns queued results in order, one per evaluate call
    struct ScriptedEvaluator {
        results: Mutex<VecDeque<Result<QueryResult, String>>>,
    }

    impl ScriptedEvaluator {
        fn new(results: Vec<Result<QueryResult, String>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
            }
        }
    }

    impl QueryEvaluator for ScriptedEvaluator {
        fn evaluate(&self, _query: &str, _batch: &[Document]) -> Result<QueryResult, String> {
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(QueryResult::new()))
        }
    }

    fn point(value: f64, timestamp: i64) -> Result<QueryResult, String> {
        let mut r = QueryResult::new();
        r.insert(String::new(), vec![MetricPoint { value, timestamp }]);
        Ok(r)
    }

    fn table(func: &str) -> RuleTable {
        RuleTable::new(
            vec![Rule::new("r1", "*")],
            vec![Strategy {
                rule_id: "r1".to_string(),
                func: func.to_string(),
                op: Operator::Ge,
                threshold: 1.0,
                priority: 2,
            }],
            1,
        )
    }

    fn build_engine(
        evaluator: ScriptedEvaluator,
        func: &str,
    ) -> (AlertEngine, mpsc::Receiver<(String, String)>) {
        let (sink, rx) = ChannelEventSink::new(16);
        let engine = AlertEngine::new(
            SharedRules::from_table(table(func)),
            Arc::new(HistoryStore::new()),
            Arc::new(evaluator),
            Arc::new(sink),
            Arc::new(PipelineMetrics::new()),
        );
        (engine, rx)
    }

    #[tokio::test]
    async fn test_emits_once_window_is_full() {
        let (engine, mut rx) = build_engine(
            ScriptedEvaluator::new(vec![point(2.0, 10), point(3.0, 11)]),
            "all(#2)",
        );

        let first = engine.evaluate_batch(&[]).await;
        assert_eq!(first.points_accepted, 1);
        assert_eq!(first.events_emitted, 0);

        let second = engine.evaluate_batch(&[]).await;
        assert_eq!(second.events_emitted, 1);

        let (queue, payload) = rx.recv().await.unwrap();
        assert_eq!(queue, "event:p2");
        let event: Event = serde_json::from_str(&payload).unwrap();
        assert_eq!(event.metric_value.timestamp, 11);
        assert!(event.ets > 0);
    }

    #[tokio::test]
    async fn test_stale_point_is_rejected() {
        let (engine, _rx) = build_engine(
            ScriptedEvaluator::new(vec![point(2.0, 10), point(3.0, 10)]),
            "all(#1)",
        );
        engine.evaluate_batch(&[]).await;
        let report = engine.evaluate_batch(&[]).await;
        assert_eq!(report.points_rejected, 1);
        assert_eq!(report.events_emitted, 0);
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_tick() {
        let (engine, _rx) = build_engine(
            ScriptedEvaluator::new(vec![Err("syntax".to_string())]),
            "all(#1)",
        );
        let report = engine.evaluate_batch(&[]).await;
        assert_eq!(report.rule_failures, 1);

        let (engine, _rx) = build_engine(ScriptedEvaluator::new(vec![point(2.0, 10)]), "max(#1)");
        let report = engine.evaluate_batch(&[]).await;
        assert_eq!(report.rule_failures, 1);
        assert_eq!(report.points_accepted, 1);
    }

    #[tokio::test]
    async fn test_emit_failure_is_counted() {
        let (engine, rx) = build_engine(ScriptedEvaluator::new(vec![point(2.0, 10)]), "all(#1)");
        drop(rx);
        let report = engine.evaluate_batch(&[]).await;
        assert_eq!(report.emit_failures, 1);
        assert_eq!(report.events_emitted, 0);
    }
}
