//! Pipeline runtime: builds every task and owns shutdown
//!
//! ```text
//! source ─raw─> enrichment ─inbound─> Dispatcher ─┬─alert─> AlertEngine ──> EventSink
//!                                                 └─dump──> BulkDumper  ──> BulkSink
//! RuleSynchronizer ──> SharedRules <── AlertEngine
//! ```
//!
//! Shutdown runs in two stages. Sources are told to stop and the engine's
//! raw sender is dropped, so end-of-stream cascades through enrichment, the
//! dispatcher and both consumers, each draining what it holds. Background
//! loops (synchronizer, metrics reporter, debug service) are stopped after
//! the stream has drained.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alert::{AlertEngine, EventSink, RedisEventSink, RuleSynchronizer, SharedRules};
use crate::config::{Config, RuleStoreConfig, RuleStoreKind};
use crate::dump::{BulkDumper, BulkSink, HttpBulkSink};
use crate::error::{AlertFlowError, Result};
use crate::history::HistoryStore;
use crate::metrics::{spawn_metrics_reporter, PipelineMetrics};
use crate::pipeline::{run_enrichment, Dispatcher, Enricher, TimestampEnricher};
use crate::query::{CountEvaluator, QueryEvaluator};
use crate::shutdown::shutdown_channel;
use crate::store::{FileRuleStore, RuleStore};

/// Name of the dispatcher output feeding the alert engine
pub const ALERT_OUTPUT: &str = "alert";

/// Name of the dispatcher output feeding the bulk dumper
pub const DUMP_OUTPUT: &str = "dump";

/// Builder for [`StreamEngine`]
///
/// Collaborators left unset are created from the configuration.
pub struct StreamEngineBuilder {
    config: Config,
    evaluator: Option<Arc<dyn QueryEvaluator>>,
    enricher: Option<Arc<dyn Enricher>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    event_sink: Option<Arc<dyn EventSink>>,
    bulk_sink: Option<Arc<dyn BulkSink>>,
}

impl StreamEngineBuilder {
    /// Create a builder for `config`
    pub fn new(config: Config) -> Self {
        Self {
            config,
            evaluator: None,
            enricher: None,
            rule_store: None,
            event_sink: None,
            bulk_sink: None,
        }
    }

    /// Use a specific query evaluator (default [`CountEvaluator`])
    pub fn with_evaluator(mut self, evaluator: Arc<dyn QueryEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Use a specific enricher (default [`TimestampEnricher`])
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Use a specific rule store instead of `alert.rule_store`
    pub fn with_rule_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(store);
        self
    }

    /// Use a specific event sink instead of Redis
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    /// Use a specific bulk sink instead of HTTP
    pub fn with_bulk_sink(mut self, sink: Arc<dyn BulkSink>) -> Self {
        self.bulk_sink = Some(sink);
        self
    }

    /// Validate the configuration, load rules and spawn every task
    pub async fn start(self) -> Result<StreamEngine> {
        StreamEngine::start(self).await
    }
}

async fn rule_store_from_config(config: &RuleStoreConfig) -> Result<Arc<dyn RuleStore>> {
    match config.kind {
        RuleStoreKind::File => {
            let path = config.path.clone().ok_or_else(|| {
                AlertFlowError::Configuration("File rule store requires a path".to_string())
            })?;
            Ok(Arc::new(FileRuleStore::new(path)))
        }
        RuleStoreKind::Mysql => mysql_rule_store(config.url.as_deref().unwrap_or_default()).await,
    }
}

#[cfg(feature = "mysql")]
async fn mysql_rule_store(url: &str) -> Result<Arc<dyn RuleStore>> {
    Ok(Arc::new(crate::store::MySqlRuleStore::connect(url).await?))
}

#[cfg(not(feature = "mysql"))]
async fn mysql_rule_store(_url: &str) -> Result<Arc<dyn RuleStore>> {
    Err(AlertFlowError::Configuration(
        "MySQL rule store requires the 'mysql' feature".to_string(),
    ))
}

/// Handle to a running pipeline
pub struct StreamEngine {
    raw_tx: Option<mpsc::Sender<String>>,
    rules: SharedRules,
    history: Arc<HistoryStore>,
    metrics: Arc<PipelineMetrics>,
    stop_sources: watch::Sender<bool>,
    stop_background: watch::Sender<bool>,
    stream_tasks: Vec<(&'static str, JoinHandle<()>)>,
    background_tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_timeout: Duration,
}

impl StreamEngine {
    /// Create a builder
    pub fn builder(config: Config) -> StreamEngineBuilder {
        StreamEngineBuilder::new(config)
    }

    async fn start(builder: StreamEngineBuilder) -> Result<Self> {
        let config = builder.config;
        config.validate()?;

        let metrics = Arc::new(PipelineMetrics::new());
        let history = Arc::new(HistoryStore::new());
        let rules = SharedRules::new();
        let (stop_sources, _) = shutdown_channel();
        let (stop_background, background_rx) = shutdown_channel();

        let mut stream_tasks = Vec::new();
        let mut background_tasks = Vec::new();
        let mut dispatcher = Dispatcher::new(metrics.clone());

        if config.alert.enabled {
            let store = match builder.rule_store {
                Some(store) => store,
                None => rule_store_from_config(&config.alert.rule_store).await?,
            };
            let sink: Arc<dyn EventSink> = match builder.event_sink {
                Some(sink) => sink,
                None => Arc::new(
                    RedisEventSink::new(&config.alert.redis_url)?
                        .with_timeout(config.alert.redis_timeout()),
                ),
            };
            let evaluator = builder
                .evaluator
                .unwrap_or_else(|| Arc::new(CountEvaluator::new()));

            let synchronizer = RuleSynchronizer::new(
                store,
                rules.clone(),
                config.alert.sync_interval(),
                metrics.clone(),
            );
            synchronizer.initial_load().await?;
            background_tasks.push((
                "rule-sync",
                tokio::spawn(synchronizer.run(background_rx.clone())),
            ));

            let alert_rx = dispatcher.output(ALERT_OUTPUT, config.pipeline.alert_buffer);
            let engine = AlertEngine::new(
                rules.clone(),
                history.clone(),
                evaluator,
                sink,
                metrics.clone(),
            )
            .with_interval(config.alert.interval())
            .with_history_cap(config.alert.history_cap);
            stream_tasks.push((
                "alert",
                tokio::spawn(engine.run(alert_rx, background_rx.clone())),
            ));
        }

        if config.dump.es.enabled {
            let es = &config.dump.es;
            let sink: Arc<dyn BulkSink> = match builder.bulk_sink {
                Some(sink) => sink,
                None => Arc::new(HttpBulkSink::new(es.bulk_url.clone(), es.request_timeout())?),
            };
            let dump_rx = dispatcher.output(DUMP_OUTPUT, config.pipeline.dump_buffer);
            let dumper = BulkDumper::new(sink, es, metrics.clone());
            stream_tasks.push((
                "dump",
                tokio::spawn(dumper.run(dump_rx, background_rx.clone())),
            ));
        }

        #[cfg(feature = "service")]
        if config.http.enabled {
            let listener = crate::service::DebugService::bind(&config.http.listen).await?;
            let service =
                crate::service::DebugService::new(rules.clone(), history.clone(), metrics.clone());
            background_tasks.push((
                "http",
                tokio::spawn(service.serve(listener, background_rx.clone())),
            ));
        }

        let (raw_tx, raw_rx) = mpsc::channel::<String>(config.pipeline.raw_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.pipeline.inbound_buffer);
        let enricher = builder
            .enricher
            .unwrap_or_else(|| Arc::new(TimestampEnricher::new()));

        stream_tasks.push((
            "enrichment",
            tokio::spawn(run_enrichment(raw_rx, enricher, inbound_tx, metrics.clone())),
        ));
        stream_tasks.push((
            "dispatcher",
            tokio::spawn(dispatcher.run(inbound_rx, background_rx.clone())),
        ));
        background_tasks.push((
            "metrics",
            spawn_metrics_reporter(
                metrics.clone(),
                config.pipeline.metrics_interval(),
                background_rx,
            ),
        ));

        info!(
            alert = config.alert.enabled,
            dump = config.dump.es.enabled,
            tasks = stream_tasks.len() + background_tasks.len(),
            "Stream engine started"
        );

        Ok(Self {
            raw_tx: Some(raw_tx),
            rules,
            history,
            metrics,
            stop_sources,
            stop_background,
            stream_tasks,
            background_tasks,
            shutdown_timeout: config.pipeline.shutdown_timeout(),
        })
    }

    /// Sender for raw records; every clone must be dropped for the stream to drain
    pub fn raw_sender(&self) -> Option<mpsc::Sender<String>> {
        self.raw_tx.clone()
    }

    /// Signal sources should watch to know when to stop
    pub fn source_shutdown(&self) -> watch::Receiver<bool> {
        self.stop_sources.subscribe()
    }

    /// Current rule table handle
    pub fn rules(&self) -> &SharedRules {
        &self.rules
    }

    /// History store
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Pipeline metrics
    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Drop the engine's raw sender so the stream drains once sources finish
    pub fn close_input(&mut self) {
        self.raw_tx = None;
    }

    /// Wait for the stream to drain on its own, then stop background tasks
    ///
    /// Used when a finite source has reached end of input.
    pub async fn wait(mut self) -> Result<()> {
        self.close_input();
        for (name, handle) in self.stream_tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = name, "Task ended abnormally: {}", e);
            }
        }
        self.shutdown().await
    }

    /// Stop sources, drain the stream, then stop background tasks
    pub async fn shutdown(mut self) -> Result<()> {
        info!("Stream engine shutting down");
        let _ = self.stop_sources.send(true);
        self.close_input();

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let stream_ok = join_until(&mut self.stream_tasks, deadline).await;

        let _ = self.stop_background.send(true);
        let background_ok = join_until(&mut self.background_tasks, deadline).await;
        if !stream_ok {
            // stream tasks stuck on a full channel observe the background signal too
            join_until(&mut self.stream_tasks, deadline).await;
        }

        let leftover: Vec<&str> = self
            .stream_tasks
            .iter()
            .chain(self.background_tasks.iter())
            .map(|(name, _)| *name)
            .collect();
        if leftover.is_empty() && background_ok {
            info!("Stream engine stopped");
            Ok(())
        } else {
            for (_, handle) in self.stream_tasks.iter().chain(self.background_tasks.iter()) {
                handle.abort();
            }
            Err(AlertFlowError::Shutdown(format!(
                "tasks did not stop within {:?}: {:?}",
                self.shutdown_timeout, leftover
            )))
        }
    }
}

/// Join tasks until `deadline`; unfinished tasks stay in `tasks`
async fn join_until(
    tasks: &mut Vec<(&'static str, JoinHandle<()>)>,
    deadline: tokio::time::Instant,
) -> bool {
    let mut remaining = Vec::new();
    for (name, mut handle) in tasks.drain(..) {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = name, "Task ended abnormally: {}", e),
            Err(_) => {
                warn!(task = name, "Task did not stop in time");
                remaining.push((name, handle));
            }
        }
    }
    let done = remaining.is_empty();
    *tasks = remaining;
    done
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::ChannelEventSink;
    use crate::model::{Operator, Rule, Strategy};
    use async_trait::async_trait;

    struct StaticStore;

    #[async_trait]
    impl RuleStore for StaticStore {
        async fn load_rules(&self) -> Result<Vec<Rule>> {
            Ok(vec![Rule::new("nginx", "type=nginx")])
        }

        async fn load_strategies(&self) -> Result<Vec<Strategy>> {
            Ok(vec![Strategy {
                rule_id: "nginx".to_string(),
                func: "all(#1)".to_string(),
                op: Operator::Ge,
                threshold: 2.0,
                priority: 1,
            }])
        }

        fn name(&self) -> &str {
            "static"
        }
    }

    #[tokio::test]
    async fn test_shutdown_flushes_final_batch() {
        let (sink, mut events) = ChannelEventSink::new(8);
        let engine = StreamEngine::builder(Config::default())
            .with_rule_store(Arc::new(StaticStore))
            .with_event_sink(Arc::new(sink))
            .start()
            .await
            .unwrap();
        assert_eq!(engine.rules().load().rules.len(), 1);

        let tx = engine.raw_sender().unwrap();
        for _ in 0..3 {
            tx.send(r#"{"type":"nginx"}"#.to_string()).await.unwrap();
        }
        tx.send(r#"{"type":"syslog"}"#.to_string()).await.unwrap();
        drop(tx);

        let metrics = engine.metrics().clone();
        engine.shutdown().await.unwrap();

        let (queue, payload) = events.recv().await.unwrap();
        assert_eq!(queue, "event:p1");
        assert!(payload.contains("\"value\":3.0"));
        assert_eq!(metrics.snapshot().documents_enriched, 4);
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::builder()
            .rule_file(dir.path().join("missing.yaml"))
            .build();
        let (sink, _events) = ChannelEventSink::new(1);
        let result = StreamEngine::builder(config)
            .with_event_sink(Arc::new(sink))
            .start()
            .await;
        assert!(matches!(result, Err(AlertFlowError::Store(_))));
    }
}
