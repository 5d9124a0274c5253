//! Debug HTTP endpoints over the running pipeline

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, Router},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::alert::{RuleTableSummary, SharedRules};
use crate::error::Result;
use crate::history::{Fingerprint, HistoryStore};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::model::MetricValue;

/// Default request timeout (10 seconds)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum concurrent requests
const MAX_CONCURRENT_REQUESTS: usize = 64;

/// Shared state behind every handler
#[derive(Clone)]
pub struct DebugService {
    rules: SharedRules,
    history: Arc<HistoryStore>,
    metrics: Arc<PipelineMetrics>,
    start_time: Instant,
}

/// `GET /health` body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since the service was created
    pub uptime_seconds: u64,
}

/// Optional query group for `GET /history/{rule_id}`
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Query group; empty for the default group
    #[serde(default)]
    pub group: String,
}

impl DebugService {
    /// Create the service over the engine's shared state
    pub fn new(rules: SharedRules, history: Arc<HistoryStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            rules,
            history,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(Self::health_handler))
            .route("/metrics", get(Self::metrics_handler))
            .route("/rules", get(Self::rules_handler))
            .route("/history/{rule_id}", get(Self::history_handler))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(DEFAULT_TIMEOUT))
            .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
            .layer(CorsLayer::permissive())
    }

    async fn health_handler(State(service): State<DebugService>) -> Json<HealthResponse> {
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: crate::VERSION.to_string(),
            uptime_seconds: service.start_time.elapsed().as_secs(),
        })
    }

    async fn metrics_handler(State(service): State<DebugService>) -> Json<MetricsSnapshot> {
        Json(service.metrics.snapshot())
    }

    async fn rules_handler(State(service): State<DebugService>) -> Json<RuleTableSummary> {
        Json(service.rules.load().summary())
    }

    async fn history_handler(
        State(service): State<DebugService>,
        Path(rule_id): Path<String>,
        Query(query): Query<HistoryQuery>,
    ) -> std::result::Result<Json<Vec<MetricValue>>, StatusCode> {
        let fingerprint = Fingerprint::of_group(&rule_id, &query.group);
        service
            .history
            .get(fingerprint)
            .map(Json)
            .ok_or(StatusCode::NOT_FOUND)
    }

    /// Bind `listen` so address errors surface at startup
    pub async fn bind(listen: &str) -> Result<TcpListener> {
        Ok(TcpListener::bind(listen).await?)
    }

    /// Serve on `listener` until `shutdown` fires
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let app = self.router();
        if let Ok(addr) = listener.local_addr() {
            info!("Debug service listening on {}", addr);
        }

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!("Debug service error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RuleTable;
    use crate::model::Rule;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn service() -> DebugService {
        let rules = SharedRules::from_table(RuleTable::new(vec![Rule::new("r1", "*")], vec![], 1));
        let history = Arc::new(HistoryStore::new());
        history.push(Fingerprint::of("r1"), MetricValue::new("r1", 4.0, 100), 10);
        DebugService::new(rules, history, Arc::new(PipelineMetrics::new()))
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = service()
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health_and_rules() {
        let (status, body) = get_json("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = get_json("/rules").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);
        assert_eq!(body["rule_ids"][0], "r1");
    }

    #[tokio::test]
    async fn test_history() {
        let (status, body) = get_json("/history/r1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["value"], 4.0);

        let (status, _) = get_json("/history/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get_json("/history/r1?group=host-a").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics() {
        let (status, body) = get_json("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["documents_received"], 0);
    }
}
