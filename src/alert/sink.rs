//! Priority-routed hand-off of triggered events

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::error::{AlertFlowError, Result};
use crate::model::Event;

/// Queue an event of the given priority is appended to
pub fn queue_name(priority: i32) -> String {
    format!("event:p{}", priority)
}

/// Outbound event queue
///
/// Delivery is at-most-once: a failed emit is reported to the caller and
/// never retried here.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    /// Serialize `event` and append it to `queue_name(event.priority())`
    async fn emit(&self, event: &Event) -> Result<()>;

    /// Sink name for logs
    fn name(&self) -> &str;
}

/// Default bound on connecting to Redis and on each LPUSH
pub const DEFAULT_REDIS_TIMEOUT: Duration = Duration::from_secs(2);

/// Appends events to Redis lists with `LPUSH`
///
/// Connecting and every push are bounded by a timeout; an unresponsive
/// server surfaces as an emit error and the connection is dropped.
pub struct RedisEventSink {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisEventSink {
    /// Create a sink for `url`; the connection is opened on first emit
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout: DEFAULT_REDIS_TIMEOUT,
        })
    }

    /// Bound connecting and each push by `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        debug!("Opening redis connection");
        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: i64 = conn.lpush(queue, payload).await?;
        Ok(())
    }

    async fn reset(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl EventSink for RedisEventSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        let queue = queue_name(event.priority());
        let payload = serde_json::to_string(event)?;

        let message = match tokio::time::timeout(self.timeout, self.push(&queue, payload)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no reply within {:?}", self.timeout),
        };

        warn!(queue = %queue, "LPUSH failed, dropping connection: {}", message);
        self.reset().await;
        Err(AlertFlowError::Emit { queue, message })
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// Forwards `(queue, payload)` pairs over an in-process channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::Sender<(String, String)>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that observes its output
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(String, String)>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        let queue = queue_name(event.priority());
        let payload = serde_json::to_string(event)?;
        self.tx
            .try_send((queue.clone(), payload))
            .map_err(|e| AlertFlowError::Emit {
                queue,
                message: e.to_string(),
            })
    }

    fn name(&self) -> &str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricValue, Operator, Rule, Strategy};
    use pretty_assertions::assert_eq;

    fn event(priority: i32) -> Event {
        Event {
            rule: Rule::new("r1", "*"),
            metric_value: MetricValue::new("r1", 3.0, 100),
            strategy: Strategy {
                rule_id: "r1".to_string(),
                func: "all(#1)".to_string(),
                op: Operator::Ge,
                threshold: 1.0,
                priority,
            },
            ets: 101,
        }
    }

    #[test]
    fn test_queue_name() {
        assert_eq!(queue_name(0), "event:p0");
        assert_eq!(queue_name(3), "event:p3");
        assert_eq!(queue_name(-1), "event:p-1");
    }

    #[tokio::test]
    async fn test_channel_sink_routes_by_priority() {
        let (sink, mut rx) = ChannelEventSink::new(4);
        sink.emit(&event(2)).await.unwrap();

        let (queue, payload) = rx.recv().await.unwrap();
        assert_eq!(queue, "event:p2");
        let decoded: Event = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, event(2));
    }

    #[tokio::test]
    async fn test_channel_sink_reports_failure() {
        let (sink, rx) = ChannelEventSink::new(1);
        drop(rx);
        let err = sink.emit(&event(1)).await.unwrap_err();
        assert!(matches!(err, AlertFlowError::Emit { ref queue, .. } if queue == "event:p1"));
    }

    #[tokio::test]
    async fn test_redis_sink_times_out_on_silent_server() {
        // accepts connections and never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let sink = RedisEventSink::new(&format!("redis://{}", addr))
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        let result = tokio::time::timeout(Duration::from_secs(5), sink.emit(&event(4)))
            .await
            .expect("emit must return once its timeout elapses");
        let err = result.unwrap_err();
        assert!(matches!(err, AlertFlowError::Emit { ref queue, .. } if queue == "event:p4"));
        assert!(sink.connection.lock().await.is_none());

        server.abort();
    }

    #[test]
    fn test_redis_sink_rejects_bad_url() {
        assert!(RedisEventSink::new("not a url").is_err());
    }
}
