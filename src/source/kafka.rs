//! Kafka/Redpanda source

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    message::Message,
    ClientConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::annotate_kafka;
use crate::config::KafkaSourceConfig;
use crate::error::{AlertFlowError, ErrorKind, Result};
use crate::metrics::PipelineMetrics;

/// Consumes the configured topics and forwards annotated payloads
pub struct KafkaSource {
    consumer: StreamConsumer,
    topics: Vec<String>,
}

impl KafkaSource {
    /// Create the consumer and subscribe
    pub fn new(config: &KafkaSourceConfig) -> Result<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .create()
            .map_err(|e| AlertFlowError::Configuration(format!("Failed to create consumer: {}", e)))?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| AlertFlowError::Configuration(format!("Failed to subscribe: {}", e)))?;
        info!("Subscribed to topics: {:?}", config.topics);

        Ok(Self {
            consumer,
            topics: config.topics.clone(),
        })
    }

    /// Forward messages until shutdown or the raw channel closes
    pub async fn run(
        self,
        tx: mpsc::Sender<String>,
        metrics: Arc<PipelineMetrics>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                msg = self.consumer.recv() => match msg {
                    Ok(msg) => {
                        let Some(payload) = msg.payload() else {
                            debug!(topic = msg.topic(), offset = msg.offset(), "Empty payload");
                            continue;
                        };
                        metrics.increment_received();
                        match annotate_kafka(payload, msg.topic(), msg.partition(), msg.offset()) {
                            Ok(record) => {
                                if tx.send(record).await.is_err() {
                                    warn!("Raw channel closed, stopping Kafka source");
                                    break;
                                }
                            }
                            Err(e) => {
                                metrics.record_error(ErrorKind::Data);
                                debug!(topic = msg.topic(), offset = msg.offset(), "Skipping message: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        metrics.record_error(ErrorKind::Transient);
                        error!("Kafka receive error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!(topics = ?self.topics, "Kafka source stopped");
    }
}
