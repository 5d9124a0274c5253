use async_trait::async_trait;
use std::time::Duration;

use crate::error::{AlertFlowError, Result};

/// Destination of flushed bulk bodies
#[async_trait]
pub trait BulkSink: Send + Sync + 'static {
    /// Deliver one NDJSON body; any non-success outcome is an error
    async fn flush(&self, body: String) -> Result<()>;

    /// Sink name for logs
    fn name(&self) -> &str;
}

/// POSTs bulk bodies to an Elasticsearch-compatible `_bulk` endpoint
#[derive(Debug, Clone)]
pub struct HttpBulkSink {
    client: reqwest::Client,
    bulk_url: String,
}

impl HttpBulkSink {
    /// Create a sink for `bulk_url` with a per-request timeout
    pub fn new(bulk_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AlertFlowError::Configuration(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            bulk_url: bulk_url.into(),
        })
    }

    /// Endpoint bodies are posted to
    pub fn bulk_url(&self) -> &str {
        &self.bulk_url
    }
}

#[async_trait]
impl BulkSink for HttpBulkSink {
    async fn flush(&self, body: String) -> Result<()> {
        let resp = self
            .client
            .post(&self.bulk_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AlertFlowError::Bulk(format!(
                "{} returned {}: {}",
                self.bulk_url,
                status,
                text.chars().take(256).collect::<String>()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
