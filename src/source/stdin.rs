use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::metrics::PipelineMetrics;

/// Forward newline-delimited records from `reader` until EOF or shutdown
///
/// Blank lines are skipped. Returns the number of records forwarded.
pub async fn run_lines<R>(
    reader: R,
    tx: mpsc::Sender<String>,
    metrics: Arc<PipelineMetrics>,
    mut shutdown: watch::Receiver<bool>,
) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    metrics.increment_received();
                    if tx.send(line.to_string()).await.is_err() {
                        warn!("Raw channel closed, stopping source");
                        break;
                    }
                    forwarded += 1;
                }
                Ok(None) => {
                    info!(forwarded, "Source reached end of input");
                    break;
                }
                Err(e) => {
                    warn!("Source read failed: {}", e);
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    forwarded
}

/// Forward records read from standard input
pub async fn run_stdin(
    tx: mpsc::Sender<String>,
    metrics: Arc<PipelineMetrics>,
    shutdown: watch::Receiver<bool>,
) -> u64 {
    run_lines(BufReader::new(tokio::io::stdin()), tx, metrics, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_lines_skips_blank_lines() {
        let input: &[u8] = b"{\"a\":1}\n\n  \n{\"b\":2}\n";
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);
        let metrics = Arc::new(PipelineMetrics::new());

        let n = run_lines(input, tx, metrics.clone(), shutdown).await;
        assert_eq!(n, 2);
        assert_eq!(rx.recv().await.unwrap(), "{\"a\":1}");
        assert_eq!(rx.recv().await.unwrap(), "{\"b\":2}");
        assert!(rx.recv().await.is_none());
        assert_eq!(metrics.snapshot().documents_received, 2);
    }
}
