//! Command-line entry point for alertflow

use alertflow::{init_tracing, Config, StreamEngine};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// Streaming log alerting and bulk dump
#[derive(Parser, Debug)]
#[command(name = "alertflow")]
#[command(version = alertflow::VERSION)]
#[command(about = "Evaluate alert rules over a log stream and dump it in bulk", long_about = None)]
struct Cli {
    /// Configuration file (JSON, or YAML by extension)
    #[arg(short, long, value_name = "FILE", default_value = "cfg.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON structured logging
    #[arg(long)]
    json_logs: bool,

    /// Where raw records come from
    #[arg(long, value_enum, default_value = "stdin")]
    source: SourceKind,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Newline-delimited JSON on standard input
    Stdin,
    /// Topics from `pull.kafka`
    Kafka,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    init_tracing(level, cli.json_logs || config.log.json);
    info!(version = alertflow::VERSION, config = %cli.config.display(), "Starting alertflow");

    let engine = StreamEngine::builder(config.clone())
        .start()
        .await
        .context("Failed to start stream engine")?;

    let raw_tx = engine
        .raw_sender()
        .context("Stream engine has no input channel")?;
    let metrics = engine.metrics().clone();
    let stop = engine.source_shutdown();

    let mut source = match cli.source {
        SourceKind::Stdin => tokio::spawn(async move {
            alertflow::source::run_stdin(raw_tx, metrics, stop).await;
        }),
        SourceKind::Kafka => spawn_kafka(&config, raw_tx, metrics, stop)?,
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Received shutdown signal");
            engine.shutdown().await?;
            if cli.source == SourceKind::Stdin {
                // a pending stdin read cannot be cancelled and would hold the runtime open
                std::process::exit(0);
            }
            let _ = source.await;
        }
        _ = &mut source => {
            info!("Source finished, draining pipeline");
            engine.wait().await?;
        }
    }

    Ok(())
}

#[cfg(feature = "kafka")]
fn spawn_kafka(
    config: &Config,
    raw_tx: tokio::sync::mpsc::Sender<String>,
    metrics: std::sync::Arc<alertflow::metrics::PipelineMetrics>,
    stop: tokio::sync::watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    let source = alertflow::source::kafka::KafkaSource::new(&config.pull.kafka)
        .context("Failed to create Kafka source")?;
    Ok(tokio::spawn(source.run(raw_tx, metrics, stop)))
}

#[cfg(not(feature = "kafka"))]
fn spawn_kafka(
    _config: &Config,
    _raw_tx: tokio::sync::mpsc::Sender<String>,
    _metrics: std::sync::Arc<alertflow::metrics::PipelineMetrics>,
    _stop: tokio::sync::watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    anyhow::bail!("Kafka source requires the 'kafka' feature")
}
