//! Node daemon for beyla-network
//!
//! Responsibilities:
//! - Read flow batches from the upstream producer
//! - Feed them to the flow metrics exporter
//! - Flush metrics on shutdown

pub mod source;

use anyhow::{Context, Result};
use beyla_network::metrics::FlowMetricsExporter;
use beyla_network::ExportConfig;
use source::{forward, FlowSource};
use std::future::Future;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Path of the optional YAML export config
pub const CONFIG_ENV: &str = "BEYLA_CONFIG";

/// Bounded so a stalled exporter pushes back on the producer instead of
/// buffering without limit.
pub const CHANNEL_CAPACITY: usize = 64;

/// Loads the export config from `BEYLA_CONFIG` (if set) and applies
/// environment overrides on top.
pub fn load_config() -> Result<ExportConfig> {
    load_config_with(|key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an explicit variable lookup
pub fn load_config_with<F>(lookup: F) -> Result<ExportConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_ENV) {
        Some(path) if !path.trim().is_empty() => ExportConfig::from_file(&path)
            .with_context(|| format!("Failed to load export config from {}", path))?,
        _ => ExportConfig::default(),
    };

    config
        .apply_env(&lookup)
        .context("Invalid export config in environment")?;

    Ok(config)
}

/// Runs the source into the exporter until the source ends or `shutdown`
/// resolves, then waits for the final metrics flush.
pub async fn run<S, F>(source: S, exporter: FlowMetricsExporter, shutdown: F) -> Result<()>
where
    S: FlowSource + 'static,
    F: Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let mut producer = tokio::spawn(forward(source, tx));
    let consumer = tokio::spawn(exporter.run(rx));

    tokio::select! {
        _ = shutdown => {
            info!("Shutdown signal received");
            // Dropping the sender closes the channel and stops the collector.
            producer.abort();
        }
        result = &mut producer => {
            match result {
                Ok(Ok(batches)) => info!(batches, "Flow input exhausted"),
                Ok(Err(e)) => error!(error = %e, "Flow source failed"),
                Err(e) => error!(error = %e, "Flow source task panicked"),
            }
        }
    }

    consumer.await.context("Collector task failed")?;
    Ok(())
}
