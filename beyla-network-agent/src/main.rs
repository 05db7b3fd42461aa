//! beyla-network-agent - feeds flow batches to the OTLP metrics exporter
//!
//! Flows are read as newline-delimited JSON from stdin until EOF or Ctrl+C.

use anyhow::{Context, Result};
use beyla_network::metrics::metrics_exporter_provider;
use beyla_network_agent::source::ThreadedNdjsonSource;
use beyla_network_agent::{load_config, run};
use std::io::BufReader;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("beyla-network-agent v{} starting", beyla_network::VERSION);

    let config = load_config()?;
    let exporter =
        metrics_exporter_provider(&config).context("Failed to set up metrics export")?;

    // stdin is read on its own thread; a quiet pipe must not block exit.
    let source = ThreadedNdjsonSource::spawn(BufReader::new(std::io::stdin()))?;

    run(source, exporter, async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    info!("beyla-network-agent stopped");
    Ok(())
}
