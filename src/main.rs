//! Granary daemon
//!
//! Runs the accrual scheduler and the batch coordinator over a local SQLite
//! database.
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! granary
//!
//! # Start with custom config
//! granary --config /path/to/granary.toml
//!
//! # Override the data directory
//! granary --data-dir /data/granary
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use granary::{Config, FarmingScheduler, GranaryService};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "granary")]
#[command(about = "Farming accrual and referral reward distribution daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "GRANARY_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config)
    #[arg(long, env = "GRANARY_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("loading config")?,
        None => Config::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    info!(data_dir = ?config.storage.data_dir, "Starting granary");

    let service = Arc::new(GranaryService::open(&config).context("opening service")?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let coordinator = service.coordinator();
    let coordinator_rx = shutdown_rx.clone();
    let coordinator_task = tokio::spawn(async move {
        coordinator.run(coordinator_rx).await;
    });

    let scheduler = FarmingScheduler::new(
        service.db(),
        service.farming_engine(),
        config.farming.clone(),
    );
    let scheduler_rx = shutdown_rx;
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_rx).await;
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = coordinator_task.await;
    let _ = scheduler_task.await;

    if let Ok(stats) = service.stats() {
        info!(?stats, "Final state");
    }

    Ok(())
}
