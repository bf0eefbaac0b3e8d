use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use dispatch_core::telemetry_export::{write_fleet_parquet, write_snapshot_history_parquet};
use dispatch_sim::cli::Cli;
use dispatch_sim::shutdown::wait_for_shutdown_signal;
use dispatch_sim::simulation::run_simulation;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.dispatch_config()?;
    let options = cli.simulation_options()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            match wait_for_shutdown_signal().await {
                Ok(()) => {
                    info!("shutdown requested");
                    on_signal.cancel();
                }
                Err(err) => warn!(%err, "signal handler unavailable"),
            }
        });
        run_simulation(config, options, cancel).await
    })?;

    let counts = report.coordinator.final_snapshot.counts;
    println!(
        "assigned={} completed={} rejected={} timed_out={}",
        counts.assigned, counts.completed, counts.rejected, counts.timed_out
    );

    if let Some(dir) = &cli.export_parquet {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        write_snapshot_history_parquet(dir.join("snapshots.parquet"), &report.coordinator.history)
            .map_err(|err| anyhow::anyhow!("writing snapshot history: {err}"))?;
        write_fleet_parquet(dir.join("fleet.parquet"), &report.coordinator.final_snapshot)
            .map_err(|err| anyhow::anyhow!("writing fleet: {err}"))?;
        info!(dir = %dir.display(), "parquet export written");
    }
    Ok(())
}
