// fxmon daemon entry point
// Wires the host watcher and perf collector loops and handles graceful shutdown

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use fxmon::clock::SystemClock;
use fxmon::config::FxmonConfig;
use fxmon::health::LivenessMonitor;
use fxmon::host::{HostWatcher, MonitoredServer};
use fxmon::perf::source::HttpPerfSource;
use fxmon::perf::PerformanceCollector;
use fxmon::{cli, observability, signals};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    match cli.command {
        cli::Commands::Start { config, verbose } => {
            observability::init(verbose)?;
            cli::print_banner();
            run_daemon(config).await
        }
        command => cli::commands::execute(command).await,
    }
}

/// Run the telemetry daemon until SIGTERM/SIGINT
async fn run_daemon(config_path: String) -> Result<()> {
    info!("Starting fxmon daemon");

    let config = FxmonConfig::load(&config_path)?;
    info!(
        base_url = %config.server.base_url,
        data_file = %config.perf.data_file,
        "✓ Configuration loaded"
    );

    let shutdown_signal = signals::create_shutdown_listener()?;
    let coordinator = signals::ShutdownCoordinator::new();
    info!("✓ Signal handlers installed (SIGTERM, SIGINT)");

    let liveness = Arc::new(LivenessMonitor::from_config(&config.health));
    let server = Arc::new(MonitoredServer::new(liveness));
    let source = Arc::new(
        HttpPerfSource::new(&config.server).context("Failed to build HTTP client")?,
    );
    info!("✓ Managed server client ready");

    let collector = Arc::new(
        PerformanceCollector::open(
            config.perf.clone(),
            source.clone(),
            server.clone(),
            Arc::new(SystemClock),
        )
        .await,
    );
    info!("✓ Performance collector initialized");

    let collector_handle = collector.clone().spawn(coordinator.subscribe());
    let watcher = HostWatcher::new(&config.health, server, source, collector.clone());
    let watcher_handle = tokio::spawn(watcher.run(coordinator.subscribe()));
    info!("✓ Host watcher and collector loops started");

    println!();
    cli::success("fxmon is running");
    cli::info(&format!("Monitoring {}", config.server.base_url.bright_white()));
    cli::info(&format!("Perf history: {}", config.perf.data_file.bright_white()));
    cli::info("Press Ctrl+C for graceful shutdown");
    println!();

    shutdown_signal.await;
    info!("🛑 Shutdown signal received - Stopping loops");
    coordinator.trigger();

    for (name, handle) in [("collector", collector_handle), ("host watcher", watcher_handle)] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    info!(events = collector.log_snapshot().await.len(), "✓ Graceful shutdown complete");
    Ok(())
}
