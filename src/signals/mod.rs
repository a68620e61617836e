// Unix signal handling for graceful shutdown
// SIGTERM/SIGINT stop the collector and host watcher loops

use anyhow::Result;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Resolves once SIGTERM or SIGINT is received
pub fn create_shutdown_listener() -> Result<impl std::future::Future<Output = ()>> {
    let mut signals = Signals::new([SIGTERM, SIGINT])?;

    Ok(async move {
        while let Some(signal) = signals.next().await {
            match signal {
                SIGTERM | SIGINT => {
                    info!(signal, "Shutdown signal received");
                    break;
                }
                other => debug!(signal = other, "Ignoring signal"),
            }
        }
    })
}

/// Fans a single shutdown out to every background loop
pub struct ShutdownCoordinator {
    tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    /// Receiver for one background loop
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let receivers = self.tx.send(()).unwrap_or(0);
        info!(receivers, "Shutdown broadcast");
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
