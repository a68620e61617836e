// Managed server host state
// Feeds the liveness monitor and turns session transitions into boot/close markers

use crate::config::HealthConfig;
use crate::health::{LivenessMonitor, LivenessState};
use crate::perf::source::HttpPerfSource;
use crate::perf::PerformanceCollector;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// What the collector needs to know about the managed process
pub trait ServerHost: Send + Sync {
    /// Process is running and reported ONLINE by the health monitor
    fn is_online(&self) -> bool;

    /// Current player count, `None` when no player list is available
    fn player_count(&self) -> Option<u32>;
}

/// Host view backed by the liveness monitor and the last player list
pub struct MonitoredServer {
    liveness: Arc<LivenessMonitor>,
    running: AtomicBool,
    players: RwLock<Option<u32>>,
}

impl MonitoredServer {
    pub fn new(liveness: Arc<LivenessMonitor>) -> Self {
        Self {
            liveness,
            running: AtomicBool::new(false),
            players: RwLock::new(None),
        }
    }

    pub fn liveness(&self) -> &LivenessMonitor {
        &self.liveness
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
    }

    pub fn set_players(&self, players: Option<u32>) {
        *self.players.write() = players;
    }
}

impl ServerHost for MonitoredServer {
    fn is_online(&self) -> bool {
        self.running.load(Ordering::Relaxed) && self.liveness.state() == LivenessState::Healthy
    }

    fn player_count(&self) -> Option<u32> {
        *self.players.read()
    }
}

/// Session transition derived from two consecutive liveness readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Booted,
    Closed,
}

/// PENDING -> HEALTHY is a boot, anything -> FATAL is a close
pub fn session_transition(previous: LivenessState, current: LivenessState) -> Option<SessionEvent> {
    match (previous, current) {
        (LivenessState::Pending, LivenessState::Healthy) => Some(SessionEvent::Booted),
        (prev, LivenessState::Fatal) if prev != LivenessState::Fatal => Some(SessionEvent::Closed),
        _ => None,
    }
}

/// Polls the managed server and reports its lifecycle to the collector
pub struct HostWatcher {
    server: Arc<MonitoredServer>,
    source: Arc<HttpPerfSource>,
    collector: Arc<PerformanceCollector>,
    poll_interval: Duration,
}

impl HostWatcher {
    pub fn new(
        config: &HealthConfig,
        server: Arc<MonitoredServer>,
        source: Arc<HttpPerfSource>,
        collector: Arc<PerformanceCollector>,
    ) -> Self {
        Self {
            server,
            source,
            collector,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Run until shutdown is broadcast
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.poll_interval.as_secs(), "Host watcher started");

        let mut interval = tokio::time::interval(self.poll_interval);
        let mut session_started = Instant::now();
        let mut previous = self.server.liveness().state();
        self.server.set_running(true);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.recv() => break,
            }

            self.poll().await;

            let current = self.server.liveness().state();
            match session_transition(previous, current) {
                Some(SessionEvent::Booted) => {
                    let boot_secs = session_started.elapsed().as_secs();
                    info!(boot_secs, "Server reached HEALTHY");
                    self.collector.log_server_boot(boot_secs).await;
                }
                Some(SessionEvent::Closed) => {
                    warn!("Server stopped answering health checks");
                    self.collector.log_server_close("health check timeout").await;
                    self.server.liveness().reset();
                    self.server.set_players(None);
                    session_started = Instant::now();
                }
                None => {}
            }
            previous = self.server.liveness().state();
        }

        self.server.set_running(false);
        info!("Host watcher stopped");
    }

    async fn poll(&self) {
        match self.source.probe_health().await {
            Ok(()) => self.server.liveness().mark_healthy(),
            Err(e) => debug!(error = %e, "Health probe failed"),
        }

        match self.source.fetch_players().await {
            Ok(players) => self.server.set_players(Some(players)),
            Err(e) => {
                debug!(error = %e, "Player list unavailable");
                self.server.set_players(None);
            }
        }

        match self.source.fetch_node_memory().await {
            Ok(Some(payload)) => self.collector.log_server_node_memory(&payload).await,
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Node memory unavailable"),
        }
    }
}
