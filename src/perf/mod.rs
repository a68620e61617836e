// Performance Collector Module
// Periodic sampling of server tick counters into a persisted, retention-thinned history

pub mod codec;
pub mod retention;
pub mod schema;
pub mod source;
pub mod store;
pub mod summary;
pub mod types;

use crate::clock::Clock;
use crate::config::PerfConfig;
use crate::error::Result;
use crate::host::ServerHost;
use arc_swap::ArcSwap;
use retention::{optimize_log, RetentionPolicy};
use serde::Serialize;
use source::PerfSource;
use std::sync::Arc;
use store::PerfStore;
use summary::PerfSummary;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::{
    DataPoint, LogEvent, MemoryUsage, PerfBoundaries, PerfCountersSet, PerfDocument,
    PerfHistogramSet,
};

/// Latest cached values, published as a whole after every mutation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentStats {
    pub fxs_memory: Option<f64>,
    pub node_memory: Option<MemoryUsage>,
    /// Histogram of the last collection interval
    pub perf: Option<PerfHistogramSet>,
    pub players: Option<u32>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone)]
struct SavedSample {
    ts: i64,
    counters: PerfCountersSet,
}

#[derive(Debug, Default)]
struct CollectorState {
    log: Vec<LogEvent>,
    last_boundaries: Option<PerfBoundaries>,
    /// Counters of the last full sample, baseline of the interval histogram
    last_counters: Option<PerfCountersSet>,
    /// Counters of the last persisted sample, baseline of the saved histogram
    last_saved: Option<SavedSample>,
    recent: RecentStats,
}

impl CollectorState {
    fn reset_caches(&mut self) {
        self.last_counters = None;
        self.last_saved = None;
        self.recent = RecentStats::default();
    }
}

/// Performance collector for one managed server.
///
/// Every mutating operation holds the state lock for its whole duration,
/// including network fetches and the file rewrite, so ticks and lifecycle
/// events never interleave. Readers of [`recent_stats`](Self::recent_stats)
/// never take that lock.
pub struct PerformanceCollector {
    config: PerfConfig,
    policy: RetentionPolicy,
    store: PerfStore,
    source: Arc<dyn PerfSource>,
    host: Arc<dyn ServerHost>,
    clock: Arc<dyn Clock>,
    state: Mutex<CollectorState>,
    recent: ArcSwap<RecentStats>,
}

impl PerformanceCollector {
    pub fn new(
        config: PerfConfig,
        source: Arc<dyn PerfSource>,
        host: Arc<dyn ServerHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy: RetentionPolicy::from_config(&config),
            store: PerfStore::new(&config.data_file),
            config,
            source,
            host,
            clock,
            state: Mutex::new(CollectorState::default()),
            recent: ArcSwap::from_pointee(RecentStats::default()),
        }
    }

    /// Create a collector and load its history from disk
    pub async fn open(
        config: PerfConfig,
        source: Arc<dyn PerfSource>,
        host: Arc<dyn ServerHost>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let collector = Self::new(config, source, host, clock);
        collector.load().await;
        collector
    }

    /// Replace the in-memory history with the data file contents.
    /// Missing, unreadable or invalid files start a fresh history.
    pub async fn load(&self) {
        let mut state = self.state.lock().await;
        let path = self.store.path().display().to_string();

        let document = match self.store.read().await {
            Ok(Some(raw)) => match schema::decode_document(&raw) {
                Ok(document) => Some(document),
                Err(e) => {
                    warn!(path = %path, error = %e, "Discarding invalid perf data file");
                    None
                }
            },
            Ok(None) => {
                info!(path = %path, "No perf history found, starting fresh");
                None
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to read perf data file");
                None
            }
        };

        match document {
            Some(document) => {
                state.log = optimize_log(document.log, &self.policy, self.clock.now_ms());
                state.last_boundaries = document.last_perf_boundaries;
                info!(path = %path, events = state.log.len(), "Perf history loaded");
            }
            None => {
                state.log.clear();
                state.last_boundaries = None;
            }
        }
        state.last_counters = None;
        state.last_saved = None;
    }

    /// Optimize the log and rewrite the data file. Failures are logged only;
    /// the next successful save carries the latest state.
    async fn save(&self, state: &mut CollectorState) {
        let log = std::mem::take(&mut state.log);
        state.log = optimize_log(log, &self.policy, self.clock.now_ms());

        let document = PerfDocument {
            version: schema::PERF_LOG_VERSION,
            last_perf_boundaries: state.last_boundaries.clone(),
            log: state.log.clone(),
        };

        let result = match schema::encode_document(&document) {
            Ok(raw) => self.store.write(&raw).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(path = %self.store.path().display(), error = %e, "Failed to save perf history");
        }
    }

    /// Wall clock time, never earlier than the last logged event
    fn next_event_ts(&self, state: &CollectorState) -> i64 {
        let now = self.clock.now_ms();
        state.log.last().map_or(now, |last| now.max(last.ts()))
    }

    fn publish(&self, state: &CollectorState) {
        self.recent.store(Arc::new(state.recent.clone()));
    }

    /// Record that the server finished booting after `boot_time` seconds
    pub async fn log_server_boot(&self, boot_time: u64) {
        let mut state = self.state.lock().await;
        state.reset_caches();
        self.publish(&state);

        // A boot right after a boot means the previous one never produced data
        if state.log.last().is_some_and(LogEvent::is_boot) {
            state.log.pop();
        }

        let ts = self.next_event_ts(&state);
        state.log.push(LogEvent::Boot { ts, boot_time });
        info!(boot_time, "Logged server boot");

        self.save(&mut state).await;
    }

    /// Record that the server stopped
    pub async fn log_server_close(&self, reason: &str) {
        let mut state = self.state.lock().await;
        state.reset_caches();
        self.publish(&state);

        if state.log.last().is_some_and(LogEvent::is_close) {
            debug!(reason, "Server already marked as closed");
            return;
        }

        if state.log.last().is_some_and(LogEvent::is_boot) {
            info!(reason, "Server closed before producing data, dropping boot marker");
            state.log.pop();
        } else {
            let ts = self.next_event_ts(&state);
            state.log.push(LogEvent::Close {
                ts,
                reason: reason.to_string(),
            });
            info!(reason, "Logged server close");
        }

        self.save(&mut state).await;
    }

    /// Cache the admin host memory usage reported as `{used, total}` bytes
    pub async fn log_server_node_memory(&self, payload: &serde_json::Value) {
        let usage = match schema::parse_memory_payload(payload) {
            Ok(usage) => usage,
            Err(e) => {
                warn!(error = %e, "Invalid node memory payload");
                return;
            }
        };

        let mut state = self.state.lock().await;
        state.recent.node_memory = Some(usage);
        self.publish(&state);
    }

    /// One sampling cycle.
    ///
    /// Skips silently while the server is offline or the sample carries too
    /// few ticks. A failed counter fetch is returned with all state intact.
    pub async fn collect_stats(&self) -> Result<()> {
        if !self.host.is_online() {
            debug!("Server not online, skipping perf collection");
            return Ok(());
        }
        let Some(players) = self.host.player_count() else {
            debug!("Player list unavailable, skipping perf collection");
            return Ok(());
        };

        let mut state = self.state.lock().await;

        let (perf_result, memory_result) =
            tokio::join!(self.source.fetch_perf(), self.source.fetch_fxs_memory());
        let sample = perf_result?;

        let min_ticks = self.config.min_ticks;
        if sample.counters.iter().any(|(_, c)| c.count < min_ticks) {
            debug!(
                main_ticks = sample.counters.sv_main.count,
                min_ticks, "Not enough ticks for a perf sample"
            );
            return Ok(());
        }

        match memory_result {
            Ok(Some(usage)) => state.recent.fxs_memory = Some(usage.used),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Memory fetch failed, keeping previous value"),
        }

        Self::check_boundaries(&mut state, &sample.boundaries);
        Self::check_counter_reset(&mut state, sample.counters.sv_main.count);

        let interval_hist = codec::histogram_set(&codec::delta_set(
            &sample.counters,
            state.last_counters.as_ref(),
        ));
        state.last_counters = Some(sample.counters.clone());

        let now = self.next_event_ts(&state);
        state.recent.perf = Some(interval_hist.clone());
        state.recent.players = Some(players);
        state.recent.updated_at = Some(now);
        self.publish(&state);

        let resolution_ms = self.config.save_resolution_secs as i64 * 1000;
        let perf = match &state.last_saved {
            None => interval_hist,
            Some(saved) if now - saved.ts >= resolution_ms => codec::histogram_set(
                &codec::delta_set(&sample.counters, Some(&saved.counters)),
            ),
            Some(_) => {
                debug!("Within save resolution, not persisting");
                return Ok(());
            }
        };

        state.last_saved = Some(SavedSample {
            ts: now,
            counters: sample.counters,
        });

        let point = DataPoint {
            ts: now,
            players,
            fxs_memory: state.recent.fxs_memory,
            node_memory: state.recent.node_memory.map(|m| m.used),
            perf,
        };
        state.log.push(LogEvent::Data(point));

        self.save(&mut state).await;
        Ok(())
    }

    /// Histories under different bucket boundaries are not comparable
    fn check_boundaries(state: &mut CollectorState, boundaries: &PerfBoundaries) {
        match state.last_boundaries.as_ref().map(|known| known == boundaries) {
            Some(true) => return,
            Some(false) => {
                warn!(events = state.log.len(), "Perf boundaries changed, discarding history");
                state.log.clear();
            }
            None => info!(buckets = boundaries.len(), "Adopting perf boundaries"),
        }

        state.last_boundaries = Some(boundaries.clone());
        state.last_counters = None;
        state.last_saved = None;
    }

    fn check_counter_reset(state: &mut CollectorState, main_count: u64) {
        if state
            .last_counters
            .as_ref()
            .is_some_and(|last| main_count < last.sv_main.count)
        {
            info!(main_count, "Perf counters went backwards, resetting baseline");
            state.last_counters = None;
        }

        if state
            .last_saved
            .as_ref()
            .is_some_and(|saved| main_count < saved.counters.sv_main.count)
        {
            state.last_saved = None;
        }
    }

    /// Latest cached values; never blocks on a running cycle
    pub fn recent_stats(&self) -> Arc<RecentStats> {
        self.recent.load_full()
    }

    /// Summary of the last six hours, `None` while data is insufficient
    pub async fn perf_summary(&self) -> Option<PerfSummary> {
        let state = self.state.lock().await;
        summary::summarize(
            &state.log,
            state.last_boundaries.as_ref(),
            self.config.min_ticks,
            self.clock.now_ms(),
        )
    }

    /// Copy of the retained history
    pub async fn log_snapshot(&self) -> Vec<LogEvent> {
        self.state.lock().await.log.clone()
    }

    /// Run `collect_stats` every collect interval until shutdown
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = Duration::from_secs(self.config.collect_interval_secs);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = period.as_secs(), "Perf collector started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.recv() => break,
                }

                if let Err(e) = self.collect_stats().await {
                    warn!(error = %e, "Failed to collect perf stats");
                }
            }

            info!("Perf collector stopped");
        })
    }
}
