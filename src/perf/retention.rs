// Retention optimizer for the performance log
// Age-tiered thinning: recent history at full resolution, older history sparser

use super::types::LogEvent;
use crate::config::PerfConfig;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Minimum spacing between retained data points for entries up to `max_age_ms` old
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionBand {
    pub max_age_ms: i64,
    pub resolution_ms: i64,
}

/// Default decay schedule. Entries older than the last band are dropped.
pub const DEFAULT_BANDS: [ResolutionBand; 4] = [
    ResolutionBand { max_age_ms: 6 * HOUR_MS, resolution_ms: 5 * MINUTE_MS },
    ResolutionBand { max_age_ms: 24 * HOUR_MS, resolution_ms: 15 * MINUTE_MS },
    ResolutionBand { max_age_ms: 72 * HOUR_MS, resolution_ms: 30 * MINUTE_MS },
    ResolutionBand { max_age_ms: 7 * 24 * HOUR_MS, resolution_ms: 60 * MINUTE_MS },
];

/// Retention policy knobs
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    /// Bands ordered by increasing age
    pub bands: Vec<ResolutionBand>,
    pub max_entries: usize,
    /// Data points with fewer main-thread ticks carry no usable signal
    pub min_ticks: u64,
}

impl RetentionPolicy {
    /// Default bands, with the finest band narrowed to the save resolution
    /// so every persisted point survives while it is recent
    pub fn from_config(config: &PerfConfig) -> Self {
        let mut bands = DEFAULT_BANDS.to_vec();
        let save_resolution_ms = config.save_resolution_secs as i64 * 1000;
        if let Some(finest) = bands.first_mut() {
            finest.resolution_ms = finest.resolution_ms.min(save_resolution_ms);
        }

        Self {
            bands,
            max_entries: config.max_log_entries,
            min_ticks: config.min_ticks,
        }
    }

    fn max_age_ms(&self) -> i64 {
        self.bands.last().map_or(i64::MAX, |band| band.max_age_ms)
    }

    fn resolution_ms(&self, age_ms: i64) -> i64 {
        self.bands
            .iter()
            .find(|band| age_ms <= band.max_age_ms)
            .or(self.bands.last())
            .map_or(0, |band| band.resolution_ms)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_config(&PerfConfig::default())
    }
}

/// Thin the log according to `policy`, relative to `now_ms`.
///
/// Preserves chronological order, never grows the log and is idempotent
/// for a fixed `now_ms`.
pub fn optimize_log(log: Vec<LogEvent>, policy: &RetentionPolicy, now_ms: i64) -> Vec<LogEvent> {
    let max_age_ms = policy.max_age_ms();

    let filtered = log.into_iter().filter(|event| {
        if now_ms.saturating_sub(event.ts()) > max_age_ms {
            return false;
        }
        match event.as_data() {
            Some(point) => point.perf.sv_main.count >= policy.min_ticks,
            None => true,
        }
    });

    let collapsed = collapse_markers(drop_out_of_order(filtered));
    let mut thinned = thin_data(collapsed, policy, now_ms);

    if thinned.len() > policy.max_entries {
        let excess = thinned.len() - policy.max_entries;
        thinned.drain(..excess);
    }

    thinned
}

/// Keep the log ordered by timestamp. Entries stamped before one already
/// kept (wall clock stepped back) are dropped.
fn drop_out_of_order(events: impl Iterator<Item = LogEvent>) -> impl Iterator<Item = LogEvent> {
    let mut latest = i64::MIN;
    events.filter(move |event| {
        if event.ts() < latest {
            return false;
        }
        latest = event.ts();
        true
    })
}

/// Drop boot markers that never saw data and duplicate close markers
fn collapse_markers(events: impl Iterator<Item = LogEvent>) -> Vec<LogEvent> {
    let mut out: Vec<LogEvent> = Vec::new();

    for event in events {
        match (&event, out.last()) {
            (LogEvent::Boot { .. }, Some(last)) if last.is_boot() => {
                out.pop();
                out.push(event);
            }
            (LogEvent::Close { .. }, Some(last)) if last.is_boot() => {
                // Session never produced data
                out.pop();
            }
            (LogEvent::Close { .. }, Some(last)) if last.is_close() => {}
            _ => out.push(event),
        }
    }

    out
}

fn thin_data(events: Vec<LogEvent>, policy: &RetentionPolicy, now_ms: i64) -> Vec<LogEvent> {
    let mut out = Vec::with_capacity(events.len());
    let mut last_kept_ts: Option<i64> = None;

    for event in events {
        if event.is_marker() {
            // Markers are never thinned and restart the spacing
            last_kept_ts = None;
            out.push(event);
            continue;
        }

        let ts = event.ts();
        let resolution = policy.resolution_ms(now_ms.saturating_sub(ts));
        let keep = match last_kept_ts {
            None => true,
            Some(last) => ts - last >= resolution,
        };

        if keep {
            last_kept_ts = Some(ts);
            out.push(event);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::types::{DataPoint, PerfHistogram, PerfHistogramSet};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const NOW: i64 = 1_700_000_000_000;

    fn data(ts: i64, ticks: u64) -> LogEvent {
        let hist = PerfHistogram {
            count: ticks,
            freqs: vec![1.0, 0.0],
        };
        LogEvent::Data(DataPoint {
            ts,
            players: 0,
            fxs_memory: None,
            node_memory: None,
            perf: PerfHistogramSet {
                sv_main: hist.clone(),
                sv_network: hist.clone(),
                sv_sync: hist,
            },
        })
    }

    fn boot(ts: i64) -> LogEvent {
        LogEvent::Boot { ts, boot_time: 30 }
    }

    fn close(ts: i64) -> LogEvent {
        LogEvent::Close {
            ts,
            reason: "test".to_string(),
        }
    }

    fn policy() -> RetentionPolicy {
        RetentionPolicy {
            bands: DEFAULT_BANDS.to_vec(),
            max_entries: 500,
            min_ticks: 100,
        }
    }

    fn random_log(rng: &mut StdRng, len: usize) -> Vec<LogEvent> {
        let mut ts = NOW - 8 * 24 * HOUR_MS;
        (0..len)
            .map(|_| {
                ts += rng.gen_range(1..40) * MINUTE_MS;
                match rng.gen_range(0..20) {
                    0 => boot(ts),
                    1 => close(ts),
                    2 => data(ts, rng.gen_range(0..100)),
                    _ => data(ts, rng.gen_range(100..10_000)),
                }
            })
            .collect()
    }

    #[test]
    fn test_recent_full_resolution_is_kept() {
        let log: Vec<_> = (0..12).map(|i| data(NOW - i * 5 * MINUTE_MS, 1000)).rev().collect();
        let optimized = optimize_log(log.clone(), &policy(), NOW);
        assert_eq!(optimized, log);
    }

    #[test]
    fn test_old_entries_are_thinned() {
        // Two days ago, one point every 5 minutes for two hours
        let start = NOW - 48 * HOUR_MS;
        let log: Vec<_> = (0..24).map(|i| data(start + i * 5 * MINUTE_MS, 1000)).collect();

        let optimized = optimize_log(log, &policy(), NOW);
        // 30 minute resolution band
        assert_eq!(optimized.len(), 4);
        for pair in optimized.windows(2) {
            assert!(pair[1].ts() - pair[0].ts() >= 30 * MINUTE_MS);
        }
    }

    #[test]
    fn test_expired_and_low_tick_entries_dropped() {
        let log = vec![
            boot(NOW - 8 * 24 * HOUR_MS),
            data(NOW - 8 * 24 * HOUR_MS + MINUTE_MS, 1000),
            data(NOW - 10 * MINUTE_MS, 5),
            data(NOW - 5 * MINUTE_MS, 1000),
        ];
        let optimized = optimize_log(log, &policy(), NOW);
        assert_eq!(optimized, vec![data(NOW - 5 * MINUTE_MS, 1000)]);
    }

    #[test]
    fn test_markers_survive_and_first_point_after_marker_kept() {
        let base = NOW - 30 * HOUR_MS;
        let log = vec![
            data(base, 1000),
            close(base + MINUTE_MS),
            boot(base + 2 * MINUTE_MS),
            data(base + 3 * MINUTE_MS, 1000),
            data(base + 4 * MINUTE_MS, 1000),
        ];
        let optimized = optimize_log(log, &policy(), NOW);
        assert_eq!(
            optimized,
            vec![
                data(base, 1000),
                close(base + MINUTE_MS),
                boot(base + 2 * MINUTE_MS),
                data(base + 3 * MINUTE_MS, 1000),
            ]
        );
    }

    #[test]
    fn test_dangling_markers_collapse() {
        let log = vec![
            boot(NOW - 50 * MINUTE_MS),
            data(NOW - 45 * MINUTE_MS, 1000),
            close(NOW - 40 * MINUTE_MS),
            close(NOW - 39 * MINUTE_MS),
            boot(NOW - 30 * MINUTE_MS),
            // Filtered for low ticks, leaving a boot immediately followed by a boot
            data(NOW - 25 * MINUTE_MS, 1),
            boot(NOW - 20 * MINUTE_MS),
            close(NOW - 15 * MINUTE_MS),
            boot(NOW - 10 * MINUTE_MS),
        ];
        let optimized = optimize_log(log, &policy(), NOW);
        assert_eq!(
            optimized,
            vec![
                boot(NOW - 50 * MINUTE_MS),
                data(NOW - 45 * MINUTE_MS, 1000),
                close(NOW - 40 * MINUTE_MS),
                boot(NOW - 10 * MINUTE_MS),
            ]
        );
    }

    #[test]
    fn test_entries_before_a_kept_entry_are_dropped() {
        // Wall clock stepped back by seven minutes after the second point
        let log = vec![
            boot(NOW - 30 * MINUTE_MS),
            data(NOW - 25 * MINUTE_MS, 1000),
            data(NOW - 20 * MINUTE_MS, 1000),
            close(NOW - 27 * MINUTE_MS),
            data(NOW - 15 * MINUTE_MS, 1000),
        ];
        let optimized = optimize_log(log, &policy(), NOW);

        assert_eq!(
            optimized,
            vec![
                boot(NOW - 30 * MINUTE_MS),
                data(NOW - 25 * MINUTE_MS, 1000),
                data(NOW - 20 * MINUTE_MS, 1000),
                data(NOW - 15 * MINUTE_MS, 1000),
            ]
        );
        assert!(optimized.windows(2).all(|pair| pair[0].ts() <= pair[1].ts()));
    }

    #[test]
    fn test_finest_band_follows_save_resolution() {
        let config = PerfConfig {
            save_resolution_secs: 60,
            ..Default::default()
        };
        let policy = RetentionPolicy::from_config(&config);
        assert_eq!(policy.bands[0].resolution_ms, MINUTE_MS);
        assert_eq!(policy.bands[1..], DEFAULT_BANDS[1..]);

        // One point per minute survives while recent
        let log: Vec<_> = (0..10).map(|i| data(NOW - (10 - i) * MINUTE_MS, 1000)).collect();
        assert_eq!(optimize_log(log.clone(), &policy, NOW), log);

        // Coarser save resolutions keep the default band
        assert_eq!(RetentionPolicy::default().bands, DEFAULT_BANDS.to_vec());
    }

    #[test]
    fn test_size_cap_keeps_most_recent() {
        let log: Vec<_> = (0..50).map(|i| data(NOW - (50 - i) * 5 * MINUTE_MS, 1000)).collect();
        let mut small = policy();
        small.max_entries = 10;

        let optimized = optimize_log(log.clone(), &small, NOW);
        assert_eq!(optimized.len(), 10);
        assert_eq!(optimized.last(), log.last());
    }

    #[test]
    fn test_properties_on_random_logs() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for round in 0..200 {
            let len = rng.gen_range(0..400);
            let log = random_log(&mut rng, len);
            let mut policy = policy();
            policy.max_entries = rng.gen_range(1..600);

            let once = optimize_log(log.clone(), &policy, NOW);
            let twice = optimize_log(once.clone(), &policy, NOW);

            assert!(once.len() <= log.len(), "round {round} grew");
            assert_eq!(once, twice, "round {round} not idempotent");
            assert!(once.windows(2).all(|w| w[0].ts() <= w[1].ts()));
            assert!(once
                .iter()
                .filter_map(LogEvent::as_data)
                .all(|p| p.perf.sv_main.count >= policy.min_ticks));
            assert!(once
                .windows(2)
                .all(|w| !(w[0].is_boot() && w[1].is_boot()) && !(w[0].is_close() && w[1].is_close())));
        }
    }
}
