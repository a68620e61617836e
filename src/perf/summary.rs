// Multi-hour performance summary
// Tick-weighted aggregation of the retained histograms

use super::types::{DataPoint, LogEvent, PerfBoundaries, PerfHistogram, PerfHistogramSet};
use serde::Serialize;

/// Lookback window of the summary
pub const SUMMARY_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;

/// About three hours of 5-minute data points
pub const SUMMARY_MIN_SNAPSHOTS: usize = 36;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSummary {
    pub snapshots: usize,
    pub window_start: i64,
    pub boundaries: PerfBoundaries,
    pub perf: PerfHistogramSet,
    pub median_players: f64,
    pub median_fxs_memory: Option<f64>,
    pub median_node_memory: Option<f64>,
}

/// Summarize the data points of the last six hours.
///
/// Returns `None` until enough qualifying snapshots exist; that is the
/// normal state shortly after startup.
pub fn summarize(
    log: &[LogEvent],
    boundaries: Option<&PerfBoundaries>,
    min_ticks: u64,
    now_ms: i64,
) -> Option<PerfSummary> {
    let boundaries = boundaries?;
    let window_start = now_ms - SUMMARY_WINDOW_MS;

    let points: Vec<&DataPoint> = log
        .iter()
        .filter_map(LogEvent::as_data)
        .filter(|point| point.ts >= window_start && point.perf.sv_main.count >= min_ticks)
        .collect();

    if points.len() < SUMMARY_MIN_SNAPSHOTS {
        return None;
    }

    let buckets = boundaries.len();
    let perf = PerfHistogramSet {
        sv_main: combine(points.iter().map(|p| &p.perf.sv_main), buckets),
        sv_network: combine(points.iter().map(|p| &p.perf.sv_network), buckets),
        sv_sync: combine(points.iter().map(|p| &p.perf.sv_sync), buckets),
    };

    Some(PerfSummary {
        snapshots: points.len(),
        window_start,
        boundaries: boundaries.clone(),
        perf,
        median_players: median(points.iter().map(|p| f64::from(p.players)).collect())?,
        median_fxs_memory: median(points.iter().filter_map(|p| p.fxs_memory).collect()),
        median_node_memory: median(points.iter().filter_map(|p| p.node_memory).collect()),
    })
}

/// Merge histograms by their absolute tick counts, so busy intervals
/// weigh more than quiet ones
fn combine<'a>(hists: impl Iterator<Item = &'a PerfHistogram>, buckets: usize) -> PerfHistogram {
    let mut ticks = vec![0.0_f64; buckets];
    let mut count = 0u64;

    for hist in hists {
        count += hist.count;
        for (slot, freq) in ticks.iter_mut().zip(&hist.freqs) {
            *slot += freq * hist.count as f64;
        }
    }

    let freqs = if count == 0 {
        ticks
    } else {
        ticks.into_iter().map(|t| t / count as f64).collect()
    };

    PerfHistogram { count, freqs }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);

    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
