// Rate histogram codec
// Turns monotonic tick counters into interval deltas and normalized histograms

use super::types::{PerfCounters, PerfCountersSet, PerfHistogram, PerfHistogramSet};

/// Counter delta between two snapshots of the same boundary epoch.
///
/// Without a previous snapshot the cumulative counters are returned as-is.
/// Subtraction saturates, so a reset that slipped past detection yields
/// zeros instead of wrapping.
pub fn delta(curr: &PerfCounters, prev: Option<&PerfCounters>) -> PerfCounters {
    let Some(prev) = prev else {
        return curr.clone();
    };

    let buckets = curr
        .buckets
        .iter()
        .enumerate()
        .map(|(i, ticks)| ticks.saturating_sub(prev.buckets.get(i).copied().unwrap_or(0)))
        .collect();

    PerfCounters {
        count: curr.count.saturating_sub(prev.count),
        buckets,
    }
}

/// Normalize bucket counts into frequencies; all zero when there are no ticks
pub fn to_histogram(counters: &PerfCounters) -> PerfHistogram {
    let freqs = if counters.count == 0 {
        vec![0.0; counters.buckets.len()]
    } else {
        let total = counters.count as f64;
        counters
            .buckets
            .iter()
            .map(|&ticks| ticks as f64 / total)
            .collect()
    };

    PerfHistogram {
        count: counters.count,
        freqs,
    }
}

pub fn delta_set(curr: &PerfCountersSet, prev: Option<&PerfCountersSet>) -> PerfCountersSet {
    match prev {
        Some(prev) => curr.zip_with(prev, |c, p| delta(c, Some(p))),
        None => curr.clone(),
    }
}

pub fn histogram_set(counters: &PerfCountersSet) -> PerfHistogramSet {
    counters.map(to_histogram)
}
