// Structural validation for the perf data file and memory payloads
// Nothing read from disk or the network is trusted before passing through here

use super::types::{Boundary, LogEvent, MemoryUsage, PerfBoundaries, PerfDocument};
use crate::error::{Result, TelemetryError};
use serde::Deserialize;

/// Current on-disk schema version. Other versions are discarded, not migrated.
pub const PERF_LOG_VERSION: u32 = 1;

/// Decode and validate a persisted perf document
pub fn decode_document(raw: &str) -> Result<PerfDocument> {
    let value: serde_json::Value = serde_json::from_str(raw)?;

    match value.get("version").and_then(serde_json::Value::as_u64) {
        Some(version) if version == u64::from(PERF_LOG_VERSION) => {}
        Some(version) => {
            return Err(TelemetryError::Schema(format!(
                "unsupported version {version}, expected {PERF_LOG_VERSION}"
            )))
        }
        None => return Err(TelemetryError::Schema("missing version".to_string())),
    }

    let document: PerfDocument = serde_json::from_value(value)
        .map_err(|e| TelemetryError::Schema(e.to_string()))?;
    validate_document(&document)?;

    Ok(document)
}

pub fn encode_document(document: &PerfDocument) -> Result<String> {
    Ok(serde_json::to_string(document)?)
}

/// Check invariants serde cannot express
pub fn validate_document(document: &PerfDocument) -> Result<()> {
    if let Some(boundaries) = &document.last_perf_boundaries {
        validate_boundaries(boundaries)?;
    }

    let bucket_count = document.last_perf_boundaries.as_ref().map(Vec::len);
    let mut prev_ts = i64::MIN;

    for (index, event) in document.log.iter().enumerate() {
        if event.ts() < prev_ts {
            return Err(TelemetryError::Schema(format!("event {index} is out of order")));
        }
        prev_ts = event.ts();

        let LogEvent::Data(point) = event else {
            continue;
        };

        let Some(bucket_count) = bucket_count else {
            return Err(TelemetryError::Schema(
                "data events present without perf boundaries".to_string(),
            ));
        };

        for (thread, hist) in point.perf.iter() {
            if hist.freqs.len() != bucket_count {
                return Err(TelemetryError::Schema(format!(
                    "event {index} {thread} has {} buckets, expected {bucket_count}",
                    hist.freqs.len()
                )));
            }
            if hist.freqs.iter().any(|f| !f.is_finite() || *f < 0.0 || *f > 1.0) {
                return Err(TelemetryError::Schema(format!(
                    "event {index} {thread} has frequencies outside [0, 1]"
                )));
            }
        }

        let memory_ok = [point.fxs_memory, point.node_memory]
            .into_iter()
            .flatten()
            .all(|mb| mb.is_finite() && mb >= 0.0);
        if !memory_ok {
            return Err(TelemetryError::Schema(format!("event {index} has invalid memory values")));
        }
    }

    Ok(())
}

/// Boundaries must be strictly increasing finite edges closed by `+Inf`
pub fn validate_boundaries(boundaries: &PerfBoundaries) -> Result<()> {
    let Some((last, finite)) = boundaries.split_last() else {
        return Err(TelemetryError::Schema("empty perf boundaries".to_string()));
    };

    if *last != Boundary::Inf {
        return Err(TelemetryError::Schema("perf boundaries must end with +Inf".to_string()));
    }

    let mut prev = f64::NEG_INFINITY;
    for boundary in finite {
        match boundary {
            Boundary::Le(edge) if *edge > prev => prev = *edge,
            _ => {
                return Err(TelemetryError::Schema(
                    "perf boundaries must be strictly increasing".to_string(),
                ))
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct MemoryPayload {
    used: f64,
    total: f64,
}

/// Validate a `{used, total}` byte payload and convert it to megabytes
pub fn parse_memory_payload(payload: &serde_json::Value) -> Result<MemoryUsage> {
    let parsed = MemoryPayload::deserialize(payload)
        .map_err(|e| TelemetryError::Schema(format!("memory payload: {e}")))?;

    let valid = |bytes: f64| bytes.is_finite() && bytes >= 0.0;
    if !valid(parsed.used) || !valid(parsed.total) {
        return Err(TelemetryError::Schema(
            "memory payload values must be non-negative numbers".to_string(),
        ));
    }

    Ok(MemoryUsage {
        used: bytes_to_megabytes(parsed.used),
        total: bytes_to_megabytes(parsed.total),
    })
}

/// Megabytes rounded to two decimals
pub fn bytes_to_megabytes(bytes: f64) -> f64 {
    (bytes / 1024.0 / 1024.0 * 100.0).round() / 100.0
}
