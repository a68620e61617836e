// Performance data model
// Raw tick counters, histograms, retention log events and the on-disk document

use serde::{Deserialize, Serialize};
use std::fmt;

/// Names of the tracked server threads, in wire order
pub const PERF_THREADS: [&str; 3] = ["svMain", "svNetwork", "svSync"];

/// Upper edge of a latency bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBoundary", into = "RawBoundary")]
pub enum Boundary {
    /// Finite edge in seconds
    Le(f64),
    Inf,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawBoundary {
    Number(f64),
    Text(String),
}

impl TryFrom<RawBoundary> for Boundary {
    type Error = String;

    fn try_from(raw: RawBoundary) -> Result<Self, Self::Error> {
        match raw {
            RawBoundary::Number(value) if value.is_finite() => Ok(Boundary::Le(value)),
            RawBoundary::Number(value) => Err(format!("non-finite boundary {value}")),
            RawBoundary::Text(text) => text.parse(),
        }
    }
}

impl From<Boundary> for RawBoundary {
    fn from(boundary: Boundary) -> Self {
        match boundary {
            Boundary::Le(value) => RawBoundary::Number(value),
            Boundary::Inf => RawBoundary::Text("+Inf".to_string()),
        }
    }
}

impl std::str::FromStr for Boundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "+Inf" | "Inf" | "inf" | "+inf" => Ok(Boundary::Inf),
            other => match other.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Boundary::Le(value)),
                _ => Err(format!("invalid boundary '{other}'")),
            },
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Le(secs) => write!(f, "{}ms", secs * 1000.0),
            Boundary::Inf => write!(f, "+Inf"),
        }
    }
}

/// Bucket edge configuration reported by the server. Histories recorded
/// under different boundaries are not comparable.
pub type PerfBoundaries = Vec<Boundary>;

/// One value per tracked thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSet<T> {
    pub sv_main: T,
    pub sv_network: T,
    pub sv_sync: T,
}

impl<T> ThreadSet<T> {
    pub fn map<U>(&self, f: impl Fn(&T) -> U) -> ThreadSet<U> {
        ThreadSet {
            sv_main: f(&self.sv_main),
            sv_network: f(&self.sv_network),
            sv_sync: f(&self.sv_sync),
        }
    }

    pub fn zip_with<U, V>(&self, other: &ThreadSet<U>, f: impl Fn(&T, &U) -> V) -> ThreadSet<V> {
        ThreadSet {
            sv_main: f(&self.sv_main, &other.sv_main),
            sv_network: f(&self.sv_network, &other.sv_network),
            sv_sync: f(&self.sv_sync, &other.sv_sync),
        }
    }

    /// Iterate as (thread name, value) pairs in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &T)> {
        PERF_THREADS
            .into_iter()
            .zip([&self.sv_main, &self.sv_network, &self.sv_sync])
    }
}

/// Cumulative tick counters for one thread since process start.
/// `buckets[i]` counts ticks that fell in bucket `i` only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfCounters {
    pub count: u64,
    pub buckets: Vec<u64>,
}

/// Normalized tick-time distribution for one thread
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfHistogram {
    pub count: u64,
    pub freqs: Vec<f64>,
}

pub type PerfCountersSet = ThreadSet<PerfCounters>;
pub type PerfHistogramSet = ThreadSet<PerfHistogram>;

/// One fetch of the remote counters endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct RawPerfSample {
    pub boundaries: PerfBoundaries,
    pub counters: PerfCountersSet,
}

/// Memory usage in megabytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used: f64,
    pub total: f64,
}

/// A data point of the retention log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    pub ts: i64,
    pub players: u32,
    pub fxs_memory: Option<f64>,
    pub node_memory: Option<f64>,
    pub perf: PerfHistogramSet,
}

/// Retention log entry, discriminated by `type` on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LogEvent {
    #[serde(rename = "svBoot", rename_all = "camelCase")]
    Boot { ts: i64, boot_time: u64 },

    #[serde(rename = "svClose")]
    Close { ts: i64, reason: String },

    #[serde(rename = "data")]
    Data(DataPoint),
}

impl LogEvent {
    pub fn ts(&self) -> i64 {
        match self {
            LogEvent::Boot { ts, .. } | LogEvent::Close { ts, .. } => *ts,
            LogEvent::Data(point) => point.ts,
        }
    }

    pub fn is_boot(&self) -> bool {
        matches!(self, LogEvent::Boot { .. })
    }

    pub fn is_close(&self) -> bool {
        matches!(self, LogEvent::Close { .. })
    }

    /// Boot and close markers delimit server sessions
    pub fn is_marker(&self) -> bool {
        !matches!(self, LogEvent::Data(_))
    }

    pub fn as_data(&self) -> Option<&DataPoint> {
        match self {
            LogEvent::Data(point) => Some(point),
            _ => None,
        }
    }
}

/// Persisted performance history, rewritten in full on every save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfDocument {
    pub version: u32,
    pub last_perf_boundaries: Option<PerfBoundaries>,
    pub log: Vec<LogEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_serialization() {
        let boundaries = vec![Boundary::Le(0.005), Boundary::Le(0.1), Boundary::Inf];
        let json = serde_json::to_string(&boundaries).unwrap();
        assert_eq!(json, r#"[0.005,0.1,"+Inf"]"#);

        let parsed: PerfBoundaries = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, boundaries);

        assert!(serde_json::from_str::<Boundary>(r#""fast""#).is_err());
    }

    #[test]
    fn test_event_tagging() {
        let boot = LogEvent::Boot { ts: 10, boot_time: 42 };
        let json = serde_json::to_value(&boot).unwrap();
        assert_eq!(json["type"], "svBoot");
        assert_eq!(json["bootTime"], 42);

        let data = LogEvent::Data(DataPoint {
            ts: 20,
            players: 3,
            fxs_memory: Some(512.5),
            node_memory: None,
            perf: PerfHistogramSet::default(),
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "data");
        assert_eq!(json["fxsMemory"], 512.5);
        assert!(json["perf"]["svMain"].is_object());

        let back: LogEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_thread_set_iter_order() {
        let set = ThreadSet { sv_main: 1, sv_network: 2, sv_sync: 3 };
        let names: Vec<_> = set.iter().map(|(name, value)| (name, *value)).collect();
        assert_eq!(names, vec![("svMain", 1), ("svNetwork", 2), ("svSync", 3)]);
    }
}
