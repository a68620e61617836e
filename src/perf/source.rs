// Remote counter source
// Fetches tick-time histograms and memory usage from the managed server over HTTP

use super::schema::{parse_memory_payload, validate_boundaries};
use super::types::{
    Boundary, MemoryUsage, PerfBoundaries, PerfCounters, PerfCountersSet, RawPerfSample,
    PERF_THREADS,
};
use crate::config::ServerConfig;
use crate::error::{Result, TelemetryError};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

/// Capability to sample the managed process
#[async_trait]
pub trait PerfSource: Send + Sync {
    /// Cumulative tick counters and their bucket boundaries
    async fn fetch_perf(&self) -> Result<RawPerfSample>;

    /// Memory used by the managed process, `None` when not available
    async fn fetch_fxs_memory(&self) -> Result<Option<MemoryUsage>>;
}

/// HTTP client for the managed server's endpoints
pub struct HttpPerfSource {
    client: reqwest::Client,
    base_url: String,
    memory_url: Option<String>,
    node_memory_url: Option<String>,
}

impl HttpPerfSource {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            memory_url: config.memory_url.clone(),
            node_memory_url: config.node_memory_url.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(TelemetryError::Http(format!("{url} returned {status}")));
        }
        Ok(response)
    }

    /// Succeeds when the server answers its dynamic info endpoint
    pub async fn probe_health(&self) -> Result<()> {
        self.get(&self.url("dynamic.json")).await?;
        Ok(())
    }

    /// Number of connected players
    pub async fn fetch_players(&self) -> Result<u32> {
        let players: Vec<serde_json::Value> = self.get(&self.url("players.json")).await?.json().await?;
        Ok(players.len() as u32)
    }

    /// Raw admin host memory payload, validated by the collector
    pub async fn fetch_node_memory(&self) -> Result<Option<serde_json::Value>> {
        let Some(url) = &self.node_memory_url else {
            return Ok(None);
        };
        Ok(Some(self.get(url).await?.json().await?))
    }
}

#[async_trait]
impl PerfSource for HttpPerfSource {
    async fn fetch_perf(&self) -> Result<RawPerfSample> {
        let body = self.get(&self.url("perf/")).await?.text().await?;
        parse_perf_counters(&body)
    }

    async fn fetch_fxs_memory(&self) -> Result<Option<MemoryUsage>> {
        let Some(url) = &self.memory_url else {
            return Ok(None);
        };
        let payload: serde_json::Value = self.get(url).await?.json().await?;
        parse_memory_payload(&payload).map(Some)
    }
}

const COUNT_METRIC: &str = "tickTime_count";
const BUCKET_METRIC: &str = "tickTime_bucket";

/// Parse the Prometheus text exposition of the `tickTime` histogram.
///
/// Cumulative `le` buckets are converted into per-bucket counts, so the
/// returned buckets of each thread sum to its `count`.
pub fn parse_perf_counters(text: &str) -> Result<RawPerfSample> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    let mut cumulative: HashMap<String, Vec<(Boundary, u64)>> = HashMap::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (metric, labels, value) = split_sample(line)?;
        if metric != COUNT_METRIC && metric != BUCKET_METRIC {
            continue;
        }

        let Some(thread) = labels.get("name").filter(|name| PERF_THREADS.contains(&name.as_str())) else {
            continue;
        };

        if metric == COUNT_METRIC {
            counts.insert(thread.clone(), value);
        } else {
            let le = labels
                .get("le")
                .ok_or_else(|| TelemetryError::Parse(format!("bucket without le: {line}")))?;
            let boundary: Boundary = le.parse().map_err(TelemetryError::Parse)?;
            cumulative.entry(thread.clone()).or_default().push((boundary, value));
        }
    }

    let mut boundaries: Option<PerfBoundaries> = None;
    let mut per_thread = Vec::with_capacity(PERF_THREADS.len());

    for thread in PERF_THREADS {
        let count = *counts
            .get(thread)
            .ok_or_else(|| TelemetryError::Parse(format!("missing {COUNT_METRIC} for {thread}")))?;
        let mut buckets = cumulative
            .remove(thread)
            .ok_or_else(|| TelemetryError::Parse(format!("missing buckets for {thread}")))?;
        buckets.sort_by(|a, b| boundary_key(&a.0).total_cmp(&boundary_key(&b.0)));

        let thread_boundaries: PerfBoundaries = buckets.iter().map(|(b, _)| *b).collect();
        match &boundaries {
            None => {
                validate_boundaries(&thread_boundaries)
                    .map_err(|e| TelemetryError::Parse(e.to_string()))?;
                boundaries = Some(thread_boundaries);
            }
            Some(expected) if *expected != thread_boundaries => {
                return Err(TelemetryError::Parse(format!(
                    "{thread} reports different bucket boundaries"
                )));
            }
            Some(_) => {}
        }

        per_thread.push(decumulate(thread, count, &buckets)?);
    }

    let mut per_thread = per_thread.into_iter();
    let (Some(sv_main), Some(sv_network), Some(sv_sync), Some(boundaries)) =
        (per_thread.next(), per_thread.next(), per_thread.next(), boundaries)
    else {
        return Err(TelemetryError::Parse("incomplete perf sample".to_string()));
    };

    debug!(main_ticks = sv_main.count, buckets = boundaries.len(), "Parsed perf counters");

    Ok(RawPerfSample {
        boundaries,
        counters: PerfCountersSet {
            sv_main,
            sv_network,
            sv_sync,
        },
    })
}

fn boundary_key(boundary: &Boundary) -> f64 {
    match boundary {
        Boundary::Le(secs) => *secs,
        Boundary::Inf => f64::INFINITY,
    }
}

fn decumulate(thread: &str, count: u64, cumulative: &[(Boundary, u64)]) -> Result<PerfCounters> {
    let mut buckets = Vec::with_capacity(cumulative.len());
    let mut prev = 0;

    for &(_, total) in cumulative {
        if total < prev {
            return Err(TelemetryError::Parse(format!("{thread} buckets are not cumulative")));
        }
        buckets.push(total - prev);
        prev = total;
    }

    if prev != count {
        return Err(TelemetryError::Parse(format!(
            "{thread} +Inf bucket {prev} does not match count {count}"
        )));
    }

    Ok(PerfCounters { count, buckets })
}

/// Split `metric{k="v",...} value` into its parts
fn split_sample(line: &str) -> Result<(&str, HashMap<String, String>, u64)> {
    let malformed = || TelemetryError::Parse(format!("malformed line: {line}"));

    let (head, rest) = match line.rfind('}') {
        Some(end) => line.split_at(end + 1),
        None => line.split_once(char::is_whitespace).ok_or_else(malformed)?,
    };

    let (metric, labels) = match head.split_once('{') {
        Some((metric, labels)) => (metric, parse_labels(labels.trim_end_matches('}'))),
        None => (head, HashMap::new()),
    };

    let raw_value = rest.split_whitespace().next().ok_or_else(malformed)?;
    let value: f64 = raw_value.parse().map_err(|_| malformed())?;
    if !value.is_finite() || value < 0.0 {
        return Err(malformed());
    }

    Ok((metric.trim(), labels, value.round() as u64))
}

/// Parse `key="value",...` pairs. Commas and escaped quotes inside a quoted
/// value belong to the value.
fn parse_labels(raw: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    let mut chars = raw.chars();

    loop {
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().trim_start_matches(',').trim();
        if key.is_empty() {
            return labels;
        }

        // Skip to the opening quote
        if !chars.by_ref().any(|c| c == '"') {
            return labels;
        }

        let mut value = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some(escaped) => value.push(escaped),
                    None => break,
                },
                '"' => break,
                other => value.push(other),
            }
        }
        labels.insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn exposition(main_count: u64) -> String {
        let mut out = String::from("# HELP tickTime Server tick times\n# TYPE tickTime histogram\n");
        for (thread, count) in [("svMain", main_count), ("svNetwork", 4000), ("svSync", 2000)] {
            out.push_str(&format!("tickTime_count{{name=\"{thread}\"}} {count}\n"));
            out.push_str(&format!("tickTime_sum{{name=\"{thread}\"}} 12.5\n"));
            out.push_str(&format!("tickTime_bucket{{name=\"{thread}\",le=\"0.005\"}} {}\n", count / 2));
            out.push_str(&format!("tickTime_bucket{{name=\"{thread}\",le=\"0.05\"}} {}\n", count * 3 / 4));
            out.push_str(&format!("tickTime_bucket{{name=\"{thread}\",le=\"+Inf\"}} {count}\n"));
        }
        out
    }

    #[test]
    fn test_label_values_keep_commas_and_escapes() {
        let labels = parse_labels(r#"name="svMain",le="+Inf",help="a, b \"quoted\"""#);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels["name"], "svMain");
        assert_eq!(labels["le"], "+Inf");
        assert_eq!(labels["help"], r#"a, b "quoted""#);

        assert!(parse_labels("").is_empty());

        let (metric, labels, value) =
            split_sample(r#"tickTime_count{name="svMain",note="x, {y}"} 42"#).unwrap();
        assert_eq!(metric, "tickTime_count");
        assert_eq!(labels["note"], "x, {y}");
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_decumulates_buckets() {
        let sample = parse_perf_counters(&exposition(1000)).unwrap();

        assert_eq!(
            sample.boundaries,
            vec![Boundary::Le(0.005), Boundary::Le(0.05), Boundary::Inf]
        );
        assert_eq!(sample.counters.sv_main.count, 1000);
        assert_eq!(sample.counters.sv_main.buckets, vec![500, 250, 250]);
        assert_eq!(sample.counters.sv_sync.buckets.iter().sum::<u64>(), 2000);
    }

    #[test]
    fn test_parse_ignores_unknown_threads_and_metrics() {
        let mut text = exposition(800);
        text.push_str("tickTime_count{name=\"svGame\"} 5\n");
        text.push_str("memory_bytes 123456\n\n");

        let sample = parse_perf_counters(&text).unwrap();
        assert_eq!(sample.counters.sv_main.count, 800);
    }

    #[test]
    fn test_parse_rejects_missing_thread() {
        let text: String = exposition(1000)
            .lines()
            .filter(|line| !line.contains("svSync"))
            .map(|line| format!("{line}\n"))
            .collect();
        assert!(matches!(parse_perf_counters(&text), Err(TelemetryError::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_inconsistent_count() {
        let text = exposition(1000).replace("tickTime_count{name=\"svMain\"} 1000", "tickTime_count{name=\"svMain\"} 999");
        assert!(parse_perf_counters(&text).is_err());
    }

    #[test]
    fn test_parse_rejects_mismatched_boundaries() {
        let text = exposition(1000).replace("name=\"svNetwork\",le=\"0.05\"", "name=\"svNetwork\",le=\"0.1\"");
        assert!(parse_perf_counters(&text).is_err());
    }

    /// Serve canned responses for each path until the test ends
    async fn serve(routes: Vec<(&'static str, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(route, _)| *route == path)
                        .map(|(_, body)| ("200 OK", body.clone()))
                        .unwrap_or(("404 Not Found", String::new()));
                    let response = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }

    fn source_for(base_url: String, memory: bool) -> HttpPerfSource {
        let config = ServerConfig {
            memory_url: memory.then(|| format!("{base_url}/memory")),
            base_url,
            ..ServerConfig::default()
        };
        HttpPerfSource::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_http_source_endpoints() {
        let base = serve(vec![
            ("/perf/", exposition(1500)),
            ("/players.json", r#"[{"id":1},{"id":2},{"id":3}]"#.to_string()),
            ("/dynamic.json", r#"{"clients":3}"#.to_string()),
            ("/memory", r#"{"used":104857600,"total":209715200}"#.to_string()),
        ])
        .await;
        let source = source_for(base, true);

        let sample = source.fetch_perf().await.unwrap();
        assert_eq!(sample.counters.sv_main.count, 1500);
        assert_eq!(source.fetch_players().await.unwrap(), 3);
        assert!(source.probe_health().await.is_ok());

        let memory = source.fetch_fxs_memory().await.unwrap().unwrap();
        assert_eq!(memory.used, 100.0);
        assert_eq!(source.fetch_node_memory().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_http_source_error_status() {
        let base = serve(vec![]).await;
        let source = source_for(base, false);

        assert!(matches!(source.fetch_perf().await, Err(TelemetryError::Http(_))));
        assert_eq!(source.fetch_fxs_memory().await.unwrap(), None);
    }
}
