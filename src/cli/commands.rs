// CLI Command Implementations
// Offline summary, one-shot probe and configuration commands with colored output

use super::{error, info, success, warning, Commands, ConfigAction, OutputFormat};
use crate::clock::{Clock, SystemClock};
use crate::config::{FxmonConfig, ServerConfig};
use crate::perf::codec;
use crate::perf::retention::{optimize_log, RetentionPolicy};
use crate::perf::schema;
use crate::perf::source::{HttpPerfSource, PerfSource};
use crate::perf::store::PerfStore;
use crate::perf::summary::{summarize, PerfSummary, SUMMARY_MIN_SNAPSHOTS};
use crate::perf::types::{PerfBoundaries, PerfHistogram, ThreadSet};
use anyhow::Context;
use colored::*;
use std::fmt::Write;

/// Execute a non-daemon CLI command
pub async fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Start { .. } => anyhow::bail!("The start command runs the daemon from main"),
        Commands::Summary { file, config, format } => {
            summary_command(file, config.as_deref(), format).await
        }
        Commands::Probe { url } => probe_command(url).await,
        Commands::Config { action } => config_command(action),
    }
}

/// Summarize a persisted perf log
async fn summary_command(file: String, config: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let policy = summary_policy(config)?;

    let store = PerfStore::new(&file);
    let Some(raw) = store.read().await.context("Failed to read perf data file")? else {
        error(&format!("No perf data at {}", file.bright_white()));
        return Ok(());
    };
    let document = schema::decode_document(&raw).context("Invalid perf data file")?;

    let now_ms = SystemClock.now_ms();
    let log = optimize_log(document.log, &policy, now_ms);
    let summary = summarize(&log, document.last_perf_boundaries.as_ref(), policy.min_ticks, now_ms);

    match (summary, format) {
        (Some(summary), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        (Some(summary), OutputFormat::Text) => print!("{}", render_summary(&summary)),
        (None, OutputFormat::Json) => println!("null"),
        (None, OutputFormat::Text) => {
            warning(&format!(
                "Not enough data for a summary yet ({} snapshots in the last 6h needed)",
                SUMMARY_MIN_SNAPSHOTS
            ));
        }
    }

    Ok(())
}

/// Retention settings from the daemon's configuration, defaults without one
fn summary_policy(config: Option<&str>) -> anyhow::Result<RetentionPolicy> {
    match config {
        Some(path) => Ok(RetentionPolicy::from_config(&FxmonConfig::load(path)?.perf)),
        None => Ok(RetentionPolicy::default()),
    }
}

/// Fetch the counters once and print the lifetime distribution
async fn probe_command(url: String) -> anyhow::Result<()> {
    info(&format!("Probing {}", url.bright_white()));

    let config = ServerConfig {
        base_url: url,
        ..Default::default()
    };
    let source = HttpPerfSource::new(&config)?;
    let sample = source.fetch_perf().await.context("Failed to fetch perf counters")?;

    success("Counters received");
    let histograms = sample.counters.map(codec::to_histogram);
    print!("{}", render_histograms(&sample.boundaries, &histograms));

    Ok(())
}

/// Manage configuration
fn config_command(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show { file } => {
            let config = FxmonConfig::load(&file)?;
            println!();
            println!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate { file } => {
            info(&format!("Validating {}", file.bright_white()));
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {file}"))?;
            let config: FxmonConfig = toml::from_str(&contents).context("Failed to parse configuration file")?;
            match config.validate() {
                Ok(()) => success("Configuration file is valid"),
                Err(e) => {
                    error(&e.to_string());
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

fn render_summary(summary: &PerfSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {}",
        "Performance summary".bright_cyan().bold(),
        format!("({} snapshots)", summary.snapshots).bright_black()
    );
    let _ = writeln!(out, "  {} {}", "Median players:".bright_white(), summary.median_players);
    if let Some(memory) = summary.median_fxs_memory {
        let _ = writeln!(out, "  {} {:.2} MB", "Median server memory:".bright_white(), memory);
    }
    if let Some(memory) = summary.median_node_memory {
        let _ = writeln!(out, "  {} {:.2} MB", "Median host memory:".bright_white(), memory);
    }
    out.push_str(&render_histograms(&summary.boundaries, &summary.perf));
    out
}

/// One row per bucket, one column per thread
fn render_histograms(boundaries: &PerfBoundaries, histograms: &ThreadSet<PerfHistogram>) -> String {
    let mut out = String::new();
    let _ = writeln!(out);

    let _ = write!(out, "  {:>10}", "≤");
    for (thread, hist) in histograms.iter() {
        let _ = write!(out, " {:>18}", format!("{thread} ({})", hist.count));
    }
    let _ = writeln!(out);

    for (i, boundary) in boundaries.iter().enumerate() {
        let _ = write!(out, "  {:>10}", boundary.to_string());
        for (_, hist) in histograms.iter() {
            let freq = hist.freqs.get(i).copied().unwrap_or(0.0);
            let _ = write!(out, " {:>17.2}%", freq * 100.0);
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out);
    out
}
