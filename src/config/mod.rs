// Configuration Management Module
// Handles fxmon.toml loading, defaults, and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Main fxmon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FxmonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub perf: PerfConfig,
}

/// Where to reach the managed server process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Endpoint reporting managed process memory as `{used, total}` bytes
    #[serde(default)]
    pub memory_url: Option<String>,

    /// Endpoint reporting admin host memory as `{used, total}` bytes
    #[serde(default)]
    pub node_memory_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_delay_threshold")]
    pub delay_threshold_secs: u64,

    #[serde(default = "default_fatal_threshold")]
    pub fatal_threshold_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfConfig {
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,

    /// Samples below this many ticks on any thread are ignored
    #[serde(default = "default_min_ticks")]
    pub min_ticks: u64,

    /// Minimum spacing between persisted data points
    #[serde(default = "default_save_resolution")]
    pub save_resolution_secs: u64,

    #[serde(default = "default_data_file")]
    pub data_file: String,

    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,
}

// Default value functions
fn default_base_url() -> String { "http://127.0.0.1:30120".to_string() }
fn default_request_timeout() -> u64 { 1500 }
fn default_delay_threshold() -> u64 { 10 }
fn default_fatal_threshold() -> u64 { 180 }
fn default_poll_interval() -> u64 { 2 }
fn default_collect_interval() -> u64 { 60 }
fn default_min_ticks() -> u64 { 1000 }
fn default_save_resolution() -> u64 { 300 }
fn default_data_file() -> String { "data/stats_perf.json".to_string() }
fn default_max_log_entries() -> usize { 2016 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout(),
            memory_url: None,
            node_memory_url: None,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            delay_threshold_secs: default_delay_threshold(),
            fatal_threshold_secs: default_fatal_threshold(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            collect_interval_secs: default_collect_interval(),
            min_ticks: default_min_ticks(),
            save_resolution_secs: default_save_resolution(),
            data_file: default_data_file(),
            max_log_entries: default_max_log_entries(),
        }
    }
}

impl FxmonConfig {
    /// Load configuration from file or use defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let contents = std::fs::read_to_string(path)
                .context("Failed to read configuration file")?;

            let config: FxmonConfig = toml::from_str(&contents)
                .context("Failed to parse configuration file")?;

            config.validate()?;
            Ok(config)
        } else {
            warn!("Configuration file not found, using defaults");
            info!("Create fxmon.toml to customize configuration");
            Ok(Self::default())
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            anyhow::bail!("Server base_url cannot be empty");
        }

        if self.server.request_timeout_ms == 0 {
            anyhow::bail!("Request timeout cannot be 0");
        }

        // Liveness thresholds
        if self.health.poll_interval_secs == 0 {
            anyhow::bail!("Health poll interval cannot be 0");
        }

        if self.health.delay_threshold_secs >= self.health.fatal_threshold_secs {
            anyhow::bail!("Delay threshold must be lower than the fatal threshold");
        }

        // Perf collection
        if self.perf.collect_interval_secs == 0 {
            anyhow::bail!("Collect interval cannot be 0");
        }

        if self.perf.save_resolution_secs < self.perf.collect_interval_secs {
            anyhow::bail!("Save resolution cannot be shorter than the collect interval");
        }

        if self.perf.data_file.trim().is_empty() {
            anyhow::bail!("Perf data file path cannot be empty");
        }

        if self.perf.max_log_entries == 0 {
            anyhow::bail!("max_log_entries must be at least 1");
        }

        Ok(())
    }
}
