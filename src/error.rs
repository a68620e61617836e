// Error types for the telemetry core
// Network, parsing and schema failures surfaced by the collector and its sources

use thiserror::Error;

/// Errors raised while fetching, parsing or persisting telemetry data
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// HTTP request failed or returned a non-success status
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Timeout waiting for the managed process
    #[error("Request timed out")]
    Timeout,

    /// Could not reach the managed process
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Counter payload could not be parsed
    #[error("Failed to parse perf counters: {0}")]
    Parse(String),

    /// Payload or data file did not match the expected structure
    #[error("Schema validation failed: {0}")]
    Schema(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TelemetryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TelemetryError::Timeout
        } else if err.is_connect() {
            TelemetryError::Connection(err.to_string())
        } else {
            TelemetryError::Http(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
