// fxmon - game server telemetry core
// Liveness monitoring, tick-time histograms and retained performance history

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod health;
pub mod host;
pub mod observability;
pub mod perf;
pub mod signals;

pub use error::{Result, TelemetryError};
