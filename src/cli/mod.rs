// Command Line Interface Module
// clap definitions for the daemon and the offline perf tools

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;

/// fxmon - game server liveness and performance telemetry
#[derive(Parser)]
#[command(name = "fxmon")]
#[command(version)]
#[command(about = "Liveness monitoring and tick-time telemetry for a managed game server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the telemetry daemon
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "fxmon.toml")]
        config: String,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the 6h performance summary of a persisted perf log
    Summary {
        /// Perf data file
        #[arg(short, long, default_value = "data/stats_perf.json")]
        file: String,

        /// Configuration file supplying the retention and min-tick settings
        #[arg(short, long)]
        config: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Fetch and print the current tick counters once
    Probe {
        /// Base URL of the managed server
        #[arg(short, long, default_value = "http://127.0.0.1:30120")]
        url: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        #[arg(short, long, default_value = "fxmon.toml")]
        file: String,
    },

    /// Validate configuration file
    Validate {
        #[arg(short, long, default_value = "fxmon.toml")]
        file: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

pub fn print_banner() {
    println!(
        "{}",
        format!(
            r#"
╔═══════════════════════════════════════════════╗
║                                               ║
║   FXMON  v{:<8}                             ║
║                                               ║
║   Server liveness and tick-time telemetry     ║
║                                               ║
╚═══════════════════════════════════════════════╝
"#,
            env!("CARGO_PKG_VERSION")
        )
        .bright_cyan()
        .bold()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_parsing() {
        let cli = Cli::parse_from(["fxmon", "start", "--verbose"]);
        match cli.command {
            Commands::Start { config, verbose } => {
                assert_eq!(config, "fxmon.toml");
                assert!(verbose);
            }
            _ => panic!("expected start command"),
        }
    }

    #[test]
    fn test_summary_format_parsing() {
        let cli = Cli::parse_from(["fxmon", "summary", "--file", "perf.json", "--format", "json"]);
        match cli.command {
            Commands::Summary { file, config, format } => {
                assert_eq!(file, "perf.json");
                assert_eq!(config, None);
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected summary command"),
        }

        assert!(Cli::try_parse_from(["fxmon", "summary", "--format", "yaml"]).is_err());

        let cli = Cli::parse_from(["fxmon", "summary", "-c", "fxmon.toml"]);
        assert!(matches!(
            cli.command,
            Commands::Summary { config: Some(path), .. } if path == "fxmon.toml"
        ));
    }

    #[test]
    fn test_config_validate_parsing() {
        let cli = Cli::parse_from(["fxmon", "config", "validate", "-f", "custom.toml"]);
        assert!(matches!(
            cli.command,
            Commands::Config { action: ConfigAction::Validate { file } } if file == "custom.toml"
        ));
    }
}
