// Observability infrastructure using tracing crate
// Structured JSON logs for the collector and host watcher loops

use anyhow::{Context, Result};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Default directives when RUST_LOG is not set
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "fxmon=debug,reqwest=warn,hyper=warn"
    } else {
        "fxmon=info,reqwest=warn,hyper=warn"
    }
}

/// Initialize the global tracing subscriber
pub fn init(verbose: bool) -> Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_current_span(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE);

    // Example: RUST_LOG=fxmon::perf=debug
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(verbose)))
        .context("Failed to create tracing filter")?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("Tracing subscriber already initialized")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
    }
}
