//! Logging setup using `tracing` + `tracing-subscriber`
//!
//! `--verbose` selects DEBUG; otherwise the level comes from the
//! `MLPIPELINE_LOG` environment variable, defaulting to INFO.

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub const LOG_ENV: &str = "MLPIPELINE_LOG";

/// Install the global subscriber; call once at startup
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        std::env::var(LOG_ENV)
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")
}

pub fn parse_level(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
