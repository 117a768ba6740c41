//! Tracing setup: stderr plus an optional plain-text log file.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "slotclaim.log";

/// `RUST_LOG` wins over `level`.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;

            tracing_subscriber::registry()
                .with(filter(level))
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false),
                )
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
        None => {
            tracing_subscriber::registry()
                .with(filter(level))
                .with(stderr)
                .try_init()
                .context("failed to install tracing subscriber")?;
        }
    }
    Ok(())
}
