//! Tracing subscriber setup
//!
//! `RUST_LOG` overrides the default `info` filter.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber; `json` switches to one JSON object per line
///
/// # Errors
/// When a global subscriber is already installed.
pub fn init(json: bool) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true);
    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))
    }
}
