use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::settings::LoggingSettings;

/// Install the global `tracing` subscriber. `RUST_LOG` wins over the configured
/// filter.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.filter)
            .with_context(|| format!("invalid log filter {:?}", settings.filter))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.ansi)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
