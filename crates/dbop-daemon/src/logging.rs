//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::{DaemonError, DaemonResult};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> DaemonResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| DaemonError::Config(format!("Invalid log level {}: {e}", config.level)))?,
    };

    let output: Box<dyn Layer<Registry> + Send + Sync> = match (config.json, config.timestamps) {
        (true, true) => fmt::layer().json().boxed(),
        (true, false) => fmt::layer().json().without_time().boxed(),
        (false, true) => fmt::layer().boxed(),
        (false, false) => fmt::layer().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| DaemonError::Config(format!("Logging already initialised: {e}")))
}
