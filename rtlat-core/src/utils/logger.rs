use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing logger
///
/// `RUST_LOG` takes precedence over `log_level`. Fails if a global subscriber
/// is already installed.
pub fn init_logger(log_level: &str, json_logs: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let installed = if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install logger: {}", e))
}
