pub mod types;

pub use types::*;

use crate::core::ApiToken;
use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File};
use std::path::Path;
use tracing::debug;

impl BenchConfig {
    /// Load configuration from file with optional environment variable overrides
    ///
    /// `RTLAT__LOAD__SESSION_COUNT=4` overrides `load.session_count`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_path = path.as_ref();

        let config = ConfigLoader::builder()
            .add_source(File::from(config_path))
            .add_source(Environment::with_prefix("RTLAT").separator("__"))
            .build()
            .with_context(|| {
                format!(
                    "Failed to build configuration from {}",
                    config_path.display()
                )
            })?;

        let cfg: BenchConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;
        cfg.log_summary();

        Ok(cfg)
    }

    /// Load from default location (./config/default.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("config/default.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.exchange.host.trim().is_empty() {
            anyhow::bail!("exchange.host must not be empty");
        }

        let load = &self.load;
        if load.session_count == 0 {
            anyhow::bail!("load.session_count must be at least 1");
        }
        if load.target_messages < load.session_count as u64 {
            anyhow::bail!(
                "load.target_messages ({}) must be at least load.session_count ({})",
                load.target_messages,
                load.session_count
            );
        }
        if load.report_interval == 0 {
            anyhow::bail!("load.report_interval must be positive");
        }
        if load.coin_pairs.is_empty() {
            anyhow::bail!("load.coin_pairs must name at least one instrument");
        }
        if let Some(pair) = load.coin_pairs.iter().find(|p| p.trim().is_empty()) {
            anyhow::bail!("load.coin_pairs contains an empty instrument: {:?}", pair);
        }
        // Every session needs its own token
        let last = u32::try_from(load.session_count - 1)
            .ok()
            .and_then(|index| ApiToken(load.api_token).offset(index));
        if last.is_none() {
            anyhow::bail!(
                "load.api_token {} leaves no room for {} sessions",
                load.api_token,
                load.session_count
            );
        }

        if !(1..=5).contains(&self.histogram.significant_figures) {
            anyhow::bail!(
                "histogram.significant_figures must be between 1 and 5, got {}",
                self.histogram.significant_figures
            );
        }

        if let Some(priority) = self.affinity.realtime_priority {
            if !(1..=99).contains(&priority) {
                anyhow::bail!(
                    "affinity.realtime_priority must be between 1 and 99, got {}",
                    priority
                );
            }
        }

        if let Some(tag) = &self.report.tag {
            if tag.contains(',') || tag.contains(char::is_whitespace) {
                anyhow::bail!("report.tag must not contain commas or whitespace: {:?}", tag);
            }
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.metrics.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.metrics.log_level,
                valid_log_levels
            );
        }

        if self.metrics.enable_prometheus {
            self.metrics
                .listen_addr
                .parse::<std::net::SocketAddr>()
                .with_context(|| {
                    format!("Invalid metrics.listen_addr '{}'", self.metrics.listen_addr)
                })?;
        }

        Ok(())
    }

    fn log_summary(&self) {
        debug!(
            url = %self.exchange.websocket_url(),
            sessions = self.load.session_count,
            target = self.load.target_messages,
            report_interval = self.load.report_interval,
            report_size = self.load.report_size(),
            warmup = self.load.warmup_messages,
            pairs = ?self.load.coin_pairs,
            "configuration loaded"
        );
    }
}
