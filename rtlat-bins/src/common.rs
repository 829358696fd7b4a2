//! Shared CLI parsing and reporting for the binaries

use anyhow::{Context, Result};
use clap::Parser;
use rtlat_core::config::TransportSecurity;
use rtlat_core::{BenchConfig, RunSummary};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments; every override beats the config file
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct BenchArgs {
    /// Configuration file; defaults are used when it does not exist
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: PathBuf,

    /// Exchange host
    #[arg(long)]
    pub host: Option<String>,

    /// WebSocket port
    #[arg(long)]
    pub ws_port: Option<u16>,

    /// Account service port used for seeding
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Use wss:// and https://
    #[arg(long)]
    pub tls: bool,

    /// Concurrent sessions
    #[arg(short, long)]
    pub sessions: Option<usize>,

    /// Matched acknowledgements across all sessions
    #[arg(short = 'n', long)]
    pub messages: Option<u64>,

    /// Samples per report
    #[arg(short, long)]
    pub report_interval: Option<u64>,

    /// Samples discarded before recording
    #[arg(short, long)]
    pub warmup: Option<u64>,

    /// Token of the first session
    #[arg(long)]
    pub api_token: Option<u32>,

    /// Skip account seeding
    #[arg(long)]
    pub no_seed: bool,

    /// Pin each session to its own core, starting at this one
    #[arg(long)]
    pub pin_from: Option<usize>,

    /// Interval log root directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Tag written on every interval log line
    #[arg(long)]
    pub tag: Option<String>,

    /// Stop the run after this many seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// JSON log output
    #[arg(long)]
    pub json_logs: bool,
}

impl BenchArgs {
    /// Config file (or defaults) with the CLI overrides applied, validated
    pub fn load_config(&self) -> Result<BenchConfig> {
        let mut config = if self.config.exists() {
            BenchConfig::load(&self.config)?
        } else {
            BenchConfig::default()
        };
        self.apply_overrides(&mut config);
        config.validate().context("Invalid configuration after CLI overrides")?;
        Ok(config)
    }

    pub fn apply_overrides(&self, config: &mut BenchConfig) {
        if let Some(host) = &self.host {
            config.exchange.host = host.clone();
        }
        if let Some(port) = self.ws_port {
            config.exchange.websocket_port = port;
        }
        if let Some(port) = self.http_port {
            config.exchange.http_port = port;
        }
        if self.tls {
            config.exchange.security = TransportSecurity::Tls;
        }
        if let Some(sessions) = self.sessions {
            config.load.session_count = sessions;
        }
        if let Some(messages) = self.messages {
            config.load.target_messages = messages;
        }
        if let Some(interval) = self.report_interval {
            config.load.report_interval = interval;
        }
        if let Some(warmup) = self.warmup {
            config.load.warmup_messages = warmup;
        }
        if let Some(token) = self.api_token {
            config.load.api_token = token;
        }
        if self.no_seed {
            config.seeding.enabled = false;
        }
        if let Some(core) = self.pin_from {
            config.affinity.enabled = true;
            config.affinity.first_core = core;
        }
        if let Some(dir) = &self.output_dir {
            config.report.output_dir = dir.clone();
        }
        if let Some(tag) = &self.tag {
            config.report.tag = Some(tag.clone());
        }
        if let Some(addr) = &self.metrics_addr {
            config.metrics.enable_prometheus = true;
            config.metrics.listen_addr = addr.clone();
        }
        if let Some(level) = &self.log_level {
            config.metrics.log_level = level.clone();
        }
        if self.json_logs {
            config.metrics.json_logs = true;
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Print final statistics
pub fn print_summary(summary: &RunSummary) {
    tracing::info!("=== Final Statistics ===");
    tracing::info!("Matched acknowledgements: {}", summary.responses());
    tracing::info!("Reports emitted: {}", summary.reports_emitted);
    tracing::info!(
        "Samples merged: {} (warm-up discarded: {})",
        summary.totals.merged_samples,
        summary.totals.warmup_samples
    );
    tracing::info!("Elapsed: {:.3}s", summary.elapsed_ms as f64 / 1000.0);

    if summary.elapsed_ms > 0 {
        let rate = summary.responses() as f64 * 1000.0 / summary.elapsed_ms as f64;
        tracing::info!("Throughput: {:.1} msg/s", rate);
    }
    if summary.residual.count > 0 {
        tracing::info!(
            "Unreported tail: {} samples, p50 {}ns, p99 {}ns, max {}ns",
            summary.residual.count,
            summary.residual.p50,
            summary.residual.p99,
            summary.residual.max
        );
    }

    for session in &summary.sessions {
        match &session.failure {
            Some(reason) => tracing::warn!("Session {} failed: {}", session.token, reason),
            None if session.stalled => tracing::warn!(
                "Session {} stalled after {} responses ({} mismatches)",
                session.token,
                session.responses,
                session.mismatches
            ),
            None => {}
        }
    }
    if summary.stopped_early {
        tracing::warn!("Run stopped before every session reached its target");
    }
}
