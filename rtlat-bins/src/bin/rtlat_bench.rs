//! Round-trip order latency benchmark
//!
//! Seeds the session accounts, runs every session against the exchange
//! WebSocket endpoint, and writes one interval histogram per report to
//! `<output_dir>/<host>/histogram.hlog`.
//!
//! Ctrl+C stops all sessions; each merges what it has recorded before closing.

use anyhow::{Context, Result};
use clap::Parser;
use rtlat_bins::common::{print_summary, BenchArgs};
use rtlat_core::monitoring::{spawn_metrics_server, MetricsRegistry, MetricsServerConfig};
use rtlat_core::session::WsConnector;
use rtlat_core::utils::init_logger;
use rtlat_core::ClientPool;

fn main() -> Result<()> {
    let args = BenchArgs::parse();
    let config = args.load_config()?;

    init_logger(&config.metrics.log_level, config.metrics.json_logs)?;

    tracing::info!("=== rtlat: round-trip order latency ===");
    tracing::info!("Endpoint: {}", config.exchange.websocket_url());
    tracing::info!(
        "Sessions: {}, target: {}, report every {} samples",
        config.load.session_count,
        config.load.target_messages,
        config.load.report_interval
    );

    let metrics = MetricsRegistry::new().context("Failed to create metrics registry")?;
    let _metrics_server = if config.metrics.enable_prometheus {
        let addr = config
            .metrics
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid metrics address {}", config.metrics.listen_addr))?;
        Some(spawn_metrics_server(MetricsServerConfig::new(addr), metrics.clone())?)
    } else {
        None
    };

    let connector =
        WsConnector::from_exchange(&config.exchange).context("Failed to set up transport")?;
    let pool = ClientPool::new(config)?.with_metrics(metrics);

    let seeded = pool.seed_accounts()?;
    if seeded > 0 {
        tracing::info!("Seeded {} balances", seeded);
    }

    let emitter = pool.default_emitter()?;
    let running = pool.start(emitter, connector)?;

    let stop = running.stop_handle();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping sessions");
        stop.stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    let summary = running.wait(args.deadline())?;
    print_summary(&summary);

    if summary.failed_sessions() == summary.sessions.len() {
        anyhow::bail!("every session failed");
    }
    Ok(())
}
