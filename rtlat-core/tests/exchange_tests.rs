//! Runs against the socket-level mock exchange
//!
//! Real WebSocket sessions and real seeding requests over localhost.

use rtlat_core::core::{ApiToken, SessionState};
use rtlat_core::orchestrator::{currencies, AccountSeeder, ClientPool};
use rtlat_core::report::{log_path_for, HistogramLogReader};
use rtlat_core::session::WsConnector;
use rtlat_core::testing::MockExchange;
use std::time::Duration;

#[tokio::test]
async fn test_seed_all_accounts() -> anyhow::Result<()> {
    let exchange = MockExchange::start()?;
    let config = exchange.bench_config();
    let seeder = AccountSeeder::from_config(&config)?;

    let tokens = [ApiToken(3001), ApiToken(3002)];
    let currencies = currencies(&["BTC_EUR", "BTC_USDT"]);
    let requests = seeder.seed_all(&tokens, &currencies).await?;

    assert_eq!(requests, 6);
    let seeded = exchange.seeded();
    assert_eq!(seeded.len(), 6);
    assert!(seeded.contains(&"/private/account/user/balances/3001/BTC/100000000".to_string()));
    assert!(seeded.contains(&"/private/account/user/balances/3002/USDT/100000000".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_seeding_failure_is_reported() -> anyhow::Result<()> {
    let exchange = MockExchange::start()?;
    // Points at the mock but below the account service path
    let base_url = format!("{}/nowhere", exchange.exchange_config().http_base_url());
    let seeder = AccountSeeder::new(base_url, 1, false)?;

    let err = seeder.seed(ApiToken(1), "BTC").await.err();
    let message = err.map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("404"), "{}", message);
    Ok(())
}

#[test]
fn test_pool_against_mock_exchange() -> anyhow::Result<()> {
    let exchange = MockExchange::start()?;
    let output = tempfile::tempdir()?;

    let mut config = exchange.bench_config();
    config.load.session_count = 2;
    config.load.target_messages = 200;
    config.load.report_interval = 50;
    config.load.warmup_messages = 0;
    config.load.coin_pairs = vec!["BTC_EUR".to_string()];
    config.report.output_dir = output.path().to_path_buf();
    config.report.tag = Some("mock".to_string());

    let pool = ClientPool::new(config)?;
    let connector = WsConnector::from_exchange(&pool.config().exchange)?;
    let summary = pool.run(connector, Some(Duration::from_secs(30)))?;

    assert!(!summary.stopped_early);
    assert_eq!(summary.failed_sessions(), 0);
    assert_eq!(summary.stalled_sessions(), 0);
    for session in &summary.sessions {
        assert_eq!(session.state, SessionState::Closed);
        assert!(session.reached_target(100));
        assert_eq!(session.mismatches, 0);
    }
    assert_eq!(summary.responses(), 200);
    assert_eq!(summary.totals.merged_samples, 200);
    assert_eq!(summary.reports_emitted, 4);

    // Seeding: two tokens times BTC and EUR
    assert_eq!(exchange.seeded().len(), 4);
    assert_eq!(exchange.connections(), 2);

    let path = log_path_for(output.path(), "127.0.0.1");
    let entries = HistogramLogReader::open(&path)?.entries()?;
    assert_eq!(entries.len(), 4);
    for entry in &entries {
        assert_eq!(entry.tag.as_deref(), Some("mock"));
        assert_eq!(entry.decode_histogram()?.len(), 50);
    }
    Ok(())
}

#[test]
fn test_unreachable_exchange_fails_sessions() -> anyhow::Result<()> {
    let exchange = MockExchange::start()?;
    let mut config = exchange.bench_config();
    config.seeding.enabled = false;
    config.load.session_count = 2;
    config.load.target_messages = 10;
    drop(exchange);

    let pool = ClientPool::new(config)?;
    let connector = WsConnector::from_exchange(&pool.config().exchange)?;
    let summary = pool
        .start(rtlat_core::report::ReportEmitter::log_only(), connector)?
        .wait(Some(Duration::from_secs(10)))?;

    assert_eq!(summary.failed_sessions(), 2);
    assert_eq!(summary.responses(), 0);
    assert_eq!(summary.reports_emitted, 0);
    Ok(())
}
