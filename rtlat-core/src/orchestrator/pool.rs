//! Client pool
//!
//! Runs `session_count` sessions, each on its own OS thread with a
//! single-threaded tokio runtime, optionally pinned to a dedicated core.
//! Sessions share nothing but the [`LatencyAggregator`] and the report channel.
//!
//! ```text
//!                       ┌─ rtlat-session-3001 ─ run_session ─┐
//!   ClientPool::start ──┼─ rtlat-session-3002 ─ run_session ─┼──→ LatencyAggregator
//!                       └─ rtlat-session-300N ─ run_session ─┘           │
//!                                                                  IntervalReport
//!                                                                        ▼
//!                                                                 rtlat-reporter
//! ```

use super::seeding::{currencies, AccountSeeder};
use crate::config::BenchConfig;
use crate::core::ApiToken;
use crate::latency::{AggregateTotals, AggregatorSettings, LatencyAggregator, LatencySnapshot};
use crate::monitoring::MetricsRegistry;
use crate::perf;
use crate::report::{log_path_for, spawn_reporter, ReportEmitter};
use crate::session::{run_session, Connector, DriverSettings, SessionDriver, SessionSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

const WAIT_POLL: Duration = Duration::from_millis(10);

/// Raises the stop flag of a running pool
///
/// Cheap to clone; safe to call from a signal handler thread.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn stop(&self) {
        if !self.tx.send_replace(true) {
            info!("stop signal raised");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub sessions: Vec<SessionSummary>,
    pub totals: AggregateTotals,
    pub reports_emitted: u64,
    /// Samples merged but never reported: the open interval plus close-time residuals
    pub residual: LatencySnapshot,
    pub elapsed_ms: u64,
    pub stopped_early: bool,
}

impl RunSummary {
    pub fn responses(&self) -> u64 {
        self.sessions.iter().map(|s| s.responses).sum()
    }

    pub fn failed_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.failure.is_some()).count()
    }

    pub fn stalled_sessions(&self) -> usize {
        self.sessions.iter().filter(|s| s.stalled).count()
    }
}

pub struct ClientPool {
    config: BenchConfig,
    aggregator: Arc<LatencyAggregator>,
    metrics: Option<MetricsRegistry>,
    instruments: Arc<[Arc<str>]>,
}

impl ClientPool {
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;
        let aggregator = LatencyAggregator::new(AggregatorSettings {
            report_size: config.load.report_size(),
            warmup_messages: config.load.warmup_messages,
            significant_figures: config.histogram.significant_figures,
        })
        .context("Failed to create latency aggregator")?;
        let instruments = config
            .load
            .coin_pairs
            .iter()
            .map(|pair| Arc::<str>::from(pair.trim()))
            .collect();

        Ok(Self {
            config,
            aggregator: Arc::new(aggregator),
            metrics: None,
            instruments,
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &Arc<LatencyAggregator> {
        &self.aggregator
    }

    /// Sequential tokens starting at the configured base
    pub fn tokens(&self) -> Result<Vec<ApiToken>> {
        let base = ApiToken(self.config.load.api_token);
        (0..self.config.load.session_count)
            .map(|i| {
                u32::try_from(i)
                    .ok()
                    .and_then(|i| base.offset(i))
                    .with_context(|| format!("No token for session {} after base {}", i, base))
            })
            .collect()
    }

    /// Credit every session account; no-op when seeding is disabled
    pub fn seed_accounts(&self) -> Result<usize> {
        if !self.config.seeding.enabled {
            info!("account seeding disabled");
            return Ok(0);
        }
        let tokens = self.tokens()?;
        let currencies = currencies(&self.config.load.coin_pairs);
        let seeder = AccountSeeder::from_config(&self.config)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build seeding runtime")?;
        runtime.block_on(seeder.seed_all(&tokens, &currencies))
    }

    /// Emitter writing to `<output_dir>/<host>/histogram.hlog`
    pub fn default_emitter(&self) -> Result<ReportEmitter> {
        let path = log_path_for(&self.config.report.output_dir, &self.config.exchange.host);
        let emitter = ReportEmitter::with_log(path, self.config.report.tag.clone())?;
        Ok(match &self.metrics {
            Some(metrics) => emitter.with_metrics(metrics.clone()),
            None => emitter,
        })
    }

    /// Spawn the reporter and every session thread
    pub fn start<C>(&self, emitter: ReportEmitter, connector: C) -> Result<RunningPool>
    where
        C: Connector + Clone + Send + 'static,
    {
        let load = &self.config.load;
        let tokens = self.tokens()?;
        let (stop, stop_rx) = StopHandle::new();
        let (reports_tx, reports_rx) = crossbeam::channel::unbounded();
        let reporter = spawn_reporter(emitter, reports_rx)?;

        let cores = if self.config.affinity.enabled {
            let available = perf::num_cores();
            let plan = perf::plan_session_cores(
                tokens.len(),
                self.config.affinity.first_core,
                available,
            );
            let unpinned = plan.iter().filter(|core| core.is_none()).count();
            if unpinned > 0 {
                warn!(unpinned, available, "not enough cores to pin every session");
            }
            plan
        } else {
            vec![None; tokens.len()]
        };

        let target = load.per_session_target();
        let merge_every = load.merge_every();
        let close_timeout = Duration::from_millis(load.close_timeout_ms);
        let realtime_priority = self.config.affinity.realtime_priority;

        info!(
            sessions = tokens.len(),
            per_session_target = target,
            merge_every,
            report_size = self.aggregator.settings().report_size,
            endpoint = connector.endpoint(),
            "starting sessions"
        );

        let mut sessions = Vec::with_capacity(tokens.len());
        for (token, core) in tokens.iter().copied().zip(cores) {
            let settings = DriverSettings {
                token,
                target_messages: target,
                merge_every,
                instruments: self.instruments.clone(),
                significant_figures: self.config.histogram.significant_figures,
            };
            let mut driver =
                SessionDriver::new(settings, self.aggregator.clone(), reports_tx.clone())?;
            if let Some(metrics) = &self.metrics {
                driver = driver.with_metrics(metrics.clone());
            }
            let connector = connector.clone();
            let stop_rx = stop_rx.clone();

            let handle = std::thread::Builder::new()
                .name(format!("rtlat-session-{}", token))
                .spawn(move || {
                    perf::place_session_thread(core, realtime_priority);
                    match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(runtime) => runtime.block_on(run_session(
                            driver,
                            &connector,
                            stop_rx,
                            close_timeout,
                        )),
                        Err(e) => {
                            error!(%token, error = %e, "cannot build session runtime");
                            SessionSummary::not_started(token, format!("runtime: {}", e))
                        }
                    }
                })
                .with_context(|| format!("Failed to spawn thread for session {}", token));

            match handle {
                Ok(handle) => sessions.push((token, handle)),
                Err(e) => {
                    // Sessions already running must not outlive the failed start
                    stop.stop();
                    return Err(e);
                }
            }
        }

        Ok(RunningPool {
            sessions,
            reporter,
            stop,
            aggregator: self.aggregator.clone(),
            started: Instant::now(),
        })
    }

    /// Seed, start, and wait for completion
    pub fn run<C>(&self, connector: C, deadline: Option<Duration>) -> Result<RunSummary>
    where
        C: Connector + Clone + Send + 'static,
    {
        self.seed_accounts()?;
        let emitter = self.default_emitter()?;
        self.start(emitter, connector)?.wait(deadline)
    }
}

pub struct RunningPool {
    sessions: Vec<(ApiToken, JoinHandle<SessionSummary>)>,
    reporter: JoinHandle<u64>,
    stop: StopHandle,
    aggregator: Arc<LatencyAggregator>,
    started: Instant,
}

impl RunningPool {
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.sessions.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Block until every session has closed
    ///
    /// With a `deadline`, the stop flag is raised once it has elapsed.
    pub fn wait(self, deadline: Option<Duration>) -> Result<RunSummary> {
        let mut deadline_hit = false;
        while !self.is_finished() {
            if let Some(limit) = deadline {
                if !deadline_hit && self.started.elapsed() >= limit {
                    info!(deadline_ms = limit.as_millis() as u64, "run deadline reached");
                    deadline_hit = true;
                    self.stop.stop();
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
        let stopped_early = self.stop.is_stopped();

        let sessions: Vec<SessionSummary> = self
            .sessions
            .into_iter()
            .map(|(token, handle)| {
                handle.join().unwrap_or_else(|_| {
                    error!(%token, "session thread panicked");
                    SessionSummary::not_started(token, "session thread panicked".to_string())
                })
            })
            .collect();

        // Every report sender lived in a session driver; the reporter drains and exits
        let reports_emitted = self
            .reporter
            .join()
            .map_err(|_| anyhow::anyhow!("reporter thread panicked"))?;

        let summary = RunSummary {
            sessions,
            totals: self.aggregator.totals(),
            reports_emitted,
            residual: self.aggregator.unreported()?,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            stopped_early,
        };

        info!(
            responses = summary.responses(),
            reports = summary.reports_emitted,
            failed = summary.failed_sessions(),
            stalled = summary.stalled_sessions(),
            elapsed_ms = summary.elapsed_ms,
            "run finished"
        );
        Ok(summary)
    }
}
