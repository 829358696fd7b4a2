//! Prometheus metrics for benchmark runs
//!
//! Provides metrics for:
//! - Session activity (round trips, requests, lifecycle)
//! - Correlation health (mismatches, stalled sessions)
//! - Reports (interval percentiles, throughput, log writes)

use crate::latency::{IntervalReport, LatencySnapshot};
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use tracing::info;

/// Central registry for all Prometheus metrics
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Arc<Registry>,
    session: Arc<SessionMetrics>,
    report: Arc<ReportMetrics>,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metric families
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());

        let session = Arc::new(SessionMetrics::new(&registry)?);
        let report = Arc::new(ReportMetrics::new(&registry)?);

        info!("Prometheus metrics registry initialized");

        Ok(Self {
            registry,
            session,
            report,
        })
    }

    /// Get the underlying Prometheus registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session(&self) -> &SessionMetrics {
        &self.session
    }

    pub fn report(&self) -> &ReportMetrics {
        &self.report
    }
}

/// Per-session activity, summed over all sessions
pub struct SessionMetrics {
    /// Matched acknowledgements by leg (order, cancel)
    pub round_trips_total: IntCounterVec,
    /// Requests written by kind (AUTHENTICATE, CREATE_ORDER, ...)
    pub requests_sent_total: IntCounterVec,
    /// Acknowledgements that matched no pending request, by reason
    pub correlation_mismatches_total: IntCounterVec,
    /// Inbound messages dropped as malformed or unexpected
    pub protocol_errors_total: IntCounter,
    /// Sessions currently connected
    pub sessions_active: IntGauge,
    /// Sessions that stopped advancing after a mismatch left nothing in flight
    pub sessions_stalled_total: IntCounter,
    /// Sessions that ended on a connection error
    pub sessions_failed_total: IntCounter,
}

impl SessionMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let round_trips_total = IntCounterVec::new(
            Opts::new("session_round_trips_total", "Matched acknowledgements").namespace("rtlat"),
            &["leg"],
        )?;
        registry.register(Box::new(round_trips_total.clone()))?;

        let requests_sent_total = IntCounterVec::new(
            Opts::new("session_requests_sent_total", "Requests written to the transport")
                .namespace("rtlat"),
            &["kind"],
        )?;
        registry.register(Box::new(requests_sent_total.clone()))?;

        let correlation_mismatches_total = IntCounterVec::new(
            Opts::new(
                "session_correlation_mismatches_total",
                "Acknowledgements not matching a pending request",
            )
            .namespace("rtlat"),
            &["reason"],
        )?;
        registry.register(Box::new(correlation_mismatches_total.clone()))?;

        let protocol_errors_total = IntCounter::with_opts(
            Opts::new("session_protocol_errors_total", "Inbound messages dropped")
                .namespace("rtlat"),
        )?;
        registry.register(Box::new(protocol_errors_total.clone()))?;

        let sessions_active = IntGauge::with_opts(
            Opts::new("sessions_active", "Sessions currently connected").namespace("rtlat"),
        )?;
        registry.register(Box::new(sessions_active.clone()))?;

        let sessions_stalled_total = IntCounter::with_opts(
            Opts::new(
                "sessions_stalled_total",
                "Sessions left with no request in flight after a correlation mismatch",
            )
            .namespace("rtlat"),
        )?;
        registry.register(Box::new(sessions_stalled_total.clone()))?;

        let sessions_failed_total = IntCounter::with_opts(
            Opts::new(
                "sessions_failed_total",
                "Sessions ended by a connection error",
            )
            .namespace("rtlat"),
        )?;
        registry.register(Box::new(sessions_failed_total.clone()))?;

        Ok(Self {
            round_trips_total,
            requests_sent_total,
            correlation_mismatches_total,
            protocol_errors_total,
            sessions_active,
            sessions_stalled_total,
            sessions_failed_total,
        })
    }
}

/// Interval report output
pub struct ReportMetrics {
    /// Reports emitted
    pub reports_total: IntCounter,
    /// Samples discarded during warm-up
    pub warmup_samples_total: IntCounter,
    /// Latest interval percentiles in nanoseconds
    pub interval_latency_ns: IntGaugeVec,
    /// Latest run-wide throughput
    pub messages_per_second: Gauge,
    /// Failed interval log writes
    pub hlog_write_errors_total: IntCounter,
}

impl ReportMetrics {
    fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let reports_total = IntCounter::with_opts(
            Opts::new("reports_total", "Interval reports emitted").namespace("rtlat"),
        )?;
        registry.register(Box::new(reports_total.clone()))?;

        let warmup_samples_total = IntCounter::with_opts(
            Opts::new("warmup_samples_total", "Samples discarded during warm-up")
                .namespace("rtlat"),
        )?;
        registry.register(Box::new(warmup_samples_total.clone()))?;

        let interval_latency_ns = IntGaugeVec::new(
            Opts::new(
                "interval_latency_ns",
                "Round-trip latency of the last reported interval",
            )
            .namespace("rtlat"),
            &["quantile"],
        )?;
        registry.register(Box::new(interval_latency_ns.clone()))?;

        let messages_per_second = Gauge::with_opts(
            Opts::new("messages_per_second", "Run-wide acknowledged messages per second")
                .namespace("rtlat"),
        )?;
        registry.register(Box::new(messages_per_second.clone()))?;

        let hlog_write_errors_total = IntCounter::with_opts(
            Opts::new("hlog_write_errors_total", "Failed interval log writes").namespace("rtlat"),
        )?;
        registry.register(Box::new(hlog_write_errors_total.clone()))?;

        Ok(Self {
            reports_total,
            warmup_samples_total,
            interval_latency_ns,
            messages_per_second,
            hlog_write_errors_total,
        })
    }

    /// Publish one interval report
    pub fn observe(&self, report: &IntervalReport) {
        self.reports_total.inc();
        self.set_percentiles(&report.snapshot);
        self.messages_per_second.set(report.messages_per_second());
    }

    fn set_percentiles(&self, snapshot: &LatencySnapshot) {
        let values = snapshot.values();
        for ((label, _), value) in LatencySnapshot::QUANTILES.iter().zip(values.iter()) {
            self.interval_latency_ns
                .with_label_values(&[*label])
                .set(clamp_i64(*value));
        }
        self.interval_latency_ns
            .with_label_values(&["max"])
            .set(clamp_i64(snapshot.max));
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::new_histogram;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_registry_creation() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.session().round_trips_total.with_label_values(&["order"]).inc();
        metrics.session().sessions_active.inc();

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "rtlat_session_round_trips_total"));
        assert!(families.iter().any(|f| f.get_name() == "rtlat_sessions_active"));
    }

    #[test]
    fn test_observe_report() {
        let metrics = MetricsRegistry::new().unwrap();
        let mut histogram = new_histogram(3).unwrap();
        histogram.record(1_000).unwrap();
        histogram.record(2_000).unwrap();
        let now = SystemTime::now();
        let report = IntervalReport {
            sequence: 1,
            interval_start: now,
            interval_end: now,
            snapshot: LatencySnapshot::from_histogram(&histogram),
            histogram,
            messages_total: 100,
            run_elapsed: Duration::from_secs(10),
        };

        metrics.report().observe(&report);

        assert_eq!(metrics.report().reports_total.get(), 1);
        assert_eq!(
            metrics.report().interval_latency_ns.with_label_values(&["max"]).get(),
            report.snapshot.max as i64
        );
        approx::assert_relative_eq!(metrics.report().messages_per_second.get(), 10.0);
    }
}
