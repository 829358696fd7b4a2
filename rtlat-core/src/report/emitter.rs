//! Report emitter
//!
//! Turns each [`IntervalReport`] into a JSON percentile summary on the log and
//! an interval record in the histogram log. Runs on the reporter thread, fed by
//! sessions through a channel.

use super::hlog::HistogramLogWriter;
use crate::latency::{IntervalReport, LatencySnapshot};
use crate::monitoring::MetricsRegistry;
use anyhow::{Context, Result};
use crossbeam::channel::Receiver;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::UNIX_EPOCH;
use tracing::{error, info};

/// Log file for runs against `host`
///
/// `<output_dir>/<host with '.' replaced by '_'>/histogram.hlog`
pub fn log_path_for(output_dir: &Path, host: &str) -> PathBuf {
    output_dir.join(host.replace('.', "_")).join("histogram.hlog")
}

/// Human-readable form of one report
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub sequence: u64,
    /// Interval start, milliseconds since epoch
    pub interval_start_ms: u64,
    pub interval_length_s: f64,
    /// Percentiles in nanoseconds
    pub latency_ns: LatencySnapshot,
    pub messages_total: u64,
    pub run_elapsed_s: f64,
    pub messages_per_second: f64,
}

impl From<&IntervalReport> for ReportSummary {
    fn from(report: &IntervalReport) -> Self {
        Self {
            sequence: report.sequence,
            interval_start_ms: report
                .interval_start
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            interval_length_s: report.interval_length().as_secs_f64(),
            latency_ns: report.snapshot,
            messages_total: report.messages_total,
            run_elapsed_s: report.run_elapsed.as_secs_f64(),
            messages_per_second: report.messages_per_second(),
        }
    }
}

pub struct ReportEmitter {
    writer: Option<HistogramLogWriter<BufWriter<File>>>,
    log_path: Option<PathBuf>,
    metrics: Option<MetricsRegistry>,
    emitted: u64,
}

impl ReportEmitter {
    /// Emitter that only logs summaries
    pub fn log_only() -> Self {
        Self {
            writer: None,
            log_path: None,
            metrics: None,
            emitted: 0,
        }
    }

    /// Emitter appending to `log_path`
    pub fn with_log(log_path: PathBuf, tag: Option<String>) -> Result<Self> {
        let writer = HistogramLogWriter::append_to(&log_path, tag)
            .with_context(|| format!("Failed to open histogram log {}", log_path.display()))?;
        info!(path = %log_path.display(), "writing interval histograms");
        Ok(Self {
            writer: Some(writer),
            log_path: Some(log_path),
            metrics: None,
            emitted: 0,
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Publish one report
    ///
    /// A failed log write is logged and counted; the run goes on.
    pub fn emit(&mut self, report: &IntervalReport) -> ReportSummary {
        let summary = ReportSummary::from(report);
        self.emitted += 1;

        match serde_json::to_string_pretty(&summary) {
            Ok(json) => info!(sequence = summary.sequence, "latency report\n{}", json),
            Err(e) => error!(sequence = summary.sequence, error = %e, "cannot format report"),
        }
        info!(
            elapsed_s = %format!("{:.1}", summary.run_elapsed_s),
            messages = summary.messages_total,
            msg_per_s = %format!("{:.1}", summary.messages_per_second),
            "throughput"
        );

        if let Some(writer) = self.writer.as_mut() {
            let written = writer.write_interval(
                &report.histogram,
                report.interval_start,
                report.interval_end,
            );
            if let Err(e) = written {
                error!(sequence = summary.sequence, error = %e, "histogram log write failed");
                if let Some(metrics) = &self.metrics {
                    metrics.report().hlog_write_errors_total.inc();
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.report().observe(report);
        }

        summary
    }
}

/// Run `emitter` on its own thread until every report sender is dropped
///
/// Joins to the number of reports emitted.
pub fn spawn_reporter(
    mut emitter: ReportEmitter,
    reports: Receiver<IntervalReport>,
) -> Result<JoinHandle<u64>> {
    std::thread::Builder::new()
        .name("rtlat-reporter".to_string())
        .spawn(move || {
            for report in reports.iter() {
                emitter.emit(&report);
            }
            emitter.emitted()
        })
        .context("Failed to spawn reporter thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::new_histogram;
    use crate::report::HistogramLogReader;
    use std::time::{Duration, SystemTime};

    fn report(sequence: u64) -> IntervalReport {
        let mut histogram = new_histogram(3).unwrap();
        histogram.record(250_000).unwrap();
        histogram.record(500_000).unwrap();
        let end = SystemTime::now();
        IntervalReport {
            sequence,
            interval_start: end - Duration::from_millis(500),
            interval_end: end,
            snapshot: LatencySnapshot::from_histogram(&histogram),
            histogram,
            messages_total: 2 * sequence,
            run_elapsed: Duration::from_secs(sequence),
        }
    }

    #[test]
    fn test_log_path_for_host() {
        assert_eq!(
            log_path_for(Path::new("/tmp/out"), "10.0.1.17"),
            PathBuf::from("/tmp/out/10_0_1_17/histogram.hlog")
        );
        assert_eq!(
            log_path_for(Path::new("out"), "localhost"),
            PathBuf::from("out/localhost/histogram.hlog")
        );
    }

    #[test]
    fn test_summary_fields() {
        let summary = ReportSummary::from(&report(3));
        assert_eq!(summary.sequence, 3);
        assert_eq!(summary.latency_ns.count, 2);
        approx::assert_relative_eq!(summary.messages_per_second, 2.0);
        approx::assert_relative_eq!(summary.interval_length_s, 0.5, epsilon = 1e-6);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json["latency_ns"]["p99.9"].is_u64());
    }

    #[test]
    fn test_emit_writes_log_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path_for(dir.path(), "127.0.0.1");
        let metrics = MetricsRegistry::new().unwrap();

        let mut emitter = ReportEmitter::with_log(path.clone(), Some("t".into()))
            .unwrap()
            .with_metrics(metrics.clone());
        emitter.emit(&report(1));
        emitter.emit(&report(2));
        assert_eq!(emitter.emitted(), 2);
        assert_eq!(metrics.report().reports_total.get(), 2);

        let entries = HistogramLogReader::open(&path).unwrap().entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.tag.as_deref() == Some("t")));
    }

    #[test]
    fn test_reporter_thread_drains_channel() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = spawn_reporter(ReportEmitter::log_only(), rx).unwrap();
        tx.send(report(1)).unwrap();
        tx.send(report(2)).unwrap();
        drop(tx);
        assert_eq!(handle.join().unwrap(), 2);
    }
}
