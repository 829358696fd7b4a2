//! Shared latency aggregate
//!
//! One `LatencyAggregator` per run, owned by the client pool and shared with
//! every session through an `Arc`. Sessions fold their recorder into it once
//! they have completed their share of the report interval; everything behind
//! the mutex is touched only at those merge points.
//!
//! Warm-up: a merged chunk is discarded when the run-wide message count
//! *before* the chunk is below `warmup_messages`. Discarded samples still
//! advance the run-wide count, so warm-up ends after the first chunk that
//! crosses the threshold.
//!
//! Reporting: merged samples accumulate in the current interval. As soon as the
//! interval holds `report_size` samples an [`IntervalReport`] is cut, the
//! aggregate histogram is reset and the interval count starts again at 0. A
//! pool sets `report_size` to session count times the per-session share, so
//! share-sized chunks land exactly on the boundary.
//!
//! Residual: chunks smaller than a share (a session flushing at close) go to
//! [`LatencyAggregator::merge_residual`]. They are kept apart from the interval
//! so they never push a report past `report_size`.

use super::recorder::{new_histogram, SessionRecorder};
use super::snapshot::LatencySnapshot;
use crate::core::RecorderError;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    /// Samples per report across all sessions
    pub report_size: u64,
    /// Run-wide samples to discard before recording starts
    pub warmup_messages: u64,
    /// Histogram precision
    pub significant_figures: u8,
}

/// Lifetime counters for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AggregateTotals {
    /// Samples merged into the aggregate, reported or not
    pub merged_samples: u64,
    /// Samples flushed below a full share, never reported
    pub residual_samples: u64,
    /// Samples discarded during warm-up
    pub warmup_samples: u64,
    /// Reports cut so far
    pub reports: u64,
    /// Run-wide samples seen by the aggregator, warm-up included
    pub messages_total: u64,
}

/// One report interval, ready for the emitter
#[derive(Debug, Clone)]
pub struct IntervalReport {
    /// 1-based report number
    pub sequence: u64,
    /// Wall-clock start of the interval (previous report, or run start)
    pub interval_start: SystemTime,
    /// Wall-clock time the report was cut
    pub interval_end: SystemTime,
    pub snapshot: LatencySnapshot,
    /// Interval histogram, serialized into the interval log
    pub histogram: Histogram<u64>,
    /// Run-wide samples including warm-up
    pub messages_total: u64,
    /// Time since the aggregator was created
    pub run_elapsed: Duration,
}

impl IntervalReport {
    pub fn interval_length(&self) -> Duration {
        self.interval_end
            .duration_since(self.interval_start)
            .unwrap_or_default()
    }

    /// Run-wide messages per second
    pub fn messages_per_second(&self) -> f64 {
        let secs = self.run_elapsed.as_secs_f64();
        if secs > 0.0 {
            self.messages_total as f64 / secs
        } else {
            0.0
        }
    }
}

/// Result of folding one recorder into the aggregate
#[derive(Debug)]
pub enum MergeOutcome {
    /// Recorder held no samples
    Empty,
    /// Chunk discarded as warm-up
    WarmingUp { discarded: u64, messages_total: u64 },
    /// Chunk merged, interval not complete yet
    Merged { in_interval: u64 },
    /// Chunk merged and completed an interval
    Report(Box<IntervalReport>),
    /// Chunk kept as unreported residual
    Residual { residual: u64 },
}

struct AggregateState {
    histogram: Histogram<u64>,
    residual: Histogram<u64>,
    in_interval: u64,
    interval_start: SystemTime,
    totals: AggregateTotals,
}

#[derive(Clone, Copy)]
enum Target {
    Interval,
    Residual,
}

pub struct LatencyAggregator {
    settings: AggregatorSettings,
    run_started: Instant,
    state: Mutex<AggregateState>,
}

impl LatencyAggregator {
    pub fn new(settings: AggregatorSettings) -> Result<Self, RecorderError> {
        let histogram = new_histogram(settings.significant_figures)?;
        let residual = new_histogram(settings.significant_figures)?;
        Ok(Self {
            settings,
            run_started: Instant::now(),
            state: Mutex::new(AggregateState {
                histogram,
                residual,
                in_interval: 0,
                interval_start: SystemTime::now(),
                totals: AggregateTotals::default(),
            }),
        })
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Fold `recorder` into the aggregate and reset it
    ///
    /// This is the only synchronization point between sessions.
    pub fn merge_from(
        &self,
        recorder: &mut SessionRecorder,
    ) -> Result<MergeOutcome, RecorderError> {
        self.fold(recorder, Target::Interval)
    }

    /// Fold a below-share `recorder` into the unreported residual and reset it
    pub fn merge_residual(
        &self,
        recorder: &mut SessionRecorder,
    ) -> Result<MergeOutcome, RecorderError> {
        self.fold(recorder, Target::Residual)
    }

    fn fold(
        &self,
        recorder: &mut SessionRecorder,
        target: Target,
    ) -> Result<MergeOutcome, RecorderError> {
        let chunk = recorder.interval_count();
        if chunk == 0 {
            return Ok(MergeOutcome::Empty);
        }

        let outcome = {
            let mut state = self.state.lock();
            let before = state.totals.messages_total;
            state.totals.messages_total += chunk;

            if before < self.settings.warmup_messages {
                state.totals.warmup_samples += chunk;
                MergeOutcome::WarmingUp {
                    discarded: chunk,
                    messages_total: state.totals.messages_total,
                }
            } else {
                let into = match target {
                    Target::Interval => &mut state.histogram,
                    Target::Residual => &mut state.residual,
                };
                into.add(recorder.histogram())
                    .map_err(|e| RecorderError::Merge(format!("{:?}", e)))?;
                state.totals.merged_samples += chunk;

                match target {
                    Target::Residual => {
                        state.totals.residual_samples += chunk;
                        MergeOutcome::Residual {
                            residual: state.totals.residual_samples,
                        }
                    }
                    Target::Interval => {
                        state.in_interval += chunk;
                        if state.in_interval >= self.settings.report_size {
                            MergeOutcome::Report(Box::new(self.cut_report(&mut state)))
                        } else {
                            MergeOutcome::Merged {
                                in_interval: state.in_interval,
                            }
                        }
                    }
                }
            }
        };

        recorder.reset();

        match &outcome {
            MergeOutcome::WarmingUp { messages_total, .. } => {
                info!(messages_total, "warming up");
            }
            MergeOutcome::Merged { in_interval } => {
                debug!(chunk, in_interval, "merged session histogram");
            }
            MergeOutcome::Residual { residual } => {
                debug!(chunk, residual, "kept residual samples");
            }
            _ => {}
        }

        Ok(outcome)
    }

    fn cut_report(&self, state: &mut AggregateState) -> IntervalReport {
        let now = SystemTime::now();
        state.totals.reports += 1;

        let report = IntervalReport {
            sequence: state.totals.reports,
            interval_start: state.interval_start,
            interval_end: now,
            snapshot: LatencySnapshot::from_histogram(&state.histogram),
            histogram: state.histogram.clone(),
            messages_total: state.totals.messages_total,
            run_elapsed: self.run_started.elapsed(),
        };

        state.histogram.reset();
        state.in_interval = 0;
        state.interval_start = now;
        report
    }

    /// Samples merged into the current, not yet reported, interval
    pub fn in_interval(&self) -> u64 {
        self.state.lock().in_interval
    }

    pub fn totals(&self) -> AggregateTotals {
        self.state.lock().totals
    }

    /// Percentiles of the current interval without resetting it
    pub fn peek(&self) -> LatencySnapshot {
        LatencySnapshot::from_histogram(&self.state.lock().histogram)
    }

    /// Everything merged but never reported: the open interval plus residual
    pub fn unreported(&self) -> Result<LatencySnapshot, RecorderError> {
        let state = self.state.lock();
        let mut tail = state.histogram.clone();
        tail.add(&state.residual).map_err(|e| RecorderError::Merge(format!("{:?}", e)))?;
        Ok(LatencySnapshot::from_histogram(&tail))
    }

    pub fn run_elapsed(&self) -> Duration {
        self.run_started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(report_size: u64, warmup_messages: u64) -> LatencyAggregator {
        LatencyAggregator::new(AggregatorSettings {
            report_size,
            warmup_messages,
            significant_figures: 3,
        })
        .unwrap()
    }

    fn recorder_with(samples: &[u64]) -> SessionRecorder {
        let mut recorder = SessionRecorder::new(3).unwrap();
        for s in samples {
            recorder.record_nanos(*s);
        }
        recorder
    }

    #[test]
    fn test_empty_merge() {
        let agg = aggregator(10, 0);
        let mut recorder = SessionRecorder::new(3).unwrap();
        assert!(matches!(agg.merge_from(&mut recorder).unwrap(), MergeOutcome::Empty));
        assert_eq!(agg.totals(), AggregateTotals::default());
    }

    #[test]
    fn test_merge_resets_recorder() {
        let agg = aggregator(10, 0);
        let mut recorder = recorder_with(&[100, 200, 300]);
        match agg.merge_from(&mut recorder).unwrap() {
            MergeOutcome::Merged { in_interval } => assert_eq!(in_interval, 3),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(recorder.interval_count(), 0);
        assert_eq!(recorder.recorded_total(), 3);
        assert_eq!(agg.in_interval(), 3);
    }

    #[test]
    fn test_report_after_exact_interval() {
        let agg = aggregator(4, 0);
        let mut first = recorder_with(&[1_000, 2_000]);
        let mut second = recorder_with(&[3_000, 4_000]);

        assert!(matches!(agg.merge_from(&mut first).unwrap(), MergeOutcome::Merged { .. }));
        let report = match agg.merge_from(&mut second).unwrap() {
            MergeOutcome::Report(report) => report,
            other => panic!("expected report, got {:?}", other),
        };

        assert_eq!(report.sequence, 1);
        assert_eq!(report.snapshot.count, 4);
        assert_eq!(report.histogram.len(), 4);
        assert!(report.snapshot.is_monotonic());

        // Aggregate and interval start over
        assert_eq!(agg.in_interval(), 0);
        assert_eq!(agg.peek().count, 0);
        assert_eq!(second.interval_count(), 0);
        assert_eq!(agg.totals().reports, 1);
    }

    #[test]
    fn test_interval_boundaries_advance() {
        let agg = aggregator(2, 0);
        let mut recorder = recorder_with(&[10, 20]);
        let first = match agg.merge_from(&mut recorder).unwrap() {
            MergeOutcome::Report(r) => r,
            other => panic!("unexpected {:?}", other),
        };
        recorder.record_nanos(30);
        recorder.record_nanos(40);
        let second = match agg.merge_from(&mut recorder).unwrap() {
            MergeOutcome::Report(r) => r,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(second.sequence, 2);
        assert_eq!(second.interval_start, first.interval_end);
        assert_eq!(second.snapshot.count, 2);
    }

    #[test]
    fn test_warmup_discards_chunks() {
        let agg = aggregator(2, 3);

        let mut recorder = recorder_with(&[1, 2]);
        assert!(matches!(
            agg.merge_from(&mut recorder).unwrap(),
            MergeOutcome::WarmingUp { discarded: 2, messages_total: 2 }
        ));

        // Count before this chunk is 2 < 3: still warm-up
        let mut recorder = recorder_with(&[3, 4]);
        assert!(matches!(agg.merge_from(&mut recorder).unwrap(), MergeOutcome::WarmingUp { .. }));

        // Count before is 4 >= 3: recorded
        let mut recorder = recorder_with(&[5, 6]);
        assert!(matches!(agg.merge_from(&mut recorder).unwrap(), MergeOutcome::Report(_)));

        let totals = agg.totals();
        assert_eq!(totals.warmup_samples, 4);
        assert_eq!(totals.merged_samples, 2);
        assert_eq!(totals.messages_total, 6);
    }

    #[test]
    fn test_share_chunks_land_on_report_size() {
        // Three sessions with a share of three: one report every nine samples
        let agg = aggregator(9, 0);
        let mut sizes = Vec::new();
        for round in 0..12u64 {
            let mut chunk = recorder_with(&[1_000 + round; 3]);
            if let MergeOutcome::Report(report) = agg.merge_from(&mut chunk).unwrap() {
                sizes.push(report.snapshot.count);
            }
        }
        assert_eq!(sizes, vec![9, 9, 9, 9]);
        assert_eq!(agg.in_interval(), 0);
    }

    #[test]
    fn test_residual_never_reported() {
        let agg = aggregator(4, 0);
        let mut tail = recorder_with(&[7_000]);
        assert!(matches!(
            agg.merge_residual(&mut tail).unwrap(),
            MergeOutcome::Residual { residual: 1 }
        ));
        assert_eq!(tail.interval_count(), 0);
        assert_eq!(agg.in_interval(), 0);

        let mut full = recorder_with(&[1_000; 4]);
        let report = match agg.merge_from(&mut full).unwrap() {
            MergeOutcome::Report(r) => r,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(report.snapshot.count, 4);
        assert!(report.snapshot.max < 2_000);

        let totals = agg.totals();
        assert_eq!(totals.merged_samples, 5);
        assert_eq!(totals.residual_samples, 1);
        let tail = agg.unreported().unwrap();
        assert_eq!(tail.count, 1);
        assert!(tail.max >= 7_000);
    }

    #[test]
    fn test_throughput() {
        let agg = aggregator(1, 0);
        let mut recorder = recorder_with(&[1]);
        let mut report = match agg.merge_from(&mut recorder).unwrap() {
            MergeOutcome::Report(r) => r,
            other => panic!("unexpected {:?}", other),
        };
        report.run_elapsed = Duration::from_secs(2);
        report.messages_total = 1_000;
        approx::assert_relative_eq!(report.messages_per_second(), 500.0);

        report.run_elapsed = Duration::ZERO;
        assert_eq!(report.messages_per_second(), 0.0);
    }
}
