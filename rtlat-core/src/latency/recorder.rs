use crate::core::{RecorderError, MAX_TRACKABLE_LATENCY_NS, MIN_TRACKABLE_LATENCY_NS};
use hdrhistogram::Histogram;
use std::time::Duration;

/// Histogram covering 1ns..=1h at `sigfig` significant figures
pub fn new_histogram(sigfig: u8) -> Result<Histogram<u64>, RecorderError> {
    Histogram::new_with_bounds(MIN_TRACKABLE_LATENCY_NS, MAX_TRACKABLE_LATENCY_NS, sigfig).map_err(
        |e| RecorderError::Creation {
            sigfig,
            reason: format!("{:?}", e),
        },
    )
}

/// Per-session round-trip recorder
///
/// Owned by exactly one session; all methods take `&mut self`, so no
/// synchronization is involved. The histogram holds the samples recorded since
/// the last merge into the shared aggregate.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    histogram: Histogram<u64>,
    recorded_total: u64,
    clamped: u64,
}

impl SessionRecorder {
    pub fn new(sigfig: u8) -> Result<Self, RecorderError> {
        Ok(Self {
            histogram: new_histogram(sigfig)?,
            recorded_total: 0,
            clamped: 0,
        })
    }

    /// Record one round trip; zero durations are rejected
    pub fn record(&mut self, rtt: Duration) -> bool {
        let nanos = u64::try_from(rtt.as_nanos()).unwrap_or(u64::MAX);
        self.record_nanos(nanos)
    }

    /// Record one round trip in nanoseconds; `0` is rejected
    ///
    /// Values above one hour are clamped to one hour and counted.
    pub fn record_nanos(&mut self, nanos: u64) -> bool {
        if nanos == 0 {
            return false;
        }
        if nanos > MAX_TRACKABLE_LATENCY_NS {
            self.clamped += 1;
        }
        self.histogram.saturating_record(nanos.min(MAX_TRACKABLE_LATENCY_NS));
        self.recorded_total += 1;
        true
    }

    /// Samples held since the last reset
    pub fn interval_count(&self) -> u64 {
        self.histogram.len()
    }

    /// Samples recorded over the recorder's lifetime
    pub fn recorded_total(&self) -> u64 {
        self.recorded_total
    }

    /// Samples that exceeded the trackable range
    pub fn clamped(&self) -> u64 {
        self.clamped
    }

    pub fn histogram(&self) -> &Histogram<u64> {
        &self.histogram
    }

    /// Start a new interval; lifetime counters are kept
    pub fn reset(&mut self) {
        self.histogram.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut recorder = SessionRecorder::new(3).unwrap();
        assert!(recorder.record(Duration::from_micros(250)));
        assert!(recorder.record_nanos(1_000));
        assert_eq!(recorder.interval_count(), 2);

        recorder.reset();
        assert_eq!(recorder.interval_count(), 0);
        assert_eq!(recorder.recorded_total(), 2);
    }

    #[test]
    fn test_zero_rejected() {
        let mut recorder = SessionRecorder::new(3).unwrap();
        assert!(!recorder.record(Duration::ZERO));
        assert!(!recorder.record_nanos(0));
        assert_eq!(recorder.interval_count(), 0);
        assert_eq!(recorder.recorded_total(), 0);
    }

    #[test]
    fn test_clamped_to_one_hour() {
        let mut recorder = SessionRecorder::new(3).unwrap();
        assert!(recorder.record(Duration::from_secs(2 * 3600)));
        assert_eq!(recorder.clamped(), 1);
        assert!(recorder.histogram().max() >= MAX_TRACKABLE_LATENCY_NS * 999 / 1000);
    }

    #[test]
    fn test_precision_rejected() {
        assert!(matches!(
            SessionRecorder::new(6),
            Err(RecorderError::Creation { sigfig: 6, .. })
        ));
    }
}
