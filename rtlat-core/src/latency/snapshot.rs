use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Percentiles reported for every interval, in nanoseconds
///
/// Serialized field names match the report keys (`p99.9`, `p99.99`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatencySnapshot {
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    #[serde(rename = "p99.9")]
    pub p99_9: u64,
    #[serde(rename = "p99.99")]
    pub p99_99: u64,
    pub max: u64,
    pub count: u64,
}

impl LatencySnapshot {
    /// Quantiles in report order, paired with their labels
    pub const QUANTILES: [(&'static str, f64); 6] = [
        ("p50", 0.50),
        ("p90", 0.90),
        ("p95", 0.95),
        ("p99", 0.99),
        ("p99.9", 0.999),
        ("p99.99", 0.9999),
    ];

    pub fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }
        Self {
            p50: histogram.value_at_quantile(0.50),
            p90: histogram.value_at_quantile(0.90),
            p95: histogram.value_at_quantile(0.95),
            p99: histogram.value_at_quantile(0.99),
            p99_9: histogram.value_at_quantile(0.999),
            p99_99: histogram.value_at_quantile(0.9999),
            max: histogram.max(),
            count: histogram.len(),
        }
    }

    /// Values in the order of [`Self::QUANTILES`] followed by `max`
    pub fn values(&self) -> [u64; 7] {
        [
            self.p50, self.p90, self.p95, self.p99, self.p99_9, self.p99_99, self.max,
        ]
    }

    /// p50 <= p90 <= ... <= p99.99 <= max
    pub fn is_monotonic(&self) -> bool {
        self.values().windows(2).all(|w| w[0] <= w[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latency::new_histogram;
    use proptest::prelude::*;

    #[test]
    fn test_empty_histogram() {
        let histogram = new_histogram(3).unwrap();
        let snapshot = LatencySnapshot::from_histogram(&histogram);
        assert_eq!(snapshot, LatencySnapshot::default());
        assert!(snapshot.is_monotonic());
    }

    #[test]
    fn test_uniform_distribution() {
        let mut histogram = new_histogram(3).unwrap();
        for v in 1..=10_000u64 {
            histogram.record(v * 1_000).unwrap();
        }
        let snapshot = LatencySnapshot::from_histogram(&histogram);
        assert_eq!(snapshot.count, 10_000);
        // 0.1% relative precision at 3 significant figures
        assert!((snapshot.p50 as f64 - 5_000_000.0).abs() / 5_000_000.0 < 0.002);
        assert!((snapshot.p99 as f64 - 9_900_000.0).abs() / 9_900_000.0 < 0.002);
        assert!(snapshot.is_monotonic());
    }

    #[test]
    fn test_json_keys() {
        let snapshot = LatencySnapshot {
            p50: 1,
            p90: 2,
            p95: 3,
            p99: 4,
            p99_9: 5,
            p99_99: 6,
            max: 7,
            count: 8,
        };
        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["p99.9"], 5);
        assert_eq!(json["p99.99"], 6);
        assert_eq!(json["max"], 7);
    }

    #[test]
    fn test_percentiles_non_decreasing() {
        proptest!(|(samples in prop::collection::vec(1u64..3_600_000_000_000, 1..500))| {
            let mut histogram = new_histogram(3).unwrap();
            for s in &samples {
                histogram.record(*s).unwrap();
            }
            let snapshot = LatencySnapshot::from_histogram(&histogram);
            prop_assert!(snapshot.is_monotonic(), "{:?}", snapshot);
            prop_assert_eq!(snapshot.count, samples.len() as u64);
        });
    }
}
