//! Latency recording and aggregation
//!
//! ```text
//!   session thread 1 ── SessionRecorder ──┐
//!   session thread 2 ── SessionRecorder ──┼── merge (once per share) ──→ LatencyAggregator
//!   session thread N ── SessionRecorder ──┘                                   │
//!                                                        report interval reached
//!                                                                             ▼
//!                                                             IntervalReport → reporter thread
//! ```
//!
//! Recorders are single-writer and lock-free; the aggregator is the only
//! shared mutable state and is touched once per merge, not per sample.

pub mod aggregator;
pub mod recorder;
pub mod snapshot;

pub use aggregator::{
    AggregateTotals, AggregatorSettings, IntervalReport, LatencyAggregator, MergeOutcome,
};
pub use recorder::{new_histogram, SessionRecorder};
pub use snapshot::LatencySnapshot;
