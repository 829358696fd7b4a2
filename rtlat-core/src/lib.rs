//! rtlat Core - Round-Trip Order Latency Benchmark
//!
//! Drives synthetic order/cancel traffic against an exchange WebSocket endpoint
//! and measures the round trip of every leg with HDR histograms.
//!
//! ## Architecture
//! - **One OS thread per session**, each with a single-threaded tokio runtime,
//!   optionally pinned to its own core
//! - **Single-writer recorders**: a session only ever touches its own histogram
//!   and pending-request maps
//! - **One merge point**: per-session histograms fold into a shared aggregate
//!   once per share of the report interval, never per message
//! - **Reporter thread**: file I/O for the interval log stays off the
//!   measurement threads
//!
//! ## Core Modules
//! - `core`: Session lifecycle FSM, error taxonomy, shared identifiers
//! - `protocol`: Wire messages and the text codec
//! - `latency`: Session recorders, the shared aggregator, percentile snapshots
//! - `session`: Pending-request correlation, the session driver, transports
//! - `orchestrator`: Client pool, account seeding, thread/core planning
//! - `report`: Interval log writer/reader and the report emitter
//! - `config`: Typed benchmark configuration
//! - `monitoring`: Prometheus metrics and the HTTP exporter

pub mod core;
pub mod protocol;
pub mod latency;
pub mod session;
pub mod orchestrator;
pub mod report;
pub mod config;
pub mod monitoring;
pub mod perf;
pub mod utils;

// In-process exchange doubles used by the integration tests and benches
pub mod testing;

pub use crate::core::{ApiToken, Leg, SessionError, SessionState};
pub use crate::config::BenchConfig;
pub use crate::latency::{LatencyAggregator, LatencySnapshot, SessionRecorder};
pub use crate::orchestrator::{ClientPool, RunSummary};
pub use crate::protocol::{Codec, Message, Request};
pub use crate::session::{SessionDriver, SessionSummary};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::BenchConfig;
    pub use crate::core::{ApiToken, Leg, SessionState};
    pub use crate::latency::{LatencyAggregator, LatencySnapshot, SessionRecorder};
    pub use crate::orchestrator::{ClientPool, RunSummary, StopHandle};
    pub use crate::perf::{pin_to_core, set_realtime_priority};
    pub use crate::protocol::{Codec, Message, Request};
    pub use crate::report::{HistogramLogReader, HistogramLogWriter, IntervalReport};
    pub use crate::{Error, Result};
}
