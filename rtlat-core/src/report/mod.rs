//! Report output
//!
//! - `hlog`: HdrHistogram interval log writer and reader
//! - `emitter`: JSON summaries plus log records, on a dedicated thread

pub mod emitter;
pub mod hlog;

pub use crate::latency::IntervalReport;
pub use emitter::{log_path_for, spawn_reporter, ReportEmitter, ReportSummary};
pub use hlog::{HistogramLogEntry, HistogramLogReader, HistogramLogWriter, LOG_FORMAT_VERSION};
