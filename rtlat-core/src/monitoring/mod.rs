//! Monitoring and observability module
//!
//! Prometheus metrics for sessions and reports, plus the HTTP exporter.

pub mod metrics;
pub mod server;

pub use metrics::{MetricsRegistry, ReportMetrics, SessionMetrics};
pub use server::{encode_metrics, spawn_metrics_server, MetricsServer, MetricsServerConfig};
