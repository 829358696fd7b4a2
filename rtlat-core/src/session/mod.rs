//! One benchmark session
//!
//! - `pending`: in-flight requests keyed by correlation id
//! - `driver`: the I/O-free order/cancel state machine
//! - `transport`: the duplex text transport seam and its WebSocket implementation
//! - `connection`: the async loop tying a driver to a transport

pub mod connection;
pub mod driver;
pub mod pending;
pub mod transport;

pub use connection::{run_session, stop_requested};
pub use driver::{
    AckOutcome, CorrelationMismatch, DriverSettings, SessionDriver, SessionSummary, Step,
};
pub use pending::{PendingRequest, PendingRequests};
pub use transport::{Connector, Inbound, Transport, WsConnector, WsTransport};
