//! Error types for the measurement engine
//!
//! Faults are errors; an acknowledgement that fails correlation is not. That
//! case is an ordinary outcome (`session::AckOutcome::Mismatch`).
//!
//! Scope of each error:
//! - [`SessionError`]: fatal to one session, never to the run
//! - [`ProtocolError`]: the offending message is dropped, state is unchanged
//! - [`SerializationError`]: fatal to the single outbound message
//! - [`PendingError`]: a correlation id would be tracked twice
//! - [`RecorderError`], [`HlogError`]: histogram setup and persistence

use super::types::{ApiToken, CorrelationId, Leg};
use thiserror::Error;

/// Connection-level failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// TCP/TLS/WebSocket handshake failed
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    /// TLS connector could not be built (bad identity, unreadable file)
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Server answered AUTHENTICATE with an ERROR
    #[error("authentication rejected for token {token}: {detail}")]
    AuthenticationRejected { token: ApiToken, detail: String },

    /// Read or write on an established transport failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Attempted to use a transport that is already closed
    #[error("transport is closed")]
    TransportClosed,
}

/// Inbound message problems
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload is not JSON or lacks the `type` discriminator
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// Known message type without a field it must carry
    #[error("{kind} message is missing field '{field}'")]
    MissingField { kind: &'static str, field: &'static str },

    /// Message is well-formed but not valid in the current session state
    #[error("unexpected {kind} message in state {state}")]
    UnexpectedMessage { kind: String, state: &'static str },

    /// Lifecycle event not allowed from the current state
    #[error("invalid transition: {event} in state {state}")]
    InvalidTransition { event: &'static str, state: &'static str },
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::Malformed {
            reason: err.to_string(),
        }
    }
}

/// Outbound encoding failures
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode {kind}: {source}")]
    Json {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Variant has no wire representation (e.g. `Unknown`)
    #[error("{0} messages cannot be encoded")]
    Unencodable(&'static str),

    #[error("encoded {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),
}

/// Pending-request bookkeeping violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PendingError {
    #[error("correlation id {id} is already pending as {existing}")]
    AlreadyPending { id: CorrelationId, existing: Leg },
}

/// Histogram construction and merge failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecorderError {
    #[error("cannot create histogram with {sigfig} significant figures: {reason}")]
    Creation { sigfig: u8, reason: String },

    #[error("failed to merge histogram: {0}")]
    Merge(String),
}

/// Interval log read/write failures
#[derive(Debug, Error)]
pub enum HlogError {
    #[error("histogram log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("invalid base64 histogram payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to serialize histogram: {0}")]
    Serialize(String),

    #[error("failed to deserialize histogram: {0}")]
    Deserialize(String),
}
