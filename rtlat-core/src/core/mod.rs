//! Core session types
//!
//! - `types`: Identities, request legs, histogram bounds
//! - `errors`: Error taxonomy for sessions, protocol, persistence
//! - `session_fsm`: Session lifecycle state machine

pub mod errors;
pub mod session_fsm;
pub mod types;

pub use errors::{
    HlogError, PendingError, ProtocolError, RecorderError, SerializationError, SessionError,
};
pub use session_fsm::{SessionEvent, SessionFsm, SessionState};
pub use types::{ApiToken, CorrelationId, Leg, MAX_TRACKABLE_LATENCY_NS, MIN_TRACKABLE_LATENCY_NS};
