//! Session State Machine
//!
//! Lifecycle of one benchmark connection, from dial to close.
//!
//! # State Diagram
//!
//! ```text
//!     DISCONNECTED ───begin_close()──────────────────────┐
//!           │                                             │
//!       connect()                                         │
//!           ▼                                             │
//!      CONNECTING ───connect_failed() / begin_close()─────┤
//!           │                                             │
//!      connected()            (send AUTHENTICATE)         │
//!           ▼                                             │
//!    AUTHENTICATING ──┐                                   │
//!           │         │                                   │
//!    authenticated()  │       (send SUBSCRIBE)            │
//!           ▼         │                                   │
//!     SUBSCRIBING ────┼─begin_close()──→ CLOSING          │
//!           │         │                     │             │
//!     subscribed()    │  (send first order) │             │
//!           ▼         │              close_complete()     │
//!       TRADING ──────┘                     │             │
//!                                           ▼             ▼
//!                                         CLOSED ◄────────┘
//! ```
//!
//! `transport_lost()` moves any connected state straight to `CLOSED`.
//!
//! Unlike a typestate machine, the state here is a runtime value: the driver
//! reacts to messages whose arrival order is decided by the peer, so every
//! transition is validated at runtime and rejected transitions leave the state
//! untouched.
//!
//! # Usage
//!
//! ```
//! use rtlat_core::core::{ApiToken, SessionEvent, SessionFsm, SessionState};
//! use std::time::Instant;
//!
//! let mut fsm = SessionFsm::new(ApiToken(3001));
//! fsm.apply(SessionEvent::Connect, Instant::now()).unwrap();
//! fsm.apply(SessionEvent::Connected, Instant::now()).unwrap();
//! assert_eq!(fsm.state(), SessionState::Authenticating);
//!
//! // Out-of-order events are rejected
//! assert!(fsm.apply(SessionEvent::Subscribed, Instant::now()).is_err());
//! assert_eq!(fsm.state(), SessionState::Authenticating);
//! ```

use super::errors::ProtocolError;
use super::types::ApiToken;
use serde::Serialize;
use std::fmt;
use std::time::{Instant, SystemTime};
use tracing::debug;

// ============================================================================
// States and events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Trading,
    Closing,
    Closed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Authenticating => "Authenticating",
            SessionState::Subscribing => "Subscribing",
            SessionState::Trading => "Trading",
            SessionState::Closing => "Closing",
            SessionState::Closed => "Closed",
        }
    }

    /// Connected and still allowed to write requests
    pub fn can_send(self) -> bool {
        matches!(
            self,
            SessionState::Authenticating | SessionState::Subscribing | SessionState::Trading
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connect,
    Connected,
    ConnectFailed,
    Authenticated,
    Subscribed,
    BeginClose,
    CloseComplete,
    TransportLost,
}

impl SessionEvent {
    pub fn name(self) -> &'static str {
        match self {
            SessionEvent::Connect => "connect",
            SessionEvent::Connected => "connected",
            SessionEvent::ConnectFailed => "connect_failed",
            SessionEvent::Authenticated => "authenticated",
            SessionEvent::Subscribed => "subscribed",
            SessionEvent::BeginClose => "begin_close",
            SessionEvent::CloseComplete => "close_complete",
            SessionEvent::TransportLost => "transport_lost",
        }
    }
}

/// Transition table; `None` means the event is invalid in `state`
pub fn next_state(state: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Disconnected, E::Connect) => Some(S::Connecting),
        (S::Connecting, E::Connected) => Some(S::Authenticating),
        (S::Connecting, E::ConnectFailed) => Some(S::Closed),
        (S::Authenticating, E::Authenticated) => Some(S::Subscribing),
        (S::Subscribing, E::Subscribed) => Some(S::Trading),
        (S::Disconnected | S::Connecting, E::BeginClose) => Some(S::Closed),
        (S::Authenticating | S::Subscribing | S::Trading, E::BeginClose) => Some(S::Closing),
        (S::Closing, E::CloseComplete) => Some(S::Closed),
        (S::Authenticating | S::Subscribing | S::Trading | S::Closing, E::TransportLost) => {
            Some(S::Closed)
        }
        _ => None,
    }
}

// ============================================================================
// Session Data (carried across all states)
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionData {
    /// Account token this session authenticates with
    pub token: ApiToken,
    /// Wall-clock creation time
    pub created_at: SystemTime,
    /// When the transport handshake completed
    pub connected_at: Option<Instant>,
    /// When SUBSCRIPTIONS arrived and the first order went out
    pub trading_started_at: Option<Instant>,
    /// When the session reached `Closed`
    pub closed_at: Option<Instant>,
    /// Number of accepted transitions
    pub transitions: u64,
}

impl SessionData {
    pub fn new(token: ApiToken) -> Self {
        Self {
            token,
            created_at: SystemTime::now(),
            connected_at: None,
            trading_started_at: None,
            closed_at: None,
            transitions: 0,
        }
    }
}

// ============================================================================
// Machine
// ============================================================================

#[derive(Debug, Clone)]
pub struct SessionFsm {
    state: SessionState,
    data: SessionData,
}

impl SessionFsm {
    pub fn new(token: ApiToken) -> Self {
        Self {
            state: SessionState::Disconnected,
            data: SessionData::new(token),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Apply `event`, stamping lifecycle timestamps with `now`
    ///
    /// Returns the new state, or `InvalidTransition` with the state unchanged.
    pub fn apply(
        &mut self,
        event: SessionEvent,
        now: Instant,
    ) -> Result<SessionState, ProtocolError> {
        let next = next_state(self.state, event).ok_or(ProtocolError::InvalidTransition {
            event: event.name(),
            state: self.state.name(),
        })?;

        match next {
            SessionState::Authenticating => self.data.connected_at = Some(now),
            SessionState::Trading => self.data.trading_started_at = Some(now),
            SessionState::Closed => self.data.closed_at = Some(now),
            _ => {}
        }

        debug!(
            token = %self.data.token,
            from = self.state.name(),
            to = next.name(),
            "session transition"
        );

        self.state = next;
        self.data.transitions += 1;
        Ok(next)
    }

    /// Time spent in the trading loop so far (or in total, once closed)
    pub fn trading_elapsed(&self, now: Instant) -> Option<std::time::Duration> {
        let started = self.data.trading_started_at?;
        let end = self.data.closed_at.unwrap_or(now);
        Some(end.saturating_duration_since(started))
    }
}
