//! In-process transport double
//!
//! Requests go straight to a [`ConformingPeer`]; its replies are queued and
//! handed back by `next_frame` after a fixed service delay. Extra frames can
//! be injected ahead of the reply to a given request kind, and everything the
//! session wrote is recorded for inspection.

use super::peer::ConformingPeer;
use crate::core::SessionError;
use crate::session::{Connector, Inbound, Transport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// What the session did on the wire
#[derive(Debug, Default, Clone)]
pub struct LoopbackLog {
    pub sent: Vec<String>,
    pub connects: usize,
    pub closed: bool,
    /// Sends attempted after `close()`
    pub sent_after_close: usize,
}

impl LoopbackLog {
    /// `type` of every sent frame, in order
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter_map(|text| {
                serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|v| v["type"].as_str().map(str::to_string))
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct LoopbackConnector {
    peer: ConformingPeer,
    delay: Duration,
    injections: Vec<(&'static str, String)>,
    refuse: bool,
    log: Arc<Mutex<LoopbackLog>>,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self {
            peer: ConformingPeer::new(),
            delay: Duration::from_micros(20),
            injections: Vec::new(),
            refuse: false,
            log: Arc::new(Mutex::new(LoopbackLog::default())),
        }
    }

    pub fn with_peer(mut self, peer: ConformingPeer) -> Self {
        self.peer = peer;
        self
    }

    /// Simulated exchange service time per reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Deliver `frame` just before the reply to the first `kind` request
    pub fn inject_before_reply(mut self, kind: &'static str, frame: impl Into<String>) -> Self {
        self.injections.push((kind, frame.into()));
        self
    }

    /// Fail every connect attempt
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    /// Shared log; clones of this connector write to the same one
    pub fn log(&self) -> LoopbackLog {
        self.log.lock().clone()
    }
}

impl Connector for LoopbackConnector {
    type Transport = LoopbackTransport;

    async fn connect(&self) -> Result<LoopbackTransport, SessionError> {
        if self.refuse {
            return Err(SessionError::Connect {
                url: self.endpoint().to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.log.lock().connects += 1;
        Ok(LoopbackTransport {
            peer: self.peer.clone(),
            delay: self.delay,
            injections: self.injections.clone(),
            inbound: VecDeque::new(),
            closed: false,
            log: self.log.clone(),
        })
    }

    fn endpoint(&self) -> &str {
        "loopback"
    }
}

pub struct LoopbackTransport {
    peer: ConformingPeer,
    delay: Duration,
    injections: Vec<(&'static str, String)>,
    inbound: VecDeque<String>,
    closed: bool,
    log: Arc<Mutex<LoopbackLog>>,
}

impl LoopbackTransport {
    fn kind_of(text: &str) -> Option<String> {
        serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| v["type"].as_str().map(str::to_string))
    }
}

impl Transport for LoopbackTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        if self.closed {
            self.log.lock().sent_after_close += 1;
            return Err(SessionError::TransportClosed);
        }
        self.log.lock().sent.push(text.to_string());

        if let Some(kind) = Self::kind_of(text) {
            if let Some(pos) = self.injections.iter().position(|(k, _)| *k == kind) {
                let (_, frame) = self.injections.remove(pos);
                self.inbound.push_back(frame);
            }
        }
        self.inbound.extend(self.peer.respond(text));
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Inbound, SessionError>> {
        if self.closed {
            return None;
        }
        let frame = self.inbound.pop_front()?;
        // Service time; keeps every round trip strictly positive
        std::thread::sleep(self.delay);
        Some(Ok(Inbound::Text(frame)))
    }

    async fn pong(&mut self, _payload: Vec<u8>) -> Result<(), SessionError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        self.log.lock().closed = true;
        Ok(())
    }
}
