//! Session driver
//!
//! The order/cancel state machine of one session, free of I/O. The connection
//! loop feeds it lifecycle events and decoded messages, each with the instant
//! it happened, and executes the [`Step`] it returns:
//!
//! ```text
//!   connected        → send AUTHENTICATE
//!   AUTHENTICATED    → send SUBSCRIBE
//!   SUBSCRIPTIONS    → send CREATE_ORDER (first)
//!   BOOKED (match)   → record RTT, send CANCEL_ORDER (same id)
//!   DONE   (match)   → record RTT, send CREATE_ORDER (fresh id)
//!   target reached   → close
//! ```
//!
//! Send timestamps are supplied by the caller through [`SessionDriver::record_sent`]
//! after the write completes, so the measured round trip excludes local
//! encoding and write time.
//!
//! An acknowledgement that matches nothing (unknown id, unparseable id, or a
//! receive time not after the send time) is counted and logged, and the session
//! does *not* send anything in response. If no other request is in flight at
//! that point the session can never advance again; it is flagged as stalled.

use super::pending::{PendingRequest, PendingRequests};
use crate::core::{
    ApiToken, CorrelationId, Leg, ProtocolError, RecorderError, SessionError, SessionEvent,
    SessionFsm, SessionState,
};
use crate::latency::{IntervalReport, LatencyAggregator, MergeOutcome, SessionRecorder};
use crate::monitoring::MetricsRegistry;
use crate::protocol::{Message, Request};
use anyhow::Result;
use crossbeam::channel::Sender;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Static parameters of one session
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub token: ApiToken,
    /// Matched acknowledgements after which the session closes
    pub target_messages: u64,
    /// Matched acknowledgements between merges into the aggregate
    pub merge_every: u64,
    /// Instruments to rotate orders across
    pub instruments: Arc<[Arc<str>]>,
    /// Histogram precision
    pub significant_figures: u8,
}

/// What the connection loop must do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write this request, then call `record_sent`
    Send(Request),
    /// Perform the close handshake, then call `on_closed`
    Close,
    /// Nothing to do
    Idle,
}

/// Why an acknowledgement could not be matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMismatch {
    /// `client_id` is not a UUID, so this session never sent it
    MalformedId,
    /// No pending request on this leg carries the id
    Unknown,
    /// Receive time is not after the send time
    NonPositive,
}

impl CorrelationMismatch {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrelationMismatch::MalformedId => "malformed_id",
            CorrelationMismatch::Unknown => "unknown_id",
            CorrelationMismatch::NonPositive => "non_positive_rtt",
        }
    }
}

/// Result of resolving an acknowledgement against the pending maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Matched {
        id: CorrelationId,
        rtt: Duration,
        instrument: Arc<str>,
    },
    Mismatch(CorrelationMismatch),
}

/// End-of-session report
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub token: ApiToken,
    pub state: SessionState,
    /// Matched acknowledgements
    pub responses: u64,
    /// Round trips recorded over the session's lifetime
    pub recorded: u64,
    pub mismatches: u64,
    pub protocol_errors: u64,
    pub stalled: bool,
    /// Requests still awaiting acknowledgement at close
    pub pending_at_close: usize,
    pub trading_elapsed_ms: Option<u64>,
    pub failure: Option<String>,
}

impl SessionSummary {
    /// Summary for a session that never got to run
    pub fn not_started(token: ApiToken, reason: String) -> Self {
        Self {
            token,
            state: SessionState::Closed,
            responses: 0,
            recorded: 0,
            mismatches: 0,
            protocol_errors: 0,
            stalled: false,
            pending_at_close: 0,
            trading_elapsed_ms: None,
            failure: Some(reason),
        }
    }

    pub fn reached_target(&self, target: u64) -> bool {
        self.responses >= target
    }
}

pub struct SessionDriver {
    settings: DriverSettings,
    fsm: SessionFsm,
    pending: PendingRequests,
    recorder: SessionRecorder,
    aggregator: Arc<LatencyAggregator>,
    reports: Sender<IntervalReport>,
    metrics: Option<MetricsRegistry>,
    rng: StdRng,
    responses: u64,
    since_merge: u64,
    mismatches: u64,
    protocol_errors: u64,
    stalled: bool,
    counted_active: bool,
    failure: Option<String>,
}

impl SessionDriver {
    pub fn new(
        settings: DriverSettings,
        aggregator: Arc<LatencyAggregator>,
        reports: Sender<IntervalReport>,
    ) -> Result<Self> {
        if settings.instruments.is_empty() {
            anyhow::bail!("session {} has no instruments to trade", settings.token);
        }
        if settings.target_messages == 0 {
            anyhow::bail!("session {} has a target of zero messages", settings.token);
        }

        let recorder = SessionRecorder::new(settings.significant_figures)?;
        let capacity = settings.target_messages.min(1024) as usize;

        Ok(Self {
            fsm: SessionFsm::new(settings.token),
            pending: PendingRequests::with_capacity(capacity),
            recorder,
            aggregator,
            reports,
            metrics: None,
            rng: StdRng::from_entropy(),
            responses: 0,
            since_merge: 0,
            mismatches: 0,
            protocol_errors: 0,
            stalled: false,
            counted_active: false,
            failure: None,
            settings: DriverSettings {
                merge_every: settings.merge_every.max(1),
                ..settings
            },
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Deterministic instrument rotation
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn token(&self) -> ApiToken {
        self.settings.token
    }

    pub fn state(&self) -> SessionState {
        self.fsm.state()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    pub fn responses(&self) -> u64 {
        self.responses
    }

    pub fn mismatches(&self) -> u64 {
        self.mismatches
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn begin_connect(&mut self, now: Instant) -> Result<(), ProtocolError> {
        self.fsm.apply(SessionEvent::Connect, now).map(|_| ())
    }

    /// Transport is up: authenticate
    pub fn on_connected(&mut self, now: Instant) -> Step {
        if !self.advance(SessionEvent::Connected, "connected", now) {
            return Step::Idle;
        }
        if let Some(metrics) = &self.metrics {
            metrics.session().sessions_active.inc();
            self.counted_active = true;
        }
        info!(token = %self.settings.token, "connected, authenticating");
        Step::Send(Request::Authenticate(self.settings.token))
    }

    pub fn on_connect_failed(&mut self, err: SessionError, now: Instant) {
        error!(token = %self.settings.token, error = %err, "connection failed");
        self.note_failure(err);
        self.advance(SessionEvent::ConnectFailed, "connect_failed", now);
    }

    /// Connection-level fault while connected; the caller closes the transport
    pub fn fail(&mut self, err: SessionError, now: Instant) {
        error!(token = %self.settings.token, state = %self.state(), error = %err, "session failed");
        self.note_failure(err);
        self.begin_close(now);
    }

    /// Stop trading and move to `Closing`
    ///
    /// Residual samples are merged first. Returns `true` when a close handshake
    /// is still needed (the session was connected).
    pub fn begin_close(&mut self, now: Instant) -> bool {
        let state = self.state();
        if state.can_send() {
            self.flush();
            self.advance(SessionEvent::BeginClose, "begin_close", now);
            true
        } else {
            if matches!(state, SessionState::Disconnected | SessionState::Connecting) {
                self.advance(SessionEvent::BeginClose, "begin_close", now);
            }
            false
        }
    }

    /// Close handshake finished (or timed out)
    pub fn on_closed(&mut self, now: Instant) {
        match self.state() {
            SessionState::Closing => {
                self.advance(SessionEvent::CloseComplete, "close_complete", now);
            }
            SessionState::Closed => {}
            _ => {
                self.flush();
                self.advance(SessionEvent::TransportLost, "transport_lost", now);
            }
        }
        self.release_active();
        info!(
            token = %self.settings.token,
            responses = self.responses,
            mismatches = self.mismatches,
            "session closed"
        );
    }

    /// Peer closed the connection or the stream ended
    pub fn on_transport_lost(&mut self, now: Instant) {
        if self.state().is_terminal() {
            return;
        }
        if self.state() != SessionState::Closing {
            warn!(token = %self.settings.token, state = %self.state(), "transport lost");
        }
        self.on_closed(now);
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// React to an inbound message received at `received_at`
    pub fn on_message(&mut self, message: &Message<'_>, received_at: Instant) -> Step {
        match message {
            Message::Authenticated => {
                if !self.advance(SessionEvent::Authenticated, "AUTHENTICATED", received_at) {
                    return Step::Idle;
                }
                debug!(token = %self.settings.token, "authenticated, subscribing");
                Step::Send(Request::Subscribe)
            }
            Message::Subscriptions => {
                if !self.advance(SessionEvent::Subscribed, "SUBSCRIPTIONS", received_at) {
                    return Step::Idle;
                }
                info!(token = %self.settings.token, "subscribed, starting order loop");
                Step::Send(self.next_order())
            }
            Message::Booked {
                client_id,
                instrument_code,
            } => self.on_ack(Leg::Order, client_id, instrument_code.as_deref(), received_at),
            Message::Done { client_id } => self.on_ack(Leg::Cancel, client_id, None, received_at),
            Message::Error { detail } => {
                if self.state() == SessionState::Authenticating {
                    self.fail(
                        SessionError::AuthenticationRejected {
                            token: self.settings.token,
                            detail: detail.to_string(),
                        },
                        received_at,
                    );
                    return Step::Close;
                }
                warn!(token = %self.settings.token, detail = %detail, "exchange reported an error");
                self.count_protocol_error();
                Step::Idle
            }
            Message::Unknown { kind } => {
                warn!(token = %self.settings.token, kind = %kind, "unhandled message type");
                Step::Idle
            }
            Message::Authenticate { .. }
            | Message::Subscribe
            | Message::CreateOrder { .. }
            | Message::CancelOrder { .. } => {
                self.on_protocol_error(&ProtocolError::UnexpectedMessage {
                    kind: message.kind().to_string(),
                    state: self.state().name(),
                });
                Step::Idle
            }
        }
    }

    /// Inbound frame could not be decoded; it is dropped
    pub fn on_protocol_error(&mut self, err: &ProtocolError) {
        warn!(
            token = %self.settings.token,
            state = %self.state(),
            error = %err,
            "dropping message"
        );
        self.count_protocol_error();
    }

    /// `request` was written to the transport at `sent_at`
    pub fn record_sent(&mut self, request: &Request, sent_at: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .session()
                .requests_sent_total
                .with_label_values(&[request.kind()])
                .inc();
        }

        let (leg, client_id, instrument) = match request {
            Request::CreateOrder {
                client_id,
                instrument,
            } => (Leg::Order, client_id, instrument),
            Request::CancelOrder {
                client_id,
                instrument,
            } => (Leg::Cancel, client_id, instrument),
            Request::Authenticate(_) | Request::Subscribe => return,
        };

        let entry = PendingRequest {
            sent_at,
            instrument: instrument.clone(),
        };
        if let Err(err) = self.pending.insert(leg, *client_id, entry) {
            warn!(token = %self.settings.token, error = %err, "request not tracked");
        }
    }

    /// Resolve an acknowledgement against the pending map of `leg`
    ///
    /// A found entry is removed whether or not its round trip is usable.
    pub fn resolve_ack(&mut self, leg: Leg, client_id: &str, received_at: Instant) -> AckOutcome {
        let Ok(id) = CorrelationId::parse_str(client_id) else {
            return AckOutcome::Mismatch(CorrelationMismatch::MalformedId);
        };
        let Some(entry) = self.pending.take(leg, &id) else {
            return AckOutcome::Mismatch(CorrelationMismatch::Unknown);
        };
        match received_at.checked_duration_since(entry.sent_at) {
            Some(rtt) if !rtt.is_zero() => AckOutcome::Matched {
                id,
                rtt,
                instrument: entry.instrument,
            },
            _ => AckOutcome::Mismatch(CorrelationMismatch::NonPositive),
        }
    }

    fn on_ack(
        &mut self,
        leg: Leg,
        client_id: &str,
        booked_instrument: Option<&str>,
        received_at: Instant,
    ) -> Step {
        if self.state() != SessionState::Trading {
            let kind = match leg {
                Leg::Order => "BOOKED",
                Leg::Cancel => "DONE",
            };
            self.on_protocol_error(&ProtocolError::UnexpectedMessage {
                kind: kind.to_string(),
                state: self.state().name(),
            });
            return Step::Idle;
        }

        let (id, rtt, instrument) = match self.resolve_ack(leg, client_id, received_at) {
            AckOutcome::Matched { id, rtt, instrument } => (id, rtt, instrument),
            AckOutcome::Mismatch(reason) => {
                self.on_mismatch(leg, client_id, reason);
                return Step::Idle;
            }
        };

        self.recorder.record(rtt);
        self.responses += 1;
        self.since_merge += 1;
        if let Some(metrics) = &self.metrics {
            metrics
                .session()
                .round_trips_total
                .with_label_values(&[leg.as_str()])
                .inc();
        }
        trace!(
            token = %self.settings.token,
            %leg,
            %id,
            rtt_ns = rtt.as_nanos() as u64,
            "round trip"
        );

        if self.since_merge >= self.settings.merge_every {
            self.merge();
        }

        if self.responses >= self.settings.target_messages {
            info!(
                token = %self.settings.token,
                responses = self.responses,
                "target reached, closing"
            );
            self.begin_close(received_at);
            return Step::Close;
        }

        match leg {
            Leg::Order => {
                let instrument = match booked_instrument {
                    Some(code) if code != &*instrument => Arc::from(code),
                    _ => instrument,
                };
                Step::Send(Request::CancelOrder {
                    client_id: id,
                    instrument,
                })
            }
            Leg::Cancel => Step::Send(self.next_order()),
        }
    }

    fn on_mismatch(&mut self, leg: Leg, client_id: &str, reason: CorrelationMismatch) {
        self.mismatches += 1;
        if let Some(metrics) = &self.metrics {
            metrics
                .session()
                .correlation_mismatches_total
                .with_label_values(&[reason.as_str()])
                .inc();
        }
        warn!(
            token = %self.settings.token,
            %leg,
            client_id,
            reason = reason.as_str(),
            "acknowledgement matches no pending request, not recorded"
        );

        if self.pending.is_empty() && !self.stalled {
            self.stalled = true;
            if let Some(metrics) = &self.metrics {
                metrics.session().sessions_stalled_total.inc();
            }
            warn!(
                token = %self.settings.token,
                responses = self.responses,
                "no request in flight, session stalled"
            );
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn next_order(&mut self) -> Request {
        let index = self.rng.gen_range(0..self.settings.instruments.len());
        Request::CreateOrder {
            client_id: CorrelationId::new_v4(),
            instrument: self.settings.instruments[index].clone(),
        }
    }

    /// Keep residual samples in the aggregate without reporting them
    pub fn flush(&mut self) {
        if self.recorder.interval_count() > 0 {
            self.since_merge = 0;
            let outcome = self.aggregator.merge_residual(&mut self.recorder);
            self.handle_merge(outcome);
        }
    }

    fn merge(&mut self) {
        self.since_merge = 0;
        let outcome = self.aggregator.merge_from(&mut self.recorder);
        self.handle_merge(outcome);
    }

    fn handle_merge(&mut self, outcome: Result<MergeOutcome, RecorderError>) {
        match outcome {
            Ok(MergeOutcome::Report(report)) => {
                if let Err(err) = self.reports.send(*report) {
                    warn!(sequence = err.0.sequence, "reporter is gone, report dropped");
                }
            }
            Ok(MergeOutcome::WarmingUp { discarded, .. }) => {
                if let Some(metrics) = &self.metrics {
                    metrics.report().warmup_samples_total.inc_by(discarded);
                }
            }
            Ok(MergeOutcome::Merged { .. })
            | Ok(MergeOutcome::Residual { .. })
            | Ok(MergeOutcome::Empty) => {}
            Err(err) => {
                error!(
                    token = %self.settings.token,
                    error = %err,
                    "failed to merge session histogram"
                );
            }
        }
    }

    fn advance(&mut self, event: SessionEvent, kind: &str, now: Instant) -> bool {
        match self.fsm.apply(event, now) {
            Ok(_) => true,
            Err(_) => {
                self.on_protocol_error(&ProtocolError::UnexpectedMessage {
                    kind: kind.to_string(),
                    state: self.state().name(),
                });
                false
            }
        }
    }

    fn count_protocol_error(&mut self) {
        self.protocol_errors += 1;
        if let Some(metrics) = &self.metrics {
            metrics.session().protocol_errors_total.inc();
        }
    }

    fn note_failure(&mut self, err: SessionError) {
        if self.failure.is_none() {
            self.failure = Some(err.to_string());
            if let Some(metrics) = &self.metrics {
                metrics.session().sessions_failed_total.inc();
            }
        }
    }

    fn release_active(&mut self) {
        if self.counted_active {
            self.counted_active = false;
            if let Some(metrics) = &self.metrics {
                metrics.session().sessions_active.dec();
            }
        }
    }

    pub fn summary(&self, now: Instant) -> SessionSummary {
        SessionSummary {
            token: self.settings.token,
            state: self.state(),
            responses: self.responses,
            recorded: self.recorder.recorded_total(),
            mismatches: self.mismatches,
            protocol_errors: self.protocol_errors,
            stalled: self.stalled,
            pending_at_close: self.pending.total(),
            trading_elapsed_ms: self
                .fsm
                .trading_elapsed(now)
                .map(|d| d.as_millis() as u64),
            failure: self.failure.clone(),
        }
    }
}
