//! Connection loop
//!
//! Owns the transport and the codec of one session and shuttles frames between
//! them and the [`SessionDriver`]. The receive timestamp is taken as soon as a
//! frame is read, before decoding; the send timestamp right after the write
//! completes.

use super::driver::{SessionDriver, SessionSummary, Step};
use super::transport::{Connector, Inbound, Transport};
use crate::protocol::Codec;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

enum Event {
    Stop,
    Frame(Option<Result<Inbound, crate::core::SessionError>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Resolves once the stop flag is raised or its sender is gone
pub async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Drive one session from connect to close
///
/// Never fails: connection faults end up in the returned summary.
pub async fn run_session<C: Connector>(
    mut driver: SessionDriver,
    connector: &C,
    mut stop: watch::Receiver<bool>,
    close_timeout: Duration,
) -> SessionSummary {
    if *stop.borrow() {
        driver.begin_close(Instant::now());
        return driver.summary(Instant::now());
    }

    if let Err(e) = driver.begin_connect(Instant::now()) {
        warn!(token = %driver.token(), error = %e, "session already started");
        return driver.summary(Instant::now());
    }
    debug!(token = %driver.token(), endpoint = connector.endpoint(), "connecting");

    let connected = tokio::select! {
        biased;
        _ = stop_requested(&mut stop) => None,
        result = connector.connect() => Some(result),
    };

    let mut transport = match connected {
        None => {
            info!(token = %driver.token(), "stopped before connecting");
            driver.begin_close(Instant::now());
            return driver.summary(Instant::now());
        }
        Some(Err(e)) => {
            driver.on_connect_failed(e, Instant::now());
            return driver.summary(Instant::now());
        }
        Some(Ok(transport)) => transport,
    };

    let mut codec = Codec::new();
    let step = driver.on_connected(Instant::now());
    let mut flow = execute(&mut driver, &mut transport, &mut codec, step).await;

    while flow == Flow::Continue {
        let event = tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => Event::Stop,
            frame = transport.next_frame() => Event::Frame(frame),
        };

        flow = match event {
            Event::Stop => {
                info!(token = %driver.token(), responses = driver.responses(), "stop requested");
                if driver.begin_close(Instant::now()) {
                    Flow::Close
                } else {
                    return driver.summary(Instant::now());
                }
            }
            Event::Frame(Some(Ok(Inbound::Text(text)))) => {
                let received_at = Instant::now();
                let step = match Codec::decode(&text) {
                    Ok(message) => driver.on_message(&message, received_at),
                    Err(e) => {
                        driver.on_protocol_error(&e);
                        Step::Idle
                    }
                };
                execute(&mut driver, &mut transport, &mut codec, step).await
            }
            Event::Frame(Some(Ok(Inbound::Ping(payload)))) => match transport.pong(payload).await {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    driver.fail(e, Instant::now());
                    Flow::Close
                }
            },
            Event::Frame(Some(Ok(Inbound::Other))) => Flow::Continue,
            Event::Frame(Some(Ok(Inbound::Close))) => {
                // Flush our half of the handshake the peer started
                if let Err(e) = transport.close().await {
                    debug!(token = %driver.token(), error = %e, "close reply not sent");
                }
                driver.on_transport_lost(Instant::now());
                return driver.summary(Instant::now());
            }
            Event::Frame(None) => {
                driver.on_transport_lost(Instant::now());
                return driver.summary(Instant::now());
            }
            Event::Frame(Some(Err(e))) => {
                driver.fail(e, Instant::now());
                driver.on_transport_lost(Instant::now());
                return driver.summary(Instant::now());
            }
        };
    }

    close_handshake(&mut driver, &mut transport, close_timeout).await;
    driver.summary(Instant::now())
}

async fn execute<T: Transport>(
    driver: &mut SessionDriver,
    transport: &mut T,
    codec: &mut Codec,
    step: Step,
) -> Flow {
    match step {
        Step::Idle => Flow::Continue,
        Step::Close => Flow::Close,
        Step::Send(request) => {
            // Never write on a transport that is closing
            if !driver.state().can_send() {
                debug!(
                    token = %driver.token(),
                    kind = request.kind(),
                    state = %driver.state(),
                    "send suppressed"
                );
                return Flow::Continue;
            }
            let text = match codec.encode_request(&request) {
                Ok(text) => text,
                Err(e) => {
                    warn!(token = %driver.token(), error = %e, "request dropped");
                    return Flow::Continue;
                }
            };
            match transport.send_text(text).await {
                Ok(()) => {
                    driver.record_sent(&request, Instant::now());
                    Flow::Continue
                }
                Err(e) => {
                    driver.fail(e, Instant::now());
                    Flow::Close
                }
            }
        }
    }
}

/// Send our close frame and wait (bounded) for the peer's
async fn close_handshake<T: Transport>(
    driver: &mut SessionDriver,
    transport: &mut T,
    close_timeout: Duration,
) {
    if let Err(e) = transport.close().await {
        debug!(token = %driver.token(), error = %e, "close frame not sent");
    }

    let drained = tokio::time::timeout(close_timeout, async {
        while let Some(frame) = transport.next_frame().await {
            if matches!(frame, Ok(Inbound::Close) | Err(_)) {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            token = %driver.token(),
            timeout_ms = close_timeout.as_millis() as u64,
            "close handshake timed out"
        );
    }
    driver.on_closed(Instant::now());
}
