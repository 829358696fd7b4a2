//! Duplex text transport
//!
//! [`Transport`] is the only thing the connection loop knows about the wire.
//! [`WsConnector`] chooses plain or TLS WebSocket once, at construction, from
//! [`TransportSecurity`]; everything above it runs the same code path.
//!
//! Sessions run on single-threaded runtimes, so the async trait methods carry
//! no `Send` bound.

use crate::config::{ExchangeConfig, TlsConfig, TransportSecurity};
use crate::core::SessionError;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// One inbound frame, reduced to what a session cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Ping(Vec<u8>),
    /// Peer started or acknowledged the close handshake
    Close,
    /// Binary, pong and raw frames
    Other,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send_text(&mut self, text: &str) -> Result<(), SessionError>;

    /// Next frame, or `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<Result<Inbound, SessionError>>;

    async fn pong(&mut self, payload: Vec<u8>) -> Result<(), SessionError>;

    /// Send our close frame; a transport that is already closed is not an error
    async fn close(&mut self) -> Result<(), SessionError>;
}

#[allow(async_fn_in_trait)]
pub trait Connector {
    type Transport: Transport;

    async fn connect(&self) -> Result<Self::Transport, SessionError>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> &str;
}

// ============================================================================
// WebSocket
// ============================================================================

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dials the exchange WebSocket endpoint
#[derive(Clone)]
pub struct WsConnector {
    url: String,
    tls: Option<native_tls::TlsConnector>,
}

impl WsConnector {
    /// Plain `ws://` connector
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tls: None,
        }
    }

    pub fn from_exchange(exchange: &ExchangeConfig) -> Result<Self, SessionError> {
        let tls = match exchange.security {
            TransportSecurity::Plain => None,
            TransportSecurity::Tls => Some(build_tls(&exchange.tls)?),
        };
        Ok(Self {
            url: exchange.websocket_url(),
            tls,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

fn build_tls(config: &TlsConfig) -> Result<native_tls::TlsConnector, SessionError> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(config.accept_invalid_certs);

    if let Some(path) = &config.identity_path {
        let der = std::fs::read(path).map_err(|e| {
            SessionError::Tls(format!("cannot read identity {}: {}", path.display(), e))
        })?;
        let identity = native_tls::Identity::from_pkcs12(&der, &config.identity_password)
            .map_err(|e| SessionError::Tls(format!("invalid identity {}: {}", path.display(), e)))?;
        builder.identity(identity);
    }

    builder.build().map_err(|e| SessionError::Tls(e.to_string()))
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, SessionError> {
        let connector = self.tls.clone().map(tokio_tungstenite::Connector::NativeTls);
        // Nagle off: every request is a small latency-critical frame
        let (stream, response) = tokio_tungstenite::connect_async_tls_with_config(
            self.url.as_str(),
            None,
            true,
            connector,
        )
        .await
        .map_err(|e| SessionError::Connect {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        info!(url = %self.url, status = %response.status(), "websocket connected");
        Ok(WsTransport { stream })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

pub struct WsTransport {
    stream: WsStream,
}

impl WsTransport {
    pub fn new(stream: WsStream) -> Self {
        Self { stream }
    }
}

fn transport_error(e: tungstenite::Error) -> SessionError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            SessionError::TransportClosed
        }
        other => SessionError::Transport(other.to_string()),
    }
}

impl Transport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        self.stream
            .send(WsMessage::Text(text.to_owned()))
            .await
            .map_err(transport_error)
    }

    async fn next_frame(&mut self) -> Option<Result<Inbound, SessionError>> {
        let frame = self.stream.next().await?;
        Some(frame.map_err(transport_error).map(|message| match message {
            WsMessage::Text(text) => Inbound::Text(text),
            WsMessage::Ping(payload) => Inbound::Ping(payload),
            WsMessage::Close(frame) => {
                debug!(?frame, "close frame received");
                Inbound::Close
            }
            WsMessage::Binary(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => Inbound::Other,
        }))
    }

    async fn pong(&mut self, payload: Vec<u8>) -> Result<(), SessionError> {
        self.stream
            .send(WsMessage::Pong(payload))
            .await
            .map_err(transport_error)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(transport_error(e)),
        }
    }
}
