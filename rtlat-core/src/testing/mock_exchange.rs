//! Mock exchange over real sockets
//!
//! A WebSocket endpoint answering with [`ConformingPeer`] and an HTTP account
//! service accepting balance seeding, both on ephemeral localhost ports and
//! served from a background thread. Dropping the handle shuts it down.

use super::peer::ConformingPeer;
use crate::config::{BenchConfig, ExchangeConfig, TransportSecurity};
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct ExchangeState {
    seeded: Vec<String>,
    connections: usize,
    frames_received: usize,
}

pub struct MockExchange {
    ws_addr: SocketAddr,
    http_addr: SocketAddr,
    state: Arc<Mutex<ExchangeState>>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockExchange {
    pub fn start() -> Result<Self> {
        Self::start_with(ConformingPeer::new())
    }

    /// Serve every connection with a clone of `peer`
    pub fn start_with(peer: ConformingPeer) -> Result<Self> {
        let ws = std::net::TcpListener::bind("127.0.0.1:0").context("bind websocket listener")?;
        let http = std::net::TcpListener::bind("127.0.0.1:0").context("bind http listener")?;
        ws.set_nonblocking(true)?;
        http.set_nonblocking(true)?;
        let ws_addr = ws.local_addr()?;
        let http_addr = http.local_addr()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build mock exchange runtime")?;
        let state = Arc::new(Mutex::new(ExchangeState::default()));
        let (shutdown, shutdown_rx) = oneshot::channel();

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("mock-exchange".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listeners = (TcpListener::from_std(ws), TcpListener::from_std(http));
                    let (ws, http) = match listeners {
                        (Ok(ws), Ok(http)) => (ws, http),
                        _ => {
                            warn!("mock exchange listeners unusable");
                            return;
                        }
                    };
                    tokio::select! {
                        _ = shutdown_rx => {}
                        _ = serve_websocket(ws, peer, thread_state.clone()) => {}
                        _ = serve_accounts(http, thread_state) => {}
                    }
                })
            })
            .context("spawn mock exchange thread")?;

        Ok(Self {
            ws_addr,
            http_addr,
            state,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub fn websocket_url(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    /// Exchange section pointing at this mock
    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            host: self.ws_addr.ip().to_string(),
            http_port: self.http_addr.port(),
            websocket_port: self.ws_addr.port(),
            security: TransportSecurity::Plain,
            ..ExchangeConfig::default()
        }
    }

    /// Default configuration aimed at this mock
    pub fn bench_config(&self) -> BenchConfig {
        BenchConfig {
            exchange: self.exchange_config(),
            ..BenchConfig::default()
        }
    }

    /// Paths of every seeding request received
    pub fn seeded(&self) -> Vec<String> {
        self.state.lock().seeded.clone()
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn frames_received(&self) -> usize {
        self.state.lock().frames_received
    }
}

impl Drop for MockExchange {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve_websocket(
    listener: TcpListener,
    peer: ConformingPeer,
    state: Arc<Mutex<ExchangeState>>,
) {
    loop {
        let Ok((stream, remote)) = listener.accept().await else {
            continue;
        };
        state.lock().connections += 1;
        let peer = peer.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, state).await {
                debug!(%remote, error = %e, "mock connection ended");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    mut peer: ConformingPeer,
    state: Arc<Mutex<ExchangeState>>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let mut ws = tokio_tungstenite::accept_async(stream).await?;
    while let Some(frame) = ws.next().await {
        match frame? {
            WsMessage::Text(text) => {
                state.lock().frames_received += 1;
                for reply in peer.respond(&text) {
                    ws.send(WsMessage::Text(reply)).await?;
                }
            }
            // Close replies are queued by tungstenite and flushed on the next poll
            _ => {}
        }
    }
    Ok(())
}

async fn serve_accounts(listener: TcpListener, state: Arc<Mutex<ExchangeState>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            continue;
        };
        let state = state.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                let state = state.clone();
                async move {
                    let path = req.uri().path().to_string();
                    let seeding = req.method() == Method::POST
                        && path.starts_with("/private/account/user/balances/");
                    let (status, body) = if seeding {
                        state.lock().seeded.push(path);
                        (StatusCode::OK, "balances sent")
                    } else {
                        (StatusCode::NOT_FOUND, "Not Found")
                    };
                    let mut response = Response::new(Full::new(Bytes::from(body)));
                    *response.status_mut() = status;
                    Ok::<_, hyper::Error>(response)
                }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "mock account connection ended");
            }
        });
    }
}
