//! HTTP exporter for benchmark metrics
//!
//! Serves `/metrics` in the Prometheus text format and `/health` for
//! liveness probes. Session threads never touch this server; it runs on its
//! own thread with its own runtime so scraping cannot perturb measurements.

use super::MetricsRegistry;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::thread::JoinHandle;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    pub listen_addr: SocketAddr,
    /// Path to serve metrics (default: "/metrics")
    pub metrics_path: String,
}

impl MetricsServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            metrics_path: "/metrics".to_string(),
        }
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: MetricsRegistry,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, registry: MetricsRegistry) -> Self {
        Self { config, registry }
    }

    /// Accept scrapes until the task is dropped
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .context("Failed to bind metrics server")?;
        self.serve_on(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!(
            "Metrics server listening on http://{}{}",
            listener.local_addr().context("metrics listener has no address")?,
            self.config.metrics_path
        );

        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            let registry = self.registry.clone();
            let metrics_path = self.config.metrics_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let registry = registry.clone();
                    let metrics_path = metrics_path.clone();
                    async move {
                        Ok::<_, hyper::Error>(route(req.uri().path(), &registry, &metrics_path))
                    }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }
}

/// Run the exporter on a dedicated thread
///
/// The thread lives until the process exits.
pub fn spawn_metrics_server(
    config: MetricsServerConfig,
    registry: MetricsRegistry,
) -> Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build metrics runtime")?;

    // Bind up front so an address conflict surfaces to the caller
    let std_listener = std::net::TcpListener::bind(config.listen_addr)
        .with_context(|| format!("Failed to bind metrics server on {}", config.listen_addr))?;
    std_listener
        .set_nonblocking(true)
        .context("Failed to configure metrics listener")?;

    std::thread::Builder::new()
        .name("rtlat-metrics".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let listener = match TcpListener::from_std(std_listener) {
                    Ok(listener) => listener,
                    Err(e) => {
                        error!("Metrics listener unusable: {}", e);
                        return;
                    }
                };
                if let Err(e) = MetricsServer::new(config, registry).serve_on(listener).await {
                    error!("Metrics server stopped: {:#}", e);
                }
            })
        })
        .context("Failed to spawn metrics thread")
}

fn route(path: &str, registry: &MetricsRegistry, metrics_path: &str) -> Response<Full<Bytes>> {
    debug!("Metrics request: {}", path);

    if path == "/health" || path == "/healthz" {
        return respond(StatusCode::OK, "OK".to_string());
    }

    if path == metrics_path {
        return match encode_metrics(registry) {
            Ok(text) => {
                let mut response = respond(StatusCode::OK, text);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                respond(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
            }
        };
    }

    if path == "/" {
        return respond(
            StatusCode::OK,
            format!(
                "rtlat benchmark metrics\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Health check\n",
                metrics_path
            ),
        );
    }

    warn!("Unknown metrics endpoint requested: {}", path);
    respond(StatusCode::NOT_FOUND, "Not Found".to_string())
}

fn respond(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}

/// Encode metrics to Prometheus text format
pub fn encode_metrics(registry: &MetricsRegistry) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        let registry = MetricsRegistry::new().unwrap();
        registry.session().round_trips_total.with_label_values(&["cancel"]).inc();

        let text = encode_metrics(&registry).unwrap();
        assert!(text.contains("rtlat_session_round_trips_total"));
        assert!(text.contains("leg=\"cancel\""));
    }

    #[test]
    fn test_routes() {
        let registry = MetricsRegistry::new().unwrap();
        assert_eq!(route("/health", &registry, "/metrics").status(), StatusCode::OK);
        assert_eq!(route("/metrics", &registry, "/metrics").status(), StatusCode::OK);
        assert_eq!(route("/nope", &registry, "/metrics").status(), StatusCode::NOT_FOUND);
        assert!(route("/metrics", &registry, "/metrics")
            .headers()
            .contains_key(hyper::header::CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_serves_over_http() {
        let registry = MetricsRegistry::new().unwrap();
        registry.report().reports_total.inc();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = MetricsServer::new(MetricsServerConfig::new(addr), registry);
        tokio::spawn(server.serve_on(listener));

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("rtlat_reports_total 1"));
    }
}
