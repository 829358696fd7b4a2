use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub histogram: HistogramConfig,
    #[serde(default)]
    pub affinity: AffinityConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub seeding: SeedingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// How the WebSocket transport talks to the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportSecurity {
    #[default]
    Plain,
    Tls,
}

impl TransportSecurity {
    pub fn ws_scheme(self) -> &'static str {
        match self {
            TransportSecurity::Plain => "ws",
            TransportSecurity::Tls => "wss",
        }
    }

    pub fn http_scheme(self) -> &'static str {
        match self {
            TransportSecurity::Plain => "http",
            TransportSecurity::Tls => "https",
        }
    }
}

/// Exchange endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_host")]
    pub host: String,

    /// Account service port (balance seeding)
    #[serde(default = "default_port")]
    pub http_port: u16,

    #[serde(default = "default_port")]
    pub websocket_port: u16,

    #[serde(default)]
    pub security: TransportSecurity,

    #[serde(default)]
    pub tls: TlsConfig,
}

impl ExchangeConfig {
    pub fn websocket_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.security.ws_scheme(),
            self.host,
            self.websocket_port
        )
    }

    pub fn http_base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.security.http_scheme(),
            self.host,
            self.http_port
        )
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_port(),
            websocket_port: default_port(),
            security: TransportSecurity::default(),
            tls: TlsConfig::default(),
        }
    }
}

/// TLS parameters, used when `security = "tls"`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Trust any server certificate (test exchanges use self-signed certs)
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Optional PKCS#12 client identity
    #[serde(default)]
    pub identity_path: Option<PathBuf>,

    #[serde(default)]
    pub identity_password: String,
}

/// Load shape of the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Token of the first session; session `i` uses `api_token + i`
    #[serde(default = "default_api_token")]
    pub api_token: u32,

    /// Concurrent sessions
    #[serde(default = "default_session_count")]
    pub session_count: usize,

    /// Matched acknowledgements across all sessions
    #[serde(default = "default_target_messages")]
    pub target_messages: u64,

    /// Samples per report across all sessions
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,

    /// Run-wide samples discarded before recording
    #[serde(default = "default_warmup_messages")]
    pub warmup_messages: u64,

    /// Instruments orders rotate across
    #[serde(default = "default_coin_pairs")]
    pub coin_pairs: Vec<String>,

    /// Upper bound on the close handshake
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl LoadConfig {
    /// Per-session share of the target
    pub fn per_session_target(&self) -> u64 {
        (self.target_messages / self.session_count.max(1) as u64).max(1)
    }

    /// Per-session merge cadence
    pub fn merge_every(&self) -> u64 {
        (self.report_interval / self.session_count.max(1) as u64).max(1)
    }

    /// Samples per report: every session's share, summed
    ///
    /// Equals `report_interval` rounded down to a multiple of the session
    /// count (but never below one share per session).
    pub fn report_size(&self) -> u64 {
        self.session_count.max(1) as u64 * self.merge_every()
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            api_token: default_api_token(),
            session_count: default_session_count(),
            target_messages: default_target_messages(),
            report_interval: default_report_interval(),
            warmup_messages: default_warmup_messages(),
            coin_pairs: default_coin_pairs(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Significant decimal digits of precision (1..=5)
    #[serde(default = "default_significant_figures")]
    pub significant_figures: u8,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            significant_figures: default_significant_figures(),
        }
    }
}

/// Thread placement of sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffinityConfig {
    /// Pin each session thread to its own core
    #[serde(default)]
    pub enabled: bool,

    /// First core handed to a session; lower cores are left to the OS
    #[serde(default)]
    pub first_core: usize,

    /// SCHED_FIFO priority for pinned threads (Linux, needs CAP_SYS_NICE)
    #[serde(default)]
    pub realtime_priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Root directory of the interval logs
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Optional `Tag=` written on every interval line
    #[serde(default)]
    pub tag: Option<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            tag: None,
        }
    }
}

/// Account balance seeding before the run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Balance credited per currency
    #[serde(default = "default_seed_amount")]
    pub amount: u64,
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            amount: default_seed_amount(),
        }
    }
}

/// Logging and monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Serve /metrics and /health
    #[serde(default)]
    pub enable_prometheus: bool,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            enable_prometheus: false,
            listen_addr: default_listen_addr(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_api_token() -> u32 {
    3001
}

fn default_session_count() -> usize {
    1
}

fn default_target_messages() -> u64 {
    1_000_000
}

fn default_report_interval() -> u64 {
    100_000
}

fn default_warmup_messages() -> u64 {
    1
}

pub(crate) fn default_coin_pairs() -> Vec<String> {
    ["BTC_USDT", "BTC_CHF", "BTC_EUR", "BTC_USDC"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_close_timeout_ms() -> u64 {
    2_000
}

fn default_significant_figures() -> u8 {
    3
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

fn default_true() -> bool {
    true
}

fn default_seed_amount() -> u64 {
    100_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:9090".to_string()
}
