use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// `[observability]`: where log output goes and whether metrics are exported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// `[observability.logging]`
///
/// ```toml
/// [observability.logging]
/// level = "debug"
/// format = "json"
/// filter = "provider_gateway::quota=trace"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Source file and line on every event.
    #[serde(default)]
    pub file_line: bool,

    /// Attach the current span (provider, feature, client) to JSON events.
    #[serde(default = "default_true")]
    pub current_span: bool,

    /// Extra `EnvFilter` directives appended to `level`. Ignored when
    /// `RUST_LOG` is set.
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            current_span: true,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// `[observability.metrics]`
///
/// Attempt, fallback, quota and stream counters are exported on a Prometheus
/// scrape endpoint when enabled. Requires the `prometheus` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Buckets for `gateway_provider_attempt_duration_seconds`, in milliseconds.
    #[serde(default = "default_attempt_buckets")]
    pub latency_buckets_ms: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_listen(),
            latency_buckets_ms: default_attempt_buckets(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9464))
}

/// LLM calls run from a few hundred milliseconds to minutes.
fn default_attempt_buckets() -> Vec<f64> {
    vec![
        250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 120_000.0,
    ]
}

fn default_true() -> bool {
    true
}
