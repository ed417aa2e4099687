//! Global `tracing` subscriber for the CLI.
//!
//! The library itself only emits events; installing a subscriber is the
//! embedding binary's job.

use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Dependencies that are chatty at `info` and below.
const QUIET_TARGETS: &[&str] = &["hyper", "h2", "reqwest", "rustls", "sqlx"];

/// Install the fmt layer and env filter described by `[observability.logging]`.
///
/// Fails if a global subscriber has already been installed.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let logging = &config.logging;

    tracing_subscriber::registry()
        .with(build_fmt_layer(logging))
        .with(build_env_filter(logging))
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))
}

/// Apply the settings shared by every format, then box.
macro_rules! finish_layer {
    ($layer:expr, $logging:expr) => {{
        let layer = $layer
            .with_file($logging.file_line)
            .with_line_number($logging.file_line);
        if $logging.timestamps {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

fn build_fmt_layer(logging: &LoggingConfig) -> BoxedLayer {
    match logging.format {
        LogFormat::Pretty => finish_layer!(tracing_subscriber::fmt::layer().pretty(), logging),
        LogFormat::Compact => finish_layer!(tracing_subscriber::fmt::layer().compact(), logging),
        LogFormat::Json => finish_layer!(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(logging.current_span),
            logging
        ),
    }
}

/// `RUST_LOG` wins; otherwise the configured level plus any extra directives.
fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let level = config.level.as_filter();
    let fallback = || EnvFilter::new(level);

    if let Ok(directives) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(directives).unwrap_or_else(|_| fallback());
    }

    let mut directives = vec![level.to_string()];
    match &config.filter {
        Some(extra) => directives.push(extra.clone()),
        None => directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn"))),
    }
    EnvFilter::try_new(directives.join(",")).unwrap_or_else(|_| fallback())
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("tracing subscriber already installed or invalid: {0}")]
    Init(String),
}
