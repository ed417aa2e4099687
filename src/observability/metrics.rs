//! Prometheus metrics for the gateway.
//!
//! Provides metrics for:
//! - Provider attempts (outcome, latency, tokens, cost)
//! - Fallback transitions between candidates
//! - Quota decisions
//! - Streaming outcomes

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;

/// Install the Prometheus recorder and its scrape listener.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus exporter listening");
    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// One attempt against one provider.
#[derive(Debug, Clone)]
pub struct ProviderAttemptMetrics<'a> {
    pub provider_id: &'a str,
    /// Vendor kind (e.g., "open_ai", "anthropic")
    pub vendor: &'a str,
    /// "complete", "stream" or "embed"
    pub operation: &'a str,
    pub success: bool,
    pub duration_secs: f64,
    pub total_tokens: i64,
    pub cost_cents: i64,
}

/// Record an attempt against a provider.
pub fn record_provider_attempt(metrics: ProviderAttemptMetrics<'_>) {
    #[cfg(feature = "prometheus")]
    {
        let ProviderAttemptMetrics {
            provider_id,
            vendor,
            operation,
            success,
            duration_secs,
            total_tokens,
            cost_cents,
        } = metrics;
        let status = if success { "success" } else { "error" };

        counter!(
            "gateway_provider_attempts_total",
            "provider" => provider_id.to_string(),
            "vendor" => vendor.to_string(),
            "operation" => operation.to_string(),
            "status" => status
        )
        .increment(1);

        histogram!(
            "gateway_provider_attempt_duration_seconds",
            "provider" => provider_id.to_string(),
            "operation" => operation.to_string()
        )
        .record(duration_secs);

        if total_tokens > 0 {
            counter!("gateway_tokens_total", "provider" => provider_id.to_string())
                .increment(total_tokens.unsigned_abs());
        }
        if cost_cents > 0 {
            counter!("gateway_cost_cents_total", "provider" => provider_id.to_string())
                .increment(cost_cents.unsigned_abs());
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = metrics;
    }
}

/// Record a move from a failed candidate to the next one.
pub fn record_fallback(from_provider: &str, operation: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "gateway_fallbacks_total",
            "from_provider" => from_provider.to_string(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (from_provider, operation);
    }
}

/// Record a quota check result.
///
/// `dimension` is the exceeded limit, if any.
pub fn record_quota_decision(tier: &str, allowed: bool, dimension: Option<&str>) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "gateway_quota_checks_total",
            "tier" => tier.to_string(),
            "result" => if allowed { "allowed" } else { "denied" },
            "dimension" => dimension.unwrap_or("none").to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (tier, allowed, dimension);
    }
}

/// Record how a streaming generation ended.
///
/// `outcome` is one of "completed", "interrupted", "cancelled", "failed".
pub fn record_stream_outcome(provider_id: Option<&str>, outcome: &str, fragments: u64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "gateway_streams_total",
            "provider" => provider_id.unwrap_or("none").to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
        histogram!("gateway_stream_fragments", "outcome" => outcome.to_string())
            .record(fragments as f64);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (provider_id, outcome, fragments);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_harmless() {
        record_provider_attempt(ProviderAttemptMetrics {
            provider_id: "p",
            vendor: "open_ai",
            operation: "complete",
            success: true,
            duration_secs: 0.12,
            total_tokens: 30,
            cost_cents: 1,
        });
        record_fallback("p", "complete");
        record_quota_decision("free", false, Some("requests_per_hour"));
        record_stream_outcome(Some("p"), "completed", 3);
    }
}
