//! Per-attempt usage metering.
//!
//! Every provider attempt, successful or not, becomes exactly one
//! [`UsageRecord`]. Writes are awaited so the next quota check observes
//! them, but a failed write is logged and swallowed: metering problems
//! never change what the caller sees.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::UsageRepo,
    models::{ProviderRecord, RequestMetadata, TokenUsage, UsageRecord},
    observability::metrics::{self, ProviderAttemptMetrics},
    pricing::estimate_cost_cents,
};

/// What happened during one attempt against one provider.
#[derive(Debug, Clone)]
pub struct Attempt<'a> {
    pub provider: &'a ProviderRecord,
    /// Model reported by the vendor, which may be more specific than the
    /// configured one.
    pub model: &'a str,
    pub usage: TokenUsage,
    pub latency: Duration,
    /// `None` on success.
    pub error: Option<String>,
    /// "complete", "stream" or "embed".
    pub operation: &'static str,
}

impl Attempt<'_> {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn UsageRepo>,
}

impl UsageTracker {
    pub fn new(store: Arc<dyn UsageRepo>) -> Self {
        Self { store }
    }

    /// Write the usage record for `attempt`. Never fails.
    pub async fn record(&self, attempt: &Attempt<'_>, metadata: &RequestMetadata, endpoint: &str) {
        let record = build_record(attempt, metadata, endpoint);

        metrics::record_provider_attempt(ProviderAttemptMetrics {
            provider_id: &record.provider_id,
            vendor: record.vendor.as_str(),
            operation: attempt.operation,
            success: record.success,
            duration_secs: attempt.latency.as_secs_f64(),
            total_tokens: record.total_tokens,
            cost_cents: record.cost_cents,
        });

        if let Err(e) = self.store.insert_usage_record(&record).await {
            tracing::error!(
                error = %e,
                provider_id = %record.provider_id,
                client_id = ?record.client_id,
                success = record.success,
                "Failed to write usage record"
            );
        }
    }
}

fn build_record(attempt: &Attempt<'_>, metadata: &RequestMetadata, endpoint: &str) -> UsageRecord {
    let provider = attempt.provider;
    let usage = attempt.usage;

    UsageRecord {
        id: Uuid::new_v4(),
        client_id: metadata.client_id.clone(),
        user_id: metadata.user_id.clone(),
        endpoint: endpoint.to_string(),
        provider_id: provider.id.clone(),
        vendor: provider.vendor,
        model: attempt.model.to_string(),
        prompt_tokens: i64::from(usage.prompt_tokens),
        completion_tokens: i64::from(usage.completion_tokens),
        total_tokens: i64::from(usage.total_tokens),
        cost_cents: estimate_cost_cents(provider.vendor, attempt.model, usage.total_tokens),
        latency_ms: i64::try_from(attempt.latency.as_millis()).unwrap_or(i64::MAX),
        success: attempt.succeeded(),
        error_message: attempt.error.clone(),
        streamed: attempt.operation == "stream",
        created_at: Utc::now(),
    }
}
