//! Plan-tier quota enforcement.
//!
//! A check resolves the client's tier, reads usage history once for two
//! windows (the trailing 60 minutes and the current UTC calendar day) and
//! compares it against the tier's [`PlanLimits`] in a fixed order:
//! hourly requests, daily requests, daily tokens, daily cost. The first
//! exceeded limit wins.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::QuotaConfig,
    db::{DbError, PlanTierRepo, UsageRepo},
    models::{PlanLimits, PlanTier},
    observability::metrics,
};

/// The limit a denied request ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    RequestsPerHour,
    RequestsPerDay,
    TokensPerDay,
    CostPerDay,
}

impl QuotaDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaDimension::RequestsPerHour => "requests_per_hour",
            QuotaDimension::RequestsPerDay => "requests_per_day",
            QuotaDimension::TokensPerDay => "tokens_per_day",
            QuotaDimension::CostPerDay => "cost_per_day_cents",
        }
    }

    fn reason(&self, limit: i64, observed: i64) -> String {
        match self {
            QuotaDimension::RequestsPerHour => {
                format!("Hourly request limit reached ({observed}/{limit} requests in the last hour)")
            }
            QuotaDimension::RequestsPerDay => {
                format!("Daily request limit reached ({observed}/{limit} requests today)")
            }
            QuotaDimension::TokensPerDay => {
                format!("Daily token budget exhausted ({observed}/{limit} tokens today)")
            }
            QuotaDimension::CostPerDay => {
                format!("Daily cost cap reached ({observed}/{limit} cents today)")
            }
        }
    }
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage observed for a client at check time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub requests_last_hour: i64,
    pub requests_today: i64,
    pub tokens_today: i64,
    pub cost_today_cents: i64,
}

impl QuotaUsage {
    fn value(&self, dimension: QuotaDimension) -> i64 {
        match dimension {
            QuotaDimension::RequestsPerHour => self.requests_last_hour,
            QuotaDimension::RequestsPerDay => self.requests_today,
            QuotaDimension::TokensPerDay => self.tokens_today,
            QuotaDimension::CostPerDay => self.cost_today_cents,
        }
    }
}

fn limit_value(limits: &PlanLimits, dimension: QuotaDimension) -> i64 {
    match dimension {
        QuotaDimension::RequestsPerHour => limits.requests_per_hour,
        QuotaDimension::RequestsPerDay => limits.requests_per_day,
        QuotaDimension::TokensPerDay => limits.tokens_per_day,
        QuotaDimension::CostPerDay => limits.cost_per_day_cents,
    }
}

const CHECK_ORDER: [QuotaDimension; 4] = [
    QuotaDimension::RequestsPerHour,
    QuotaDimension::RequestsPerDay,
    QuotaDimension::TokensPerDay,
    QuotaDimension::CostPerDay,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatus {
    pub allowed: bool,
    /// Human-readable denial reason; `None` when allowed.
    pub reason: Option<String>,
    pub exceeded: Option<QuotaDimension>,
    pub usage: QuotaUsage,
    pub limits: PlanLimits,
    pub tier: PlanTier,
}

impl QuotaStatus {
    fn allowed(tier: PlanTier, limits: PlanLimits, usage: QuotaUsage) -> Self {
        Self {
            allowed: true,
            reason: None,
            exceeded: None,
            usage,
            limits,
            tier,
        }
    }

    /// The typed error for a denied status.
    pub fn into_error(self) -> Option<QuotaExceededError> {
        let dimension = self.exceeded?;
        Some(QuotaExceededError {
            dimension,
            limit: limit_value(&self.limits, dimension),
            observed: self.usage.value(dimension),
            tier: self.tier,
            reason: self.reason.unwrap_or_else(|| dimension.to_string()),
        })
    }
}

/// A request refused before any provider was contacted.
#[derive(Debug, Clone, Error)]
#[error("quota exceeded: {reason}")]
pub struct QuotaExceededError {
    pub dimension: QuotaDimension,
    pub limit: i64,
    pub observed: i64,
    pub tier: PlanTier,
    pub reason: String,
}

#[derive(Clone)]
pub struct QuotaEnforcer {
    usage: Arc<dyn UsageRepo>,
    plans: Arc<dyn PlanTierRepo>,
    config: QuotaConfig,
}

impl QuotaEnforcer {
    pub fn new(usage: Arc<dyn UsageRepo>, plans: Arc<dyn PlanTierRepo>, config: QuotaConfig) -> Self {
        Self {
            usage,
            plans,
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn check(&self, client_id: &str, endpoint: &str) -> Result<QuotaStatus, DbError> {
        self.check_at(client_id, endpoint, Utc::now()).await
    }

    /// Evaluate the client's quota as of `now`.
    ///
    /// Errors only when the usage store is unreachable and `fail_open` is
    /// off.
    #[tracing::instrument(skip(self, now), fields(tier))]
    pub async fn check_at(
        &self,
        client_id: &str,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<QuotaStatus, DbError> {
        let tier = self.resolve_tier(client_id).await;
        tracing::Span::current().record("tier", tier.as_str());
        let limits = self.config.limits_for(tier);

        if !self.config.enabled {
            return Ok(QuotaStatus::allowed(tier, limits, QuotaUsage::default()));
        }

        let usage = match self.read_usage(client_id, now).await {
            Ok(usage) => usage,
            Err(e) if self.config.fail_open => {
                tracing::warn!(
                    error = %e,
                    client_id,
                    "Usage store unreachable; allowing request without quota check"
                );
                metrics::record_quota_decision(self.config.default_tier.as_str(), true, None);
                return Ok(QuotaStatus::allowed(
                    self.config.default_tier,
                    self.config.limits_for(self.config.default_tier),
                    QuotaUsage::default(),
                ));
            }
            Err(e) => return Err(e),
        };

        let exceeded = CHECK_ORDER
            .into_iter()
            .find(|d| usage.value(*d) >= limit_value(&limits, *d));

        let status = match exceeded {
            None => QuotaStatus::allowed(tier, limits, usage),
            Some(dimension) => {
                let limit = limit_value(&limits, dimension);
                let observed = usage.value(dimension);
                tracing::info!(
                    client_id,
                    endpoint,
                    dimension = %dimension,
                    limit,
                    observed,
                    "Quota exceeded"
                );
                QuotaStatus {
                    allowed: false,
                    reason: Some(dimension.reason(limit, observed)),
                    exceeded: Some(dimension),
                    usage,
                    limits,
                    tier,
                }
            }
        };

        metrics::record_quota_decision(
            tier.as_str(),
            status.allowed,
            status.exceeded.as_ref().map(QuotaDimension::as_str),
        );
        Ok(status)
    }

    /// Stored tier, or the configured default when the client has none,
    /// it is unrecognised, or the plan store cannot be read.
    async fn resolve_tier(&self, client_id: &str) -> PlanTier {
        match self.plans.get_plan_tier(client_id).await {
            Ok(Some(stored)) => PlanTier::parse(&stored).unwrap_or_else(|| {
                tracing::warn!(client_id, tier = %stored, "Unknown plan tier; using default");
                self.config.default_tier
            }),
            Ok(None) => self.config.default_tier,
            Err(e) => {
                tracing::warn!(error = %e, client_id, "Plan tier lookup failed; using default");
                self.config.default_tier
            }
        }
    }

    async fn read_usage(&self, client_id: &str, now: DateTime<Utc>) -> Result<QuotaUsage, DbError> {
        let hour_ago = now - Duration::hours(1);
        let day_start = start_of_utc_day(now);

        let requests_last_hour = self.usage.count_requests_since(client_id, hour_ago).await?;
        let today = self
            .usage
            .sum_tokens_and_cost_since(client_id, day_start)
            .await?;

        Ok(QuotaUsage {
            requests_last_hour,
            requests_today: today.requests,
            tokens_today: today.tokens,
            cost_today_cents: today.cost_cents,
        })
    }
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}
