use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{PlanLimits, PlanTier};

/// Plan-tier quota configuration.
///
/// ```toml
/// [quota]
/// default_tier = "free"
///
/// [quota.plans.pro]
/// requests_per_hour = 500
/// requests_per_day = 5000
/// tokens_per_day = 5000000
/// cost_per_day_cents = 5000
///
/// [quota.clients]
/// acme = "pro"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// When false every check is allowed without touching the stores.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Tier applied to clients with no stored tier, an unrecognised tier,
    /// or when the plan store cannot be read.
    #[serde(default)]
    pub default_tier: PlanTier,

    /// Allow requests when usage cannot be read from the store.
    #[serde(default = "default_true")]
    pub fail_open: bool,

    /// Replacements for the built-in per-tier limits.
    #[serde(default)]
    pub plans: HashMap<PlanTier, PlanLimits>,

    /// Client tiers seeded into the plan store at start-up.
    #[serde(default)]
    pub clients: HashMap<String, PlanTier>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_tier: PlanTier::default(),
            fail_open: true,
            plans: HashMap::new(),
            clients: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Effective limits for `tier`, honouring overrides.
    pub fn limits_for(&self, tier: PlanTier) -> PlanLimits {
        self.plans
            .get(&tier)
            .copied()
            .unwrap_or_else(|| PlanLimits::for_tier(tier))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (tier, limits) in &self.plans {
            let values = [
                limits.requests_per_hour,
                limits.requests_per_day,
                limits.tokens_per_day,
                limits.cost_per_day_cents,
            ];
            if values.iter().any(|v| *v < 0) {
                return Err(ConfigError::Validation(format!(
                    "quota.plans.{tier}: limits must not be negative"
                )));
            }
            if limits.requests_per_day < limits.requests_per_hour {
                return Err(ConfigError::Validation(format!(
                    "quota.plans.{tier}: requests_per_day ({}) is below requests_per_hour ({})",
                    limits.requests_per_day, limits.requests_per_hour
                )));
            }
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_replaces_builtin_limits() {
        let config: QuotaConfig = toml::from_str(
            r#"
            [plans.pro]
            requests_per_hour = 1
            requests_per_day = 2
            tokens_per_day = 3
            cost_per_day_cents = 4
        "#,
        )
        .unwrap();

        assert_eq!(config.limits_for(PlanTier::Pro).tokens_per_day, 3);
        assert_eq!(
            config.limits_for(PlanTier::Free),
            PlanLimits::for_tier(PlanTier::Free)
        );
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let config: QuotaConfig = toml::from_str(
            r#"
            [plans.free]
            requests_per_hour = 50
            requests_per_day = 10
            tokens_per_day = 1000
            cost_per_day_cents = 10
        "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("requests_per_day (10) is below requests_per_hour (50)"));
    }

    #[test]
    fn test_unknown_tier_key_rejected() {
        let result: Result<QuotaConfig, _> = toml::from_str(
            r#"
            [plans.platinum]
            requests_per_hour = 1
            requests_per_day = 1
            tokens_per_day = 1
            cost_per_day_cents = 1
        "#,
        );
        assert!(result.is_err());
    }
}
