use std::fmt;

use serde::{Deserialize, Serialize};

/// Commercial plan a client is subscribed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Pro => "pro",
            PlanTier::Enterprise => "enterprise",
        }
    }

    /// Parses a stored tier string. Unknown strings yield `None` so the
    /// caller can apply its own default.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(PlanTier::Free),
            "pro" => Some(PlanTier::Pro),
            "enterprise" => Some(PlanTier::Enterprise),
            _ => None,
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tier ceilings evaluated by the quota enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanLimits {
    pub requests_per_hour: i64,
    pub requests_per_day: i64,
    pub tokens_per_day: i64,
    pub cost_per_day_cents: i64,
}

impl PlanLimits {
    pub fn for_tier(tier: PlanTier) -> Self {
        match tier {
            PlanTier::Free => Self {
                requests_per_hour: 20,
                requests_per_day: 100,
                tokens_per_day: 100_000,
                cost_per_day_cents: 100,
            },
            PlanTier::Pro => Self {
                requests_per_hour: 200,
                requests_per_day: 2_000,
                tokens_per_day: 2_000_000,
                cost_per_day_cents: 2_000,
            },
            PlanTier::Enterprise => Self {
                requests_per_hour: 2_000,
                requests_per_day: 20_000,
                tokens_per_day: 20_000_000,
                cost_per_day_cents: 20_000,
            },
        }
    }
}
