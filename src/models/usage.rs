use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VendorKind;

/// One provider attempt, successful or not.
///
/// Written exactly once per attempt and never updated. A request that falls
/// back through three providers produces three rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    /// Endpoint or feature label of the call site.
    pub endpoint: String,
    pub provider_id: String,
    pub vendor: VendorKind,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    /// Estimated cost in whole cents
    pub cost_cents: i64,
    pub latency_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    pub streamed: bool,
    pub created_at: DateTime<Utc>,
}

/// Aggregates read back for quota evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub requests: i64,
    pub tokens: i64,
    pub cost_cents: i64,
}
