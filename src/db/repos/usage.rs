use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{UsageRecord, UsageTotals},
};

/// Append-only usage history.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    async fn insert_usage_record(&self, record: &UsageRecord) -> DbResult<()>;

    /// Number of attempts recorded for `client_id` at or after `since`.
    async fn count_requests_since(&self, client_id: &str, since: DateTime<Utc>) -> DbResult<i64>;

    /// Token and cost sums (plus the row count) for `client_id` at or after `since`.
    async fn sum_tokens_and_cost_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<UsageTotals>;
}
