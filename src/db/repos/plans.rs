use async_trait::async_trait;

use crate::db::error::DbResult;

/// Subscription lookup for quota enforcement.
#[async_trait]
pub trait PlanTierRepo: Send + Sync {
    /// The stored tier string for a client, or `None` if the client has no
    /// subscription record.
    async fn get_plan_tier(&self, client_id: &str) -> DbResult<Option<String>>;
}
