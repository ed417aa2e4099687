use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::{error::DbResult, repos::PlanTierRepo};

pub struct SqlitePlanTierRepo {
    pool: SqlitePool,
}

impl SqlitePlanTierRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn set_plan_tier(&self, client_id: &str, tier: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO client_plans (client_id, tier, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(client_id) DO UPDATE SET
                tier = excluded.tier,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(client_id)
        .bind(tier)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PlanTierRepo for SqlitePlanTierRepo {
    async fn get_plan_tier(&self, client_id: &str) -> DbResult<Option<String>> {
        let tier: Option<String> =
            sqlx::query_scalar("SELECT tier FROM client_plans WHERE client_id = ?")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::test_pool;

    #[tokio::test]
    async fn test_plan_tier_upsert() {
        let repo = SqlitePlanTierRepo::new(test_pool().await);
        assert_eq!(repo.get_plan_tier("acme").await.unwrap(), None);

        repo.set_plan_tier("acme", "free").await.unwrap();
        repo.set_plan_tier("acme", "pro").await.unwrap();
        assert_eq!(repo.get_plan_tier("acme").await.unwrap().as_deref(), Some("pro"));
    }
}
