use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::{
    db::{error::DbResult, repos::UsageRepo},
    models::{UsageRecord, UsageTotals},
};

pub struct SqliteUsageRepo {
    pool: SqlitePool,
}

impl SqliteUsageRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageRepo for SqliteUsageRepo {
    async fn insert_usage_record(&self, record: &UsageRecord) -> DbResult<()> {
        // Records are immutable; a replayed id is silently skipped
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO usage_records (
                id, client_id, user_id, endpoint, provider_id, vendor, model,
                prompt_tokens, completion_tokens, total_tokens, cost_cents,
                latency_ms, success, error_message, streamed, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.client_id)
        .bind(&record.user_id)
        .bind(&record.endpoint)
        .bind(&record.provider_id)
        .bind(record.vendor.as_str())
        .bind(&record.model)
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.total_tokens)
        .bind(record.cost_cents)
        .bind(record.latency_ms)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.streamed)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn count_requests_since(&self, client_id: &str, since: DateTime<Utc>) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usage_records WHERE client_id = ? AND created_at >= ?",
        )
        .bind(client_id)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn sum_tokens_and_cost_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<UsageTotals> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as requests,
                COALESCE(SUM(total_tokens), 0) as tokens,
                COALESCE(SUM(cost_cents), 0) as cost_cents
            FROM usage_records
            WHERE client_id = ? AND created_at >= ?
            "#,
        )
        .bind(client_id)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageTotals {
            requests: row.get("requests"),
            tokens: row.get("tokens"),
            cost_cents: row.get("cost_cents"),
        })
    }
}
