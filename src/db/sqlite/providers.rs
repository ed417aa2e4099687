use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::ProviderConfigRepo,
    },
    models::{Capability, ProviderCapabilities, ProviderRecord, RoutingRule, VendorKind},
};

const PROVIDER_COLUMNS: &str = "id, vendor, model, base_url, encrypted_credential, enabled, \
                                priority, supports_embeddings, embedding_model";

pub struct SqliteProviderConfigRepo {
    pool: SqlitePool,
}

impl SqliteProviderConfigRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_provider(row: &sqlx::sqlite::SqliteRow) -> DbResult<ProviderRecord> {
        let vendor: String = row.get("vendor");
        let vendor = VendorKind::parse(&vendor)
            .ok_or_else(|| DbError::CorruptRow {
                table: "providers",
                reason: format!("unknown vendor kind '{vendor}'"),
            })?;

        Ok(ProviderRecord {
            id: row.get("id"),
            vendor,
            model: row.get("model"),
            base_url: row.get("base_url"),
            encrypted_credential: row.get("encrypted_credential"),
            enabled: row.get("enabled"),
            priority: row.get("priority"),
            capabilities: ProviderCapabilities {
                supports_embeddings: row.get("supports_embeddings"),
            },
            embedding_model: row.get("embedding_model"),
        })
    }

    /// Upsert declarative providers and rules from the config file.
    ///
    /// A rule replaces any active rule for the same feature. Providers not
    /// mentioned are left untouched.
    pub async fn sync(&self, providers: &[ProviderRecord], rules: &[RoutingRule]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        for provider in providers {
            sqlx::query(
                r#"
                INSERT INTO providers (
                    id, vendor, model, base_url, encrypted_credential, enabled,
                    priority, supports_embeddings, embedding_model
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    vendor = excluded.vendor,
                    model = excluded.model,
                    base_url = excluded.base_url,
                    encrypted_credential = excluded.encrypted_credential,
                    enabled = excluded.enabled,
                    priority = excluded.priority,
                    supports_embeddings = excluded.supports_embeddings,
                    embedding_model = excluded.embedding_model,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(&provider.id)
            .bind(provider.vendor.as_str())
            .bind(&provider.model)
            .bind(&provider.base_url)
            .bind(&provider.encrypted_credential)
            .bind(provider.enabled)
            .bind(provider.priority)
            .bind(provider.capabilities.supports_embeddings)
            .bind(&provider.embedding_model)
            .execute(&mut *tx)
            .await?;
        }

        for rule in rules {
            if rule.active {
                sqlx::query("UPDATE routing_rules SET active = 0 WHERE feature = ? AND active = 1")
                    .bind(&rule.feature)
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query("INSERT INTO routing_rules (feature, provider_id, active) VALUES (?, ?, ?)")
                .bind(&rule.feature)
                .bind(&rule.provider_id)
                .bind(rule.active)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ProviderConfigRepo for SqliteProviderConfigRepo {
    async fn list_enabled_providers(&self) -> DbResult<Vec<ProviderRecord>> {
        let query = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE enabled = 1");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_provider).collect()
    }

    async fn find_rule_for_feature(&self, feature: &str) -> DbResult<Option<RoutingRule>> {
        let row = sqlx::query(
            r#"
            SELECT feature, provider_id, active
            FROM routing_rules
            WHERE feature = ? AND active = 1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(feature)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| RoutingRule {
            feature: row.get("feature"),
            provider_id: row.get("provider_id"),
            active: row.get("active"),
        }))
    }

    async fn find_providers_supporting(
        &self,
        capability: Capability,
    ) -> DbResult<Vec<ProviderRecord>> {
        let filter = match capability {
            Capability::Embeddings => "supports_embeddings = 1",
        };
        let query =
            format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE enabled = 1 AND {filter}");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::parse_provider).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::test_pool;

    #[tokio::test]
    async fn test_sync_and_list() {
        let repo = SqliteProviderConfigRepo::new(test_pool().await);
        repo.sync(
            &[
                ProviderRecord::new("openai", VendorKind::OpenAi, "gpt-4o-mini")
                    .with_priority(10)
                    .with_embeddings(None),
                ProviderRecord::new("claude", VendorKind::Anthropic, "claude-3-5-haiku")
                    .with_credential("sk-ant"),
                ProviderRecord::new("gemini", VendorKind::Gemini, "gemini-2.0-flash").disabled(),
            ],
            &[RoutingRule::new("risk_analysis", "claude")],
        )
        .await
        .unwrap();

        let mut enabled = repo.list_enabled_providers().await.unwrap();
        enabled.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(enabled.len(), 2);
        assert_eq!(enabled[0].id, "claude");
        assert_eq!(enabled[0].encrypted_credential.as_deref(), Some("sk-ant"));
        assert_eq!(enabled[1].priority, 10);

        let embedders = repo
            .find_providers_supporting(Capability::Embeddings)
            .await
            .unwrap();
        assert_eq!(embedders.len(), 1);
        assert_eq!(embedders[0].id, "openai");

        let rule = repo.find_rule_for_feature("risk_analysis").await.unwrap();
        assert_eq!(rule.map(|r| r.provider_id).as_deref(), Some("claude"));
    }

    #[tokio::test]
    async fn test_resync_replaces_active_rule() {
        let repo = SqliteProviderConfigRepo::new(test_pool().await);
        repo.sync(&[], &[RoutingRule::new("summary", "a")])
            .await
            .unwrap();
        repo.sync(&[], &[RoutingRule::new("summary", "b")])
            .await
            .unwrap();

        let rule = repo.find_rule_for_feature("summary").await.unwrap().unwrap();
        assert_eq!(rule.provider_id, "b");
        assert!(repo.find_rule_for_feature("missing").await.unwrap().is_none());
    }
}
