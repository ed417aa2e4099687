//! In-process store backing all three repository traits.
//!
//! Used when `[database] type = "memory"` and throughout the test suite.
//! Fault switches let tests simulate an unreachable store.
//!
//! Usage records are only ever read through the quota windows, the widest
//! of which is the current UTC day. Records from before the previous UTC
//! day are dropped as newer ones arrive.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{PlanTierRepo, ProviderConfigRepo, UsageRepo},
    },
    models::{Capability, ProviderRecord, RoutingRule, UsageRecord, UsageTotals},
};

#[derive(Default)]
struct Faults {
    provider_reads: AtomicBool,
    usage_reads: AtomicBool,
    usage_writes: AtomicBool,
    plan_reads: AtomicBool,
}

#[derive(Default)]
struct UsageLog {
    records: Vec<UsageRecord>,
    /// Records created before this instant have been pruned.
    horizon: DateTime<Utc>,
}

impl UsageLog {
    fn push(&mut self, record: UsageRecord) {
        let horizon = start_of_previous_utc_day(record.created_at);
        self.records.push(record);
        if horizon > self.horizon {
            self.horizon = horizon;
            self.records.retain(|r| r.created_at >= horizon);
        }
    }
}

fn start_of_previous_utc_day(at: DateTime<Utc>) -> DateTime<Utc> {
    (at - Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(at)
}

#[derive(Default)]
pub struct MemoryStore {
    providers: RwLock<Vec<ProviderRecord>>,
    rules: RwLock<Vec<RoutingRule>>,
    usage: RwLock<UsageLog>,
    plan_tiers: DashMap<String, String>,
    faults: Faults,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a provider by id.
    pub fn upsert_provider(&self, provider: ProviderRecord) {
        let mut providers = self.providers.write();
        match providers.iter_mut().find(|p| p.id == provider.id) {
            Some(existing) => *existing = provider,
            None => providers.push(provider),
        }
    }

    /// Insert a routing rule, deactivating any other active rule for the
    /// same feature.
    pub fn set_rule(&self, rule: RoutingRule) {
        let mut rules = self.rules.write();
        if rule.active {
            for existing in rules.iter_mut().filter(|r| r.feature == rule.feature) {
                existing.active = false;
            }
        }
        rules.push(rule);
    }

    pub fn set_plan_tier(&self, client_id: impl Into<String>, tier: impl Into<String>) {
        self.plan_tiers.insert(client_id.into(), tier.into());
    }

    /// Snapshot of the retained usage records, in insertion order.
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.read().records.clone()
    }

    pub fn fail_provider_reads(&self, fail: bool) {
        self.faults.provider_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_usage_reads(&self, fail: bool) {
        self.faults.usage_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_usage_writes(&self, fail: bool) {
        self.faults.usage_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_plan_reads(&self, fail: bool) {
        self.faults.plan_reads.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> DbResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable(format!("{what} store is offline")));
        }
        Ok(())
    }

    fn matching_usage(&self, client_id: &str, since: DateTime<Utc>) -> Vec<UsageRecord> {
        self.usage
            .read()
            .records
            .iter()
            .filter(|r| r.client_id.as_deref() == Some(client_id) && r.created_at >= since)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProviderConfigRepo for MemoryStore {
    async fn list_enabled_providers(&self) -> DbResult<Vec<ProviderRecord>> {
        Self::check(&self.faults.provider_reads, "provider")?;
        Ok(self
            .providers
            .read()
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect())
    }

    async fn find_rule_for_feature(&self, feature: &str) -> DbResult<Option<RoutingRule>> {
        Self::check(&self.faults.provider_reads, "provider")?;
        Ok(self
            .rules
            .read()
            .iter()
            .find(|r| r.active && r.feature == feature)
            .cloned())
    }

    async fn find_providers_supporting(
        &self,
        capability: Capability,
    ) -> DbResult<Vec<ProviderRecord>> {
        Self::check(&self.faults.provider_reads, "provider")?;
        Ok(self
            .providers
            .read()
            .iter()
            .filter(|p| p.enabled && p.capabilities.supports(capability))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UsageRepo for MemoryStore {
    async fn insert_usage_record(&self, record: &UsageRecord) -> DbResult<()> {
        Self::check(&self.faults.usage_writes, "usage")?;
        self.usage.write().push(record.clone());
        Ok(())
    }

    async fn count_requests_since(&self, client_id: &str, since: DateTime<Utc>) -> DbResult<i64> {
        Self::check(&self.faults.usage_reads, "usage")?;
        Ok(self.matching_usage(client_id, since).len() as i64)
    }

    async fn sum_tokens_and_cost_since(
        &self,
        client_id: &str,
        since: DateTime<Utc>,
    ) -> DbResult<UsageTotals> {
        Self::check(&self.faults.usage_reads, "usage")?;
        Ok(self
            .matching_usage(client_id, since)
            .iter()
            .fold(UsageTotals::default(), |acc, r| UsageTotals {
                requests: acc.requests + 1,
                tokens: acc.tokens + r.total_tokens,
                cost_cents: acc.cost_cents + r.cost_cents,
            }))
    }
}

#[async_trait]
impl PlanTierRepo for MemoryStore {
    async fn get_plan_tier(&self, client_id: &str) -> DbResult<Option<String>> {
        Self::check(&self.faults.plan_reads, "plan")?;
        Ok(self.plan_tiers.get(client_id).map(|t| t.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::models::VendorKind;

    fn usage(client: &str, tokens: i64, cost: i64, at: DateTime<Utc>) -> UsageRecord {
        UsageRecord {
            id: Uuid::new_v4(),
            client_id: Some(client.to_string()),
            user_id: None,
            endpoint: "generate".into(),
            provider_id: "p".into(),
            vendor: VendorKind::OpenAi,
            model: "gpt-4o".into(),
            prompt_tokens: tokens,
            completion_tokens: 0,
            total_tokens: tokens,
            cost_cents: cost,
            latency_ms: 1,
            success: true,
            error_message: None,
            streamed: false,
            created_at: at,
        }
    }

    #[tokio::test]
    async fn test_disabled_providers_are_hidden() {
        let store = MemoryStore::new();
        store.upsert_provider(ProviderRecord::new("a", VendorKind::OpenAi, "gpt-4o"));
        store.upsert_provider(ProviderRecord::new("b", VendorKind::Anthropic, "claude").disabled());

        let enabled = store.list_enabled_providers().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "a");
    }

    #[tokio::test]
    async fn test_set_rule_keeps_single_active_rule() {
        let store = MemoryStore::new();
        store.set_rule(RoutingRule::new("summary", "a"));
        store.set_rule(RoutingRule::new("summary", "b"));

        let rule = store.find_rule_for_feature("summary").await.unwrap().unwrap();
        assert_eq!(rule.provider_id, "b");
    }

    #[tokio::test]
    async fn test_usage_windows_filter_by_client_and_time() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert_usage_record(&usage("acme", 100, 2, now)).await.unwrap();
        store
            .insert_usage_record(&usage("acme", 50, 1, now - Duration::hours(3)))
            .await
            .unwrap();
        store.insert_usage_record(&usage("other", 999, 9, now)).await.unwrap();

        let since = now - Duration::hours(1);
        assert_eq!(store.count_requests_since("acme", since).await.unwrap(), 1);

        let totals = store
            .sum_tokens_and_cost_since("acme", now - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(totals.tokens, 150);
        assert_eq!(totals.cost_cents, 3);
        assert_eq!(totals.requests, 2);
    }

    #[tokio::test]
    async fn test_records_before_the_previous_day_are_pruned() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let yesterday = now - Duration::days(1);
        store
            .insert_usage_record(&usage("acme", 1, 0, now - Duration::days(3)))
            .await
            .unwrap();
        store.insert_usage_record(&usage("acme", 2, 0, yesterday)).await.unwrap();
        store.insert_usage_record(&usage("acme", 3, 0, now)).await.unwrap();

        let kept: Vec<i64> = store.usage_records().iter().map(|r| r.total_tokens).collect();
        assert_eq!(kept, vec![2, 3]);
        assert_eq!(
            store
                .sum_tokens_and_cost_since("acme", now - Duration::days(1))
                .await
                .unwrap()
                .tokens,
            5
        );
    }

    #[test]
    fn test_start_of_previous_utc_day() {
        use chrono::TimeZone;

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 1).unwrap();
        assert_eq!(
            start_of_previous_utc_day(at),
            Utc.with_ymd_and_hms(2025, 2, 28, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_faults_surface_as_unavailable() {
        let store = MemoryStore::new();
        store.fail_usage_reads(true);
        let err = store.count_requests_since("acme", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DbError::Unavailable(_)));
    }
}
