mod error;
pub mod memory;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use repos::*;

use crate::{
    config::DatabaseConfig,
    models::{ProviderRecord, RoutingRule},
};

/// Declarative records from the config file, loaded into the store at start-up.
#[derive(Debug, Clone, Default)]
pub struct StoreSeed {
    pub providers: Vec<ProviderRecord>,
    pub rules: Vec<RoutingRule>,
    /// `(client_id, tier)` pairs.
    pub plan_tiers: Vec<(String, String)>,
}

/// The three external stores the gateway consumes, as trait objects.
///
/// Repositories are created once at construction and shared.
#[derive(Clone)]
pub struct Stores {
    pub providers: Arc<dyn ProviderConfigRepo>,
    pub usage: Arc<dyn UsageRepo>,
    pub plans: Arc<dyn PlanTierRepo>,
}

impl Stores {
    /// All three stores backed by one [`MemoryStore`].
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            providers: store.clone(),
            usage: store.clone(),
            plans: store,
        }
    }

    pub async fn from_config(config: &DatabaseConfig, seed: &StoreSeed) -> DbResult<Self> {
        match config {
            DatabaseConfig::Memory => {
                let store = Arc::new(MemoryStore::new());
                for provider in &seed.providers {
                    store.upsert_provider(provider.clone());
                }
                for rule in &seed.rules {
                    store.set_rule(rule.clone());
                }
                for (client_id, tier) in &seed.plan_tiers {
                    store.set_plan_tier(client_id.clone(), tier.clone());
                }
                Ok(Self::memory(store))
            }
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlite::connect(cfg).await?;

                let providers = sqlite::SqliteProviderConfigRepo::new(pool.clone());
                if !seed.providers.is_empty() || !seed.rules.is_empty() {
                    providers.sync(&seed.providers, &seed.rules).await?;
                }

                let plans = sqlite::SqlitePlanTierRepo::new(pool.clone());
                for (client_id, tier) in &seed.plan_tiers {
                    plans.set_plan_tier(client_id, tier).await?;
                }

                tracing::info!(
                    path = %cfg.path,
                    providers = seed.providers.len(),
                    rules = seed.rules.len(),
                    "SQLite store ready"
                );

                Ok(Self {
                    providers: Arc::new(providers),
                    usage: Arc::new(sqlite::SqliteUsageRepo::new(pool)),
                    plans: Arc::new(plans),
                })
            }
        }
    }
}
