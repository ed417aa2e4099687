use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{Capability, ProviderRecord, RoutingRule},
};

/// Read access to administrator-managed provider configuration and
/// routing rules. The gateway never writes through this trait.
#[async_trait]
pub trait ProviderConfigRepo: Send + Sync {
    /// All providers with the enabled flag set, in no particular order.
    async fn list_enabled_providers(&self) -> DbResult<Vec<ProviderRecord>>;

    /// The active routing rule for `feature`, if one exists.
    async fn find_rule_for_feature(&self, feature: &str) -> DbResult<Option<RoutingRule>>;

    /// Enabled providers whose capability set includes `capability`.
    async fn find_providers_supporting(
        &self,
        capability: Capability,
    ) -> DbResult<Vec<ProviderRecord>>;
}
