use std::{collections::HashSet, sync::Arc};

use crate::{
    db::ProviderConfigRepo,
    error::{GatewayError, GatewayResult},
    models::{Capability, ProviderRecord},
};

/// Produces the ordered candidate list for a request.
///
/// Reads the provider store on every call, so configuration changes take
/// effect on the next request. Output depends only on store contents.
#[derive(Clone)]
pub struct CandidateResolver {
    store: Arc<dyn ProviderConfigRepo>,
}

impl CandidateResolver {
    pub fn new(store: Arc<dyn ProviderConfigRepo>) -> Self {
        Self { store }
    }

    /// Candidates for a text-generation request.
    ///
    /// Fails with [`GatewayError::NoProviderConfigured`] when no provider is
    /// enabled, and with [`GatewayError::Store`] when the store is unreadable.
    #[tracing::instrument(skip(self), fields(feature = ?feature))]
    pub async fn resolve(&self, feature: Option<&str>) -> GatewayResult<Vec<ProviderRecord>> {
        let mut enabled = self.store.list_enabled_providers().await?;
        enabled.retain(|p| p.enabled);
        if enabled.is_empty() {
            return Err(GatewayError::NoProviderConfigured);
        }
        sort_by_preference(&mut enabled);

        if let Some(feature) = feature
            && let Some(rule) = self.store.find_rule_for_feature(feature).await?
            && rule.active
        {
            match enabled.iter().position(|p| p.id == rule.provider_id) {
                Some(index) => {
                    let preferred = enabled.remove(index);
                    tracing::debug!(
                        feature,
                        provider_id = %preferred.id,
                        "Routing rule selected preferred provider"
                    );
                    enabled.insert(0, preferred);
                }
                None => tracing::debug!(
                    feature,
                    provider_id = %rule.provider_id,
                    "Routing rule names a disabled or missing provider; using priority order"
                ),
            }
        }

        Ok(dedup_by_id(enabled))
    }

    /// Candidates for an embedding request: enabled providers advertising
    /// embeddings, in priority order.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_embedding(&self) -> GatewayResult<Vec<ProviderRecord>> {
        let mut providers = self
            .store
            .find_providers_supporting(Capability::Embeddings)
            .await?;
        providers.retain(|p| p.enabled && p.capabilities.supports(Capability::Embeddings));
        if providers.is_empty() {
            return Err(GatewayError::NoEmbeddingProviderConfigured);
        }
        sort_by_preference(&mut providers);
        Ok(dedup_by_id(providers))
    }
}

/// Descending priority, then ascending id.
pub fn sort_by_preference(providers: &mut [ProviderRecord]) {
    providers.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
}

fn dedup_by_id(providers: Vec<ProviderRecord>) -> Vec<ProviderRecord> {
    let mut seen = HashSet::new();
    providers
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}
