use std::sync::Arc;

use crate::{
    config::GatewayConfig,
    db::Stores,
    error::{GatewayError, GatewayResult, SetupError},
    models::{CompletionRequest, CompletionResponse, ProviderRecord, RequestMetadata},
    providers::{AdapterFactory, AdapterSettings, HttpAdapterFactory, build_http_client},
    quota::{QuotaEnforcer, QuotaStatus},
    routing::CandidateResolver,
    services::{GenerationExecutor, GenerationStream},
    usage_tracker::UsageTracker,
};

/// Entry point for application code.
///
/// Every generation call runs quota, then candidate resolution, then the
/// executor. Quota is evaluated once per call, before any provider is
/// contacted, and only for calls that carry a client id.
#[derive(Clone)]
pub struct Gateway {
    resolver: CandidateResolver,
    quota: QuotaEnforcer,
    executor: GenerationExecutor,
}

impl Gateway {
    pub fn new(stores: Stores, factory: Arc<dyn AdapterFactory>, config: &GatewayConfig) -> Self {
        let tracker = UsageTracker::new(stores.usage.clone());
        Self {
            resolver: CandidateResolver::new(stores.providers),
            quota: QuotaEnforcer::new(stores.usage, stores.plans, config.quota.clone()),
            executor: GenerationExecutor::new(
                factory,
                tracker,
                config.generation.clone(),
                config.streaming.channel_capacity,
            ),
        }
    }

    /// Open the configured stores, seed them from the config file and wire
    /// real HTTP adapters.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, SetupError> {
        let stores = Stores::from_config(&config.database, &config.seed()).await?;
        let client = build_http_client(&config.http)?;
        let factory = HttpAdapterFactory::new(
            client,
            config.secrets.build(),
            AdapterSettings::from_config(&config.http, &config.streaming),
        );
        Ok(Self::new(stores, Arc::new(factory), config))
    }

    /// Single-shot generation.
    #[tracing::instrument(
        skip(self, request, metadata),
        fields(feature = ?request.feature, client_id = ?metadata.client_id)
    )]
    pub async fn generate(
        &self,
        request: &CompletionRequest,
        metadata: &RequestMetadata,
    ) -> GatewayResult<CompletionResponse> {
        let endpoint = self.executor.endpoint_label(request, metadata);
        self.enforce_quota(metadata, &endpoint).await?;
        let candidates = self.resolver.resolve(request.feature.as_deref()).await?;
        self.executor.run(&candidates, request, metadata).await
    }

    /// Streaming generation.
    ///
    /// Quota and resolution failures are returned here, before any fragment.
    /// Provider failures arrive as the stream's final item.
    #[tracing::instrument(
        skip(self, request, metadata),
        fields(feature = ?request.feature, client_id = ?metadata.client_id)
    )]
    pub async fn generate_streaming(
        &self,
        request: CompletionRequest,
        metadata: RequestMetadata,
    ) -> GatewayResult<GenerationStream> {
        let endpoint = self.executor.endpoint_label(&request, &metadata);
        self.enforce_quota(&metadata, &endpoint).await?;
        let candidates = self.resolver.resolve(request.feature.as_deref()).await?;
        Ok(self.executor.run_streaming(candidates, request, metadata))
    }

    /// Embed `text` with the first embedding-capable provider that answers.
    /// Embeddings are metered under the "embed" endpoint but not
    /// quota-checked. Their records still count toward the client's request
    /// and budget windows for later generation calls.
    #[tracing::instrument(skip(self, text, metadata), fields(chars = text.len()))]
    pub async fn embed(&self, text: &str, metadata: &RequestMetadata) -> GatewayResult<Vec<f32>> {
        let candidates = self.resolver.resolve_embedding().await?;
        self.executor.run_embedding(&candidates, text, metadata).await
    }

    /// Current quota position of a client.
    pub async fn quota_status(&self, client_id: &str, endpoint: &str) -> GatewayResult<QuotaStatus> {
        Ok(self.quota.check(client_id, endpoint).await?)
    }

    /// Candidate order a request for `feature` would use right now.
    pub async fn candidates(&self, feature: Option<&str>) -> GatewayResult<Vec<ProviderRecord>> {
        self.resolver.resolve(feature).await
    }

    async fn enforce_quota(&self, metadata: &RequestMetadata, endpoint: &str) -> GatewayResult<()> {
        let Some(client_id) = metadata.client_id.as_deref() else {
            return Ok(());
        };
        if !self.quota.is_enabled() {
            return Ok(());
        }

        let status = self.quota.check(client_id, endpoint).await?;
        match status.into_error() {
            Some(exceeded) => Err(GatewayError::QuotaExceeded(exceeded)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures_util::StreamExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        db::{MemoryStore, UsageRepo},
        models::{PlanLimits, PlanTier, RoutingRule, UsageRecord, VendorKind},
        providers::test::{TestAdapterFactory, TestFailureMode, TestProvider},
        quota::QuotaDimension,
    };

    fn config_with_hourly_limit(requests_per_hour: i64) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.quota.plans.insert(
            PlanTier::Free,
            PlanLimits {
                requests_per_hour,
                ..PlanLimits::for_tier(PlanTier::Free)
            },
        );
        config
    }

    fn store_with(providers: &[(&str, i32)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (id, priority) in providers {
            store.upsert_provider(
                ProviderRecord::new(*id, VendorKind::OpenAi, "gpt-4o-mini").with_priority(*priority),
            );
        }
        store
    }

    fn gateway(store: &Arc<MemoryStore>, factory: TestAdapterFactory, config: &GatewayConfig) -> Gateway {
        Gateway::new(Stores::memory(store.clone()), Arc::new(factory), config)
    }

    async fn seed_usage(store: &MemoryStore, client_id: &str, count: usize) {
        for _ in 0..count {
            store
                .insert_usage_record(&UsageRecord {
                    id: Uuid::new_v4(),
                    client_id: Some(client_id.into()),
                    user_id: None,
                    endpoint: "generate".into(),
                    provider_id: "primary".into(),
                    vendor: VendorKind::OpenAi,
                    model: "gpt-4o-mini".into(),
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                    cost_cents: 0,
                    latency_ms: 1,
                    success: true,
                    error_message: None,
                    streamed: false,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_generate_uses_highest_priority_provider() {
        let store = store_with(&[("primary", 10), ("backup", 1)]);
        let factory = TestAdapterFactory::new();
        let gateway = gateway(&store, factory, &GatewayConfig::default());

        let response = gateway
            .generate(&CompletionRequest::new("hi"), &RequestMetadata::for_client("acme"))
            .await
            .unwrap();

        assert_eq!(response.provider_id, "primary");
        let records = store.usage_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_routing_rule_overrides_priority() {
        let store = store_with(&[("primary", 10), ("special", 1)]);
        store.set_rule(RoutingRule::new("summarize", "special"));
        let gateway = gateway(&store, TestAdapterFactory::new(), &GatewayConfig::default());

        let response = gateway
            .generate(
                &CompletionRequest::new("hi").with_feature("summarize"),
                &RequestMetadata::default(),
            )
            .await
            .unwrap();
        assert_eq!(response.provider_id, "special");
    }

    #[tokio::test]
    async fn test_quota_denial_touches_no_provider() {
        let store = store_with(&[("primary", 10)]);
        seed_usage(&store, "acme", 10).await;
        let factory = TestAdapterFactory::new();
        let gateway = Gateway::new(
            Stores::memory(store.clone()),
            Arc::new(factory),
            &config_with_hourly_limit(10),
        );

        let err = gateway
            .generate(&CompletionRequest::new("hi"), &RequestMetadata::for_client("acme"))
            .await
            .unwrap_err();

        match err {
            GatewayError::QuotaExceeded(exceeded) => {
                assert_eq!(exceeded.dimension, QuotaDimension::RequestsPerHour);
                assert_eq!(exceeded.limit, 10);
                assert!(exceeded.reason.contains("Hourly request limit"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.usage_records().len(), 10);
    }

    #[tokio::test]
    async fn test_anonymous_requests_skip_quota() {
        let store = store_with(&[("primary", 10)]);
        store.fail_usage_reads(true);
        let mut config = config_with_hourly_limit(0);
        config.quota.fail_open = false;
        let gateway = gateway(&store, TestAdapterFactory::new(), &config);

        assert!(
            gateway
                .generate(&CompletionRequest::new("hi"), &RequestMetadata::default())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_quota_counts_each_attempt() {
        let store = store_with(&[("primary", 10), ("backup", 1)]);
        let factory = TestAdapterFactory::new().with(
            "primary",
            TestProvider::new("gpt-4o-mini").with_failure_mode(TestFailureMode::HttpError {
                status_code: 503,
                message: None,
            }),
        );
        let gateway = gateway(&store, factory, &config_with_hourly_limit(2));
        let metadata = RequestMetadata::for_client("acme");

        gateway
            .generate(&CompletionRequest::new("hi"), &metadata)
            .await
            .unwrap();
        let err = gateway
            .generate(&CompletionRequest::new("hi"), &metadata)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn test_no_provider_configured() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(&store, TestAdapterFactory::new(), &GatewayConfig::default());

        let err = gateway
            .generate(&CompletionRequest::new("hi"), &RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoProviderConfigured));

        let err = gateway
            .generate_streaming(CompletionRequest::new("hi"), RequestMetadata::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::NoProviderConfigured));
    }

    #[tokio::test]
    async fn test_streaming_quota_denied_before_stream() {
        let store = store_with(&[("primary", 10)]);
        seed_usage(&store, "acme", 3).await;
        let gateway = gateway(&store, TestAdapterFactory::new(), &config_with_hourly_limit(3));

        let result = gateway
            .generate_streaming(CompletionRequest::new("hi"), RequestMetadata::for_client("acme"))
            .await;
        assert!(matches!(result, Err(GatewayError::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn test_streaming_happy_path() {
        let store = store_with(&[("primary", 10)]);
        let factory = TestAdapterFactory::new()
            .with("primary", TestProvider::new("gpt-4o-mini").with_response("a b c"));
        let gateway = gateway(&store, factory, &GatewayConfig::default());

        let stream = gateway
            .generate_streaming(CompletionRequest::new("hi"), RequestMetadata::for_client("acme"))
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "a b c");
    }

    #[tokio::test]
    async fn test_embed_without_capable_provider() {
        let store = store_with(&[("primary", 10)]);
        let gateway = gateway(&store, TestAdapterFactory::new(), &GatewayConfig::default());

        let err = gateway
            .embed("hello", &RequestMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NoEmbeddingProviderConfigured));
    }

    #[tokio::test]
    async fn test_embeddings_are_never_blocked_but_count_toward_request_limits() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_provider(
            ProviderRecord::new("emb", VendorKind::OpenAi, "gpt-4o-mini").with_embeddings(None),
        );
        let factory = TestAdapterFactory::new()
            .with("emb", TestProvider::new("gpt-4o-mini").with_embedding(vec![0.5]));
        let gateway = gateway(&store, factory, &config_with_hourly_limit(2));
        let metadata = RequestMetadata::for_client("acme");

        for _ in 0..3 {
            assert_eq!(gateway.embed("hello", &metadata).await.unwrap(), vec![0.5]);
        }
        assert!(store.usage_records().iter().all(|r| r.endpoint == "embed"));

        let err = gateway
            .generate(&CompletionRequest::new("hi"), &metadata)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::QuotaExceeded(ref exceeded)
                if exceeded.dimension == QuotaDimension::RequestsPerHour
        ));
    }

    #[tokio::test]
    async fn test_quota_status_reports_usage() {
        let store = store_with(&[("primary", 10)]);
        store.set_plan_tier("acme", "pro");
        seed_usage(&store, "acme", 2).await;
        let gateway = gateway(&store, TestAdapterFactory::new(), &GatewayConfig::default());

        let status = gateway.quota_status("acme", "generate").await.unwrap();
        assert!(status.allowed);
        assert_eq!(status.tier, PlanTier::Pro);
        assert_eq!(status.usage.requests_last_hour, 2);
        assert_eq!(status.usage.tokens_today, 4);
    }
}
