//! Test provider implementation with configurable failure modes.
//!
//! Lets the gateway be exercised without external dependencies. Failure
//! modes cover the paths fallback cares about: errors before any output,
//! errors after partial streamed output, and upstreams that never finish.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use http::StatusCode;
use parking_lot::Mutex;

use crate::{
    models::{
        Capability, CompletionRequest, ProviderCompletion, ProviderRecord, TokenUsage, VendorKind,
    },
    pricing::estimate_tokens,
    providers::{AdapterFactory, Provider, ProviderError, TextStream},
};

/// How a [`TestProvider`] misbehaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TestFailureMode {
    /// Normal operation
    #[default]
    None,
    /// Fail before producing anything, as a non-2xx vendor response would.
    HttpError {
        status_code: u16,
        message: Option<String>,
    },
    /// Wait, then fail as if the vendor never answered.
    Timeout { delay_ms: u64 },
    /// Succeed `success_count` times, then fail every call.
    FailAfterN {
        success_count: u32,
        failure_status: u16,
    },
    /// Stream `fragments` fragments, then drop the connection.
    StreamErrorAfter { fragments: usize },
    /// Stream `fragments` fragments, then never yield again.
    StreamStallAfter { fragments: usize },
}

/// A provider that answers with canned text without making real API calls.
pub struct TestProvider {
    vendor: VendorKind,
    model_name: String,
    response: String,
    usage: Option<TokenUsage>,
    embedding: Option<Vec<f32>>,
    failure_mode: TestFailureMode,
    /// Request counter for FailAfterN mode
    request_count: AtomicU32,
}

impl TestProvider {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            vendor: VendorKind::OpenAi,
            model_name: model_name.into(),
            response: "This is a test response.".to_string(),
            usage: None,
            embedding: None,
            failure_mode: TestFailureMode::None,
            request_count: AtomicU32::new(0),
        }
    }

    pub fn with_vendor(mut self, vendor: VendorKind) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some(TokenUsage::new(prompt_tokens, completion_tokens));
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_failure_mode(mut self, failure_mode: TestFailureMode) -> Self {
        self.failure_mode = failure_mode;
        self
    }

    /// Calls received so far, across all operations.
    pub fn calls(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Check the failure mode and apply it. Returns `Err` when the call
    /// should fail before producing any output.
    async fn apply_failure_mode(&self) -> Result<(), ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);

        match &self.failure_mode {
            TestFailureMode::HttpError {
                status_code,
                message,
            } => Err(self.api_error(
                *status_code,
                message
                    .clone()
                    .unwrap_or_else(|| format!("Test provider error: {status_code}")),
            )),

            TestFailureMode::Timeout { delay_ms } => {
                let timeout = Duration::from_millis(*delay_ms);
                tokio::time::sleep(timeout).await;
                Err(ProviderError::Timeout {
                    vendor: self.vendor,
                    timeout,
                })
            }

            TestFailureMode::FailAfterN {
                success_count,
                failure_status,
            } if count >= *success_count => Err(self.api_error(
                *failure_status,
                format!(
                    "FailAfterN triggered (request {} of {})",
                    count + 1,
                    success_count
                ),
            )),

            _ => Ok(()),
        }
    }

    fn api_error(&self, status_code: u16, message: String) -> ProviderError {
        ProviderError::Api {
            vendor: self.vendor,
            status: StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message,
        }
    }

    /// The canned response split at word boundaries, keeping the spaces.
    fn fragments(&self) -> Vec<String> {
        self.response
            .split_inclusive(' ')
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl Provider for TestProvider {
    fn vendor(&self) -> VendorKind {
        self.vendor
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        self.apply_failure_mode().await?;

        Ok(ProviderCompletion {
            text: self.response.clone(),
            model: self.model_name.clone(),
            usage: self.usage.unwrap_or_else(|| {
                TokenUsage::new(
                    estimate_tokens(request.input_chars()),
                    estimate_tokens(self.response.chars().count()),
                )
            }),
        })
    }

    async fn complete_streaming(
        &self,
        _request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        self.apply_failure_mode().await?;

        let fragments = self.fragments();
        let vendor = self.vendor;

        let stream: TextStream = match self.failure_mode {
            TestFailureMode::StreamErrorAfter { fragments: n } => Box::pin(
                stream::iter(fragments.into_iter().take(n).map(Ok)).chain(stream::once(
                    async move { Err(ProviderError::stream(vendor, "connection reset by peer")) },
                )),
            ),
            TestFailureMode::StreamStallAfter { fragments: n } => Box::pin(
                stream::iter(fragments.into_iter().take(n).map(Ok)).chain(stream::pending()),
            ),
            _ => Box::pin(stream::iter(fragments.into_iter().map(Ok))),
        };
        Ok(stream)
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.apply_failure_mode().await?;

        self.embedding
            .clone()
            .ok_or(ProviderError::UnsupportedCapability {
                vendor: self.vendor,
                capability: Capability::Embeddings,
            })
    }
}

/// Hands out pre-registered providers by provider id.
///
/// Ids without a registration get a healthy [`TestProvider`] for the
/// record's vendor and model.
#[derive(Default)]
pub struct TestAdapterFactory {
    providers: HashMap<String, Arc<TestProvider>>,
    built: Mutex<Vec<String>>,
}

impl TestAdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider_id: impl Into<String>, provider: TestProvider) -> Self {
        self.providers.insert(provider_id.into(), Arc::new(provider));
        self
    }

    pub fn provider(&self, provider_id: &str) -> Option<Arc<TestProvider>> {
        self.providers.get(provider_id).cloned()
    }

    /// Provider ids in the order adapters were requested.
    pub fn attempts(&self) -> Vec<String> {
        self.built.lock().clone()
    }
}

impl AdapterFactory for TestAdapterFactory {
    fn adapter_for(&self, provider: &ProviderRecord) -> Result<Arc<dyn Provider>, ProviderError> {
        self.built.lock().push(provider.id.clone());

        Ok(match self.providers.get(&provider.id) {
            Some(registered) => registered.clone(),
            None => Arc::new(TestProvider::new(provider.model.clone()).with_vendor(provider.vendor)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_after_n() {
        let provider = TestProvider::new("m").with_failure_mode(TestFailureMode::FailAfterN {
            success_count: 1,
            failure_status: 503,
        });
        let request = CompletionRequest::new("hi");

        assert!(provider.complete(&request).await.is_ok());
        let err = provider.complete(&request).await.unwrap_err();
        assert!(err.to_string().contains("503"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_after_fragments() {
        let provider = TestProvider::new("m")
            .with_response("one two three")
            .with_failure_mode(TestFailureMode::StreamErrorAfter { fragments: 2 });

        let items: Vec<_> = provider
            .complete_streaming(&CompletionRequest::new("hi"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "one ");
        assert_eq!(items[1].as_ref().unwrap(), "two ");
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_factory_falls_back_to_healthy_provider() {
        let factory = TestAdapterFactory::new();
        let record = ProviderRecord::new("x", VendorKind::Gemini, "gemini-2.0-flash");

        let adapter = factory.adapter_for(&record).unwrap();
        assert_eq!(adapter.vendor(), VendorKind::Gemini);
        assert_eq!(factory.attempts(), vec!["x".to_string()]);
    }
}
