//! Generation executor: runs a request against an ordered candidate list.
//!
//! Every attempt writes exactly one usage record before the executor moves
//! on, so a quota check for the next request sees it.

use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};

use futures_util::{Stream, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::Instrument;

use super::fallback::{AttemptOutcome, walk_candidates};
use crate::{
    config::GenerationConfig,
    error::{GatewayError, GatewayResult},
    models::{CompletionRequest, CompletionResponse, ProviderRecord, RequestMetadata, TokenUsage},
    observability::metrics,
    pricing::estimate_tokens,
    providers::{AdapterFactory, ProviderError},
    usage_tracker::{Attempt, UsageTracker},
    validation,
};

/// Message recorded when the consumer abandons a stream.
pub const CANCELLED_BY_CONSUMER: &str = "cancelled by consumer";

#[derive(Clone)]
pub struct GenerationExecutor {
    factory: Arc<dyn AdapterFactory>,
    tracker: UsageTracker,
    config: GenerationConfig,
    channel_capacity: usize,
}

impl GenerationExecutor {
    pub fn new(
        factory: Arc<dyn AdapterFactory>,
        tracker: UsageTracker,
        config: GenerationConfig,
        channel_capacity: usize,
    ) -> Self {
        Self {
            factory,
            tracker,
            config,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Endpoint label for usage records: caller's label, then the request's
    /// feature, then the configured default.
    pub fn endpoint_label(&self, request: &CompletionRequest, metadata: &RequestMetadata) -> String {
        metadata
            .endpoint
            .clone()
            .or_else(|| request.feature.clone())
            .unwrap_or_else(|| self.config.default_endpoint.clone())
    }

    /// Blocking generation: the first candidate that answers wins.
    pub async fn run(
        &self,
        candidates: &[ProviderRecord],
        request: &CompletionRequest,
        metadata: &RequestMetadata,
    ) -> GatewayResult<CompletionResponse> {
        let endpoint = self.endpoint_label(request, metadata);

        walk_candidates(candidates, "complete", |provider| {
            let endpoint = endpoint.as_str();
            async move { self.attempt_complete(provider, request, metadata, endpoint).await }
        })
        .await
    }

    async fn attempt_complete(
        &self,
        provider: &ProviderRecord,
        request: &CompletionRequest,
        metadata: &RequestMetadata,
        endpoint: &str,
    ) -> AttemptOutcome<CompletionResponse> {
        let started = Instant::now();
        let result = match self.factory.adapter_for(provider) {
            Ok(adapter) => adapter.complete(request).await,
            Err(e) => Err(e),
        };
        let latency = started.elapsed();

        match result {
            Ok(completion) => {
                self.tracker
                    .record(
                        &Attempt {
                            provider,
                            model: &completion.model,
                            usage: completion.usage,
                            latency,
                            error: None,
                            operation: "complete",
                        },
                        metadata,
                        endpoint,
                    )
                    .await;

                let schema_warnings = self.schema_warnings(provider, request, &completion.text);
                AttemptOutcome::Done(CompletionResponse {
                    text: completion.text,
                    vendor: provider.vendor,
                    model: completion.model,
                    provider_id: provider.id.clone(),
                    usage: completion.usage,
                    latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    schema_warnings,
                })
            }
            Err(error) => {
                self.record_failure(provider, latency, &error, "complete", metadata, endpoint)
                    .await;
                AttemptOutcome::Retry(error)
            }
        }
    }

    fn schema_warnings(
        &self,
        provider: &ProviderRecord,
        request: &CompletionRequest,
        text: &str,
    ) -> Vec<String> {
        if !request.json_mode || !self.config.validate_json_schema {
            return Vec::new();
        }
        let Some(schema) = &request.schema else {
            return Vec::new();
        };

        let warnings: Vec<String> = validation::validate_output(text, schema)
            .into_iter()
            .map(|e| e.to_string())
            .collect();
        if !warnings.is_empty() {
            tracing::warn!(
                provider_id = %provider.id,
                violations = warnings.len(),
                details = %warnings.join("; "),
                "JSON-mode output does not match the requested schema"
            );
        }
        warnings
    }

    async fn record_failure(
        &self,
        provider: &ProviderRecord,
        latency: Duration,
        error: &ProviderError,
        operation: &'static str,
        metadata: &RequestMetadata,
        endpoint: &str,
    ) {
        self.record_failure_message(provider, latency, error.to_string(), operation, metadata, endpoint)
            .await;
    }

    async fn record_failure_message(
        &self,
        provider: &ProviderRecord,
        latency: Duration,
        message: String,
        operation: &'static str,
        metadata: &RequestMetadata,
        endpoint: &str,
    ) {
        self.tracker
            .record(
                &Attempt {
                    provider,
                    model: &provider.model,
                    usage: TokenUsage::default(),
                    latency,
                    error: Some(message),
                    operation,
                },
                metadata,
                endpoint,
            )
            .await;
    }

    /// Streaming generation.
    ///
    /// The candidate walk runs in its own task and forwards fragments
    /// through a bounded channel. Fallback is only possible until the first
    /// fragment has been forwarded; after that a failure ends the stream
    /// with [`GatewayError::StreamInterrupted`]. Exhaustion ends it with
    /// [`GatewayError::AllProvidersFailed`].
    pub fn run_streaming(
        &self,
        candidates: Vec<ProviderRecord>,
        request: CompletionRequest,
        metadata: RequestMetadata,
    ) -> GenerationStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cancel = CancellationToken::new();
        let endpoint = self.endpoint_label(&request, &metadata);

        let task = StreamTask {
            executor: self.clone(),
            request,
            metadata,
            endpoint,
            tx,
            cancel: cancel.clone(),
        };
        let span = tracing::info_span!("generation_stream", candidates = candidates.len());
        let handle = tokio::spawn(task.run(candidates).instrument(span));

        GenerationStream {
            rx,
            guard: Some(cancel.drop_guard()),
            task: Some(handle),
        }
    }

    /// Embedding: the first candidate that returns a vector wins.
    pub async fn run_embedding(
        &self,
        candidates: &[ProviderRecord],
        text: &str,
        metadata: &RequestMetadata,
    ) -> GatewayResult<Vec<f32>> {
        walk_candidates(candidates, "embed", |provider| async move {
            self.attempt_embed(provider, text, metadata).await
        })
        .await
    }

    async fn attempt_embed(
        &self,
        provider: &ProviderRecord,
        text: &str,
        metadata: &RequestMetadata,
    ) -> AttemptOutcome<Vec<f32>> {
        const ENDPOINT: &str = "embed";

        let started = Instant::now();
        let result = match self.factory.adapter_for(provider) {
            Ok(adapter) => adapter.embed(text).await,
            Err(e) => Err(e),
        };
        let latency = started.elapsed();

        match result {
            Ok(embedding) => {
                let model = provider.embedding_model.as_deref().unwrap_or(&provider.model);
                self.tracker
                    .record(
                        &Attempt {
                            provider,
                            model,
                            usage: TokenUsage::new(estimate_tokens(text.chars().count()), 0),
                            latency,
                            error: None,
                            operation: "embed",
                        },
                        metadata,
                        ENDPOINT,
                    )
                    .await;
                AttemptOutcome::Done(embedding)
            }
            Err(error) => {
                self.record_failure(provider, latency, &error, "embed", metadata, ENDPOINT)
                    .await;
                AttemptOutcome::Retry(error)
            }
        }
    }
}

/// How a streaming attempt that did not fall back ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Completed,
    Cancelled,
}

impl StreamEnd {
    fn as_str(&self) -> &'static str {
        match self {
            StreamEnd::Completed => "completed",
            StreamEnd::Cancelled => "cancelled",
        }
    }
}

struct StreamTask {
    executor: GenerationExecutor,
    request: CompletionRequest,
    metadata: RequestMetadata,
    endpoint: String,
    tx: mpsc::Sender<Result<String, GatewayError>>,
    cancel: CancellationToken,
}

impl StreamTask {
    async fn run(self, candidates: Vec<ProviderRecord>) {
        let result = walk_candidates(&candidates, "stream", |provider| self.attempt(provider)).await;

        match result {
            Ok((provider_id, end, fragments)) => {
                metrics::record_stream_outcome(Some(provider_id), end.as_str(), fragments);
            }
            Err(error) => {
                let (provider_id, outcome) = match &error {
                    GatewayError::StreamInterrupted { provider_id, .. } => {
                        (Some(provider_id.clone()), "interrupted")
                    }
                    _ => (None, "failed"),
                };
                metrics::record_stream_outcome(provider_id.as_deref(), outcome, 0);
                // The consumer may already be gone; nothing else to do then.
                let _ = self.tx.send(Err(error)).await;
            }
        }
    }

    async fn attempt<'a>(
        &self,
        provider: &'a ProviderRecord,
    ) -> AttemptOutcome<(&'a str, StreamEnd, u64)> {
        let executor = &self.executor;
        let started = Instant::now();

        // Cancelled between candidates: this one was never contacted, so
        // there is no attempt to record.
        if self.cancel.is_cancelled() {
            tracing::debug!(provider_id = %provider.id, "Stream cancelled before attempt");
            return AttemptOutcome::Done((&provider.id, StreamEnd::Cancelled, 0));
        }

        let opened = match executor.factory.adapter_for(provider) {
            Ok(adapter) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = adapter.complete_streaming(&self.request) => Some(result),
            },
            Err(e) => Some(Err(e)),
        };

        let mut upstream = match opened {
            None => return self.cancelled(provider, started, 0).await,
            Some(Ok(stream)) => stream,
            Some(Err(error)) => {
                executor
                    .record_failure(provider, started.elapsed(), &error, "stream", &self.metadata, &self.endpoint)
                    .await;
                return AttemptOutcome::Retry(error);
            }
        };

        let mut text = String::new();
        let mut fragments: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = upstream.next() => Some(item),
            };

            match next {
                None => {
                    drop(upstream);
                    return self.cancelled(provider, started, fragments).await;
                }
                Some(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    let delivered = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => false,
                        sent = self.tx.send(Ok(fragment)) => sent.is_ok(),
                    };
                    if !delivered {
                        drop(upstream);
                        return self.cancelled(provider, started, fragments).await;
                    }
                    fragments += 1;
                }
                Some(Some(Err(error))) => {
                    executor
                        .record_failure(
                            provider,
                            started.elapsed(),
                            &error,
                            "stream",
                            &self.metadata,
                            &self.endpoint,
                        )
                        .await;
                    if fragments == 0 {
                        return AttemptOutcome::Retry(error);
                    }
                    tracing::warn!(
                        provider_id = %provider.id,
                        fragments,
                        error = %error,
                        "Stream interrupted after partial output"
                    );
                    return AttemptOutcome::Abort(GatewayError::StreamInterrupted {
                        provider_id: provider.id.clone(),
                        source: error,
                    });
                }
                Some(None) => {
                    let usage = TokenUsage::new(
                        estimate_tokens(self.request.input_chars()),
                        estimate_tokens(text.chars().count()),
                    );
                    executor
                        .tracker
                        .record(
                            &Attempt {
                                provider,
                                model: &provider.model,
                                usage,
                                latency: started.elapsed(),
                                error: None,
                                operation: "stream",
                            },
                            &self.metadata,
                            &self.endpoint,
                        )
                        .await;
                    return AttemptOutcome::Done((&provider.id, StreamEnd::Completed, fragments));
                }
            }
        }
    }

    async fn cancelled<'a>(
        &self,
        provider: &'a ProviderRecord,
        started: Instant,
        fragments: u64,
    ) -> AttemptOutcome<(&'a str, StreamEnd, u64)> {
        tracing::debug!(provider_id = %provider.id, fragments, "Stream cancelled by consumer");
        self.executor
            .record_failure_message(
                provider,
                started.elapsed(),
                CANCELLED_BY_CONSUMER.to_string(),
                "stream",
                &self.metadata,
                &self.endpoint,
            )
            .await;
        AttemptOutcome::Done((&provider.id, StreamEnd::Cancelled, fragments))
    }
}

/// Text fragments of a streaming generation, in order.
///
/// Ends with an `Err` item when the generation failed. Dropping the stream
/// or calling [`GenerationStream::cancel`] aborts the upstream request.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<String, GatewayError>>,
    guard: Option<DropGuard>,
    task: Option<JoinHandle<()>>,
}

impl GenerationStream {
    /// Abort the generation and wait until the upstream request is closed
    /// and its usage record written.
    pub async fn cancel(mut self) {
        drop(self.guard.take());
        self.rx.close();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Streaming task panicked");
        }
    }

    /// Collect every fragment, stopping at the first error.
    pub async fn collect_text(mut self) -> GatewayResult<String> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }
}

impl Stream for GenerationStream {
    type Item = Result<String, GatewayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
