//! OpenAI-compatible chat-completions adapter.
//!
//! Covers OpenAI itself and any server speaking the same protocol
//! (OpenRouter, Ollama, vLLM, LiteLLM, ...).

mod types;

use std::time::Duration;

use async_trait::async_trait;
use http::header::AUTHORIZATION;

use self::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
    EmbeddingRequest, EmbeddingResponse, ResponseFormat,
};
use super::{
    AdapterSettings, Provider, ProviderError, TextStream, effective_system_prompt, read_json,
    send_checked,
    sse::{EventParser, SseTextStream},
};
use crate::{
    models::{CompletionRequest, ProviderCompletion, ProviderRecord, TokenUsage, VendorKind},
    pricing::estimate_tokens,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const VENDOR: VendorKind = VendorKind::OpenAi;

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    /// Set only when the record advertises embedding support.
    embedding_model: Option<String>,
    timeout: Duration,
    max_line_bytes: usize,
}

impl OpenAiProvider {
    pub fn new(
        record: &ProviderRecord,
        api_key: Option<String>,
        client: reqwest::Client,
        settings: &AdapterSettings,
    ) -> Self {
        let base_url = record
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Self {
            client,
            api_key,
            base_url,
            model: record.model.clone(),
            embedding_model: record.capabilities.supports_embeddings.then(|| {
                record
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string())
            }),
            timeout: settings.timeout,
            max_line_bytes: settings.max_line_bytes,
        }
    }

    /// Build a request with common auth headers.
    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(url);
        match &self.api_key {
            Some(api_key) => request.header(AUTHORIZATION, format!("Bearer {api_key}")),
            None => request,
        }
    }

    fn chat_payload<'a>(
        &'a self,
        request: &'a CompletionRequest,
        system: Option<&'a str>,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat::JSON_OBJECT),
            stream,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn vendor(&self) -> VendorKind {
        VENDOR
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "openai", operation = "chat_completion", model = %self.model)
    )]
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = self.chat_payload(request, system.as_deref(), false);
        let url = format!("{}/chat/completions", self.base_url);

        let response = send_checked(
            VENDOR,
            self.build_request(&url).json(&payload).timeout(self.timeout),
        )
        .await?;
        let body: ChatCompletionResponse = read_json(VENDOR, response).await?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::invalid(VENDOR, "response contained no choices"))?;

        let usage = match body.usage {
            Some(usage) => TokenUsage::new(usage.prompt_tokens, usage.completion_tokens),
            None => TokenUsage::new(
                estimate_tokens(request.input_chars()),
                estimate_tokens(text.chars().count()),
            ),
        };

        Ok(ProviderCompletion {
            text,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            usage,
        })
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "openai", operation = "chat_completion_stream", model = %self.model)
    )]
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = self.chat_payload(request, system.as_deref(), true);
        let url = format!("{}/chat/completions", self.base_url);

        // Headers are bounded here; the decoder bounds each silent gap in
        // the body with the same timeout.
        let response = tokio::time::timeout(
            self.timeout,
            send_checked(VENDOR, self.build_request(&url).json(&payload)),
        )
        .await
        .map_err(|_| ProviderError::Timeout {
            vendor: VENDOR,
            timeout: self.timeout,
        })??;

        Ok(SseTextStream::boxed(
            response,
            ChunkParser::default(),
            self.max_line_bytes,
            self.timeout,
        ))
    }

    #[tracing::instrument(
        skip(self, text),
        fields(provider = "openai", operation = "embedding", model = ?self.embedding_model)
    )]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Err(ProviderError::UnsupportedCapability {
                vendor: VENDOR,
                capability: crate::models::Capability::Embeddings,
            });
        };

        let url = format!("{}/embeddings", self.base_url);
        let payload = EmbeddingRequest { model, input: text };
        let response = send_checked(
            VENDOR,
            self.build_request(&url).json(&payload).timeout(self.timeout),
        )
        .await?;
        let body: EmbeddingResponse = read_json(VENDOR, response).await?;

        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ProviderError::invalid(VENDOR, "embedding response contained no data"))
    }
}

/// `data: {chunk}` ... `data: [DONE]`
#[derive(Default)]
struct ChunkParser {
    done: bool,
    saw_finish_reason: bool,
}

impl EventParser for ChunkParser {
    fn vendor(&self) -> VendorKind {
        VENDOR
    }

    fn parse(&mut self, data: &str) -> Result<Option<String>, ProviderError> {
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: ChatCompletionChunk = serde_json::from_str(data)
            .map_err(|e| ProviderError::stream(VENDOR, format!("malformed chunk: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(ProviderError::stream(VENDOR, error.message));
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if choice.finish_reason.is_some() {
                self.saw_finish_reason = true;
            }
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
        }
        Ok(Some(text))
    }

    fn is_done(&self) -> bool {
        self.done
    }

    // Some compatible servers close the connection without `[DONE]`
    fn ended_cleanly(&self) -> bool {
        self.done || self.saw_finish_reason
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;
    use crate::models::Capability;

    fn provider(server: &MockServer, embeddings: bool) -> OpenAiProvider {
        let mut record = ProviderRecord::new("openai", VendorKind::OpenAi, "gpt-4o-mini")
            .with_base_url(format!("{}/v1/", server.uri()));
        if embeddings {
            record = record.with_embeddings(None);
        }
        OpenAiProvider::new(
            &record,
            Some("sk-test".into()),
            reqwest::Client::new(),
            &AdapterSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_complete_sends_vendor_idioms_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 256,
                "response_format": {"type": "json_object"},
                "messages": [{"role": "system"}, {"role": "user", "content": "score it"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o-mini-2024-07-18",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "{\"score\": 3}"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 21, "completion_tokens": 7, "total_tokens": 28}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new("score it").with_max_tokens(256).json(None);
        let completion = provider(&server, false).complete(&request).await.unwrap();

        assert_eq!(completion.text, "{\"score\": 3}");
        assert_eq!(completion.model, "gpt-4o-mini-2024-07-18");
        assert_eq!(completion.usage, TokenUsage::new(21, 7));
    }

    #[tokio::test]
    async fn test_missing_usage_is_estimated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "12345678"}}]
            })))
            .mount(&server)
            .await;

        let completion = provider(&server, false)
            .complete(&CompletionRequest::new("abcd"))
            .await
            .unwrap();

        assert_eq!(completion.usage, TokenUsage::new(1, 2));
        assert_eq!(completion.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_error_body_message_is_extracted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "rate_limit_error"}
            })))
            .mount(&server)
            .await;

        let err = provider(&server, false)
            .complete(&CompletionRequest::new("hi"))
            .await
            .unwrap_err();

        match err {
            ProviderError::Api {
                status, message, ..
            } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(message, "Rate limit reached");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_yields_deltas_until_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider(&server, false)
            .complete_streaming(&CompletionRequest::new("hi"))
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;

        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);

        // Usage is never consumed, so it is not requested either.
        let requests = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(sent.get("stream_options").is_none());
    }

    #[tokio::test]
    async fn test_streaming_http_error_fails_before_first_fragment() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
            .mount(&server)
            .await;

        let result = provider(&server, false)
            .complete_streaming(&CompletionRequest::new("hi"))
            .await;

        assert!(matches!(result, Err(ProviderError::Api { .. })));
    }

    #[tokio::test]
    async fn test_embed_requires_capability() {
        let server = MockServer::start().await;
        let err = provider(&server, false).embed("text").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::UnsupportedCapability {
                capability: Capability::Embeddings,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_embed_uses_default_embedding_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"model": DEFAULT_EMBEDDING_MODEL, "input": "text"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.25, -0.5]}],
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            })))
            .mount(&server)
            .await;

        let vector = provider(&server, true).embed("text").await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5]);
    }
}
