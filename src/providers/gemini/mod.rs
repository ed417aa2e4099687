//! Google Gemini (Generative Language API) provider.
//!
//! Authenticates with an API key query parameter. Streaming uses
//! `streamGenerateContent?alt=sse`, where every `data:` payload is a full
//! `GenerateContentResponse` holding the next slice of text.

mod types;

use std::time::Duration;

use async_trait::async_trait;
use types::{
    Content, EmbedContentRequest, EmbedContentResponse, GenerateContentRequest,
    GenerateContentResponse, GenerationConfig,
};

use super::{
    AdapterSettings, Provider, ProviderError, TextStream, effective_system_prompt, read_json,
    send_checked,
    sse::{EventParser, SseTextStream},
};
use crate::{
    models::{
        Capability, CompletionRequest, ProviderCompletion, ProviderRecord, TokenUsage, VendorKind,
    },
    pricing::estimate_tokens,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";

const VENDOR: VendorKind = VendorKind::Gemini;

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    embedding_model: Option<String>,
    timeout: Duration,
    max_line_bytes: usize,
}

impl GeminiProvider {
    pub fn new(
        record: &ProviderRecord,
        api_key: Option<String>,
        client: reqwest::Client,
        settings: &AdapterSettings,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: record
                .base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
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

    fn build_request(&self, model: &str, method: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(format!("{}/models/{model}:{method}", self.base_url));
        match &self.api_key {
            Some(key) => request.query(&[("key", key.as_str())]),
            None => request,
        }
    }

    fn payload<'a>(
        request: &'a CompletionRequest,
        system: Option<&'a str>,
    ) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: vec![Content::user(&request.prompt)],
            system_instruction: system.map(Content::untagged),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json_mode.then_some("application/json"),
            },
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn vendor(&self) -> VendorKind {
        VENDOR
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "gemini", operation = "generate_content", model = %self.model)
    )]
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = Self::payload(request, system.as_deref());

        let response = send_checked(
            VENDOR,
            self.build_request(&self.model, "generateContent")
                .json(&payload)
                .timeout(self.timeout),
        )
        .await?;
        let body: GenerateContentResponse = read_json(VENDOR, response).await?;

        let Some(text) = body.first_candidate_text() else {
            let message = match body.block_reason() {
                Some(reason) => format!("prompt blocked: {reason}"),
                None => "response contained no candidates".to_string(),
            };
            return Err(ProviderError::invalid(VENDOR, message));
        };

        let usage = match &body.usage_metadata {
            Some(usage) => TokenUsage::new(usage.prompt_token_count, usage.candidates_token_count),
            None => TokenUsage::new(
                estimate_tokens(request.input_chars()),
                estimate_tokens(text.chars().count()),
            ),
        };

        Ok(ProviderCompletion {
            text,
            model: body.model_version.unwrap_or_else(|| self.model.clone()),
            usage,
        })
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "gemini", operation = "stream_generate_content", model = %self.model)
    )]
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = Self::payload(request, system.as_deref());

        let builder = self
            .build_request(&self.model, "streamGenerateContent")
            .query(&[("alt", "sse")])
            .json(&payload);
        let response = tokio::time::timeout(self.timeout, send_checked(VENDOR, builder))
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
        fields(provider = "gemini", operation = "embed_content", model = ?self.embedding_model)
    )]
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let Some(model) = self.embedding_model.as_deref() else {
            return Err(ProviderError::UnsupportedCapability {
                vendor: VENDOR,
                capability: Capability::Embeddings,
            });
        };

        let payload = EmbedContentRequest {
            content: Content::untagged(text),
        };
        let response = send_checked(
            VENDOR,
            self.build_request(model, "embedContent")
                .json(&payload)
                .timeout(self.timeout),
        )
        .await?;
        let body: EmbedContentResponse = read_json(VENDOR, response).await?;

        Ok(body.embedding.values)
    }
}

#[derive(Default)]
struct ChunkParser {
    done: bool,
}

impl EventParser for ChunkParser {
    fn vendor(&self) -> VendorKind {
        VENDOR
    }

    fn parse(&mut self, data: &str) -> Result<Option<String>, ProviderError> {
        let chunk: GenerateContentResponse = serde_json::from_str(data)
            .map_err(|e| ProviderError::stream(VENDOR, format!("malformed chunk: {e}")))?;

        if let Some(error) = &chunk.error {
            return Err(ProviderError::stream(VENDOR, error.message.clone()));
        }
        if let Some(reason) = chunk.block_reason() {
            return Err(ProviderError::stream(VENDOR, format!("prompt blocked: {reason}")));
        }

        if chunk.finished() {
            self.done = true;
        }
        Ok(chunk.first_candidate_text())
    }

    fn is_done(&self) -> bool {
        self.done
    }
}
