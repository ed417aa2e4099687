//! Anthropic Claude API provider.
//!
//! Implements the Anthropic Messages API. Anthropic has no embeddings
//! endpoint, so [`Provider::embed`] keeps its unsupported default.

mod stream;
mod types;

use std::time::Duration;

use async_trait::async_trait;
use stream::MessageEventParser;
use types::{AnthropicMessage, AnthropicRequest, AnthropicResponse};

use super::{
    AdapterSettings, Provider, ProviderError, TextStream, effective_system_prompt, read_json,
    send_checked, sse::SseTextStream,
};
use crate::{
    models::{CompletionRequest, ProviderCompletion, ProviderRecord, TokenUsage, VendorKind},
    pricing::estimate_tokens,
};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default max tokens if not specified.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const VENDOR: VendorKind = VendorKind::Anthropic;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    timeout: Duration,
    max_line_bytes: usize,
}

impl AnthropicProvider {
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
            timeout: settings.timeout,
            max_line_bytes: settings.max_line_bytes,
        }
    }

    fn build_request(&self) -> reqwest::RequestBuilder {
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", ANTHROPIC_VERSION);
        match &self.api_key {
            Some(api_key) => request.header("x-api-key", api_key),
            None => request,
        }
    }

    fn payload<'a>(
        &'a self,
        request: &'a CompletionRequest,
        system: Option<&'a str>,
        stream: bool,
    ) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: &self.model,
            messages: vec![AnthropicMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: request.temperature,
            stream,
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn vendor(&self) -> VendorKind {
        VENDOR
    }

    #[tracing::instrument(
        skip(self, request),
        fields(provider = "anthropic", operation = "messages", model = %self.model)
    )]
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = self.payload(request, system.as_deref(), false);

        let response = send_checked(
            VENDOR,
            self.build_request().json(&payload).timeout(self.timeout),
        )
        .await?;
        let body: AnthropicResponse = read_json(VENDOR, response).await?;

        let text = body.text();
        let usage = match &body.usage {
            Some(usage) => TokenUsage::new(usage.input_tokens, usage.output_tokens),
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
        fields(provider = "anthropic", operation = "messages_stream", model = %self.model)
    )]
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        let system = effective_system_prompt(request);
        let payload = self.payload(request, system.as_deref(), true);

        let response = tokio::time::timeout(
            self.timeout,
            send_checked(VENDOR, self.build_request().json(&payload)),
        )
        .await
        .map_err(|_| ProviderError::Timeout {
            vendor: VENDOR,
            timeout: self.timeout,
        })??;

        Ok(SseTextStream::boxed(
            response,
            MessageEventParser::default(),
            self.max_line_bytes,
            self.timeout,
        ))
    }
}
