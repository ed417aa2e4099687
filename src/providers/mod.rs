//! Vendor adapters.
//!
//! Every vendor kind implements [`Provider`]: blocking completion, streaming
//! completion and embedding. [`VendorAdapter`] is the closed set of real
//! adapters; adding a vendor means adding a variant. [`AdapterFactory`]
//! builds an adapter per attempt so the stored credential is decrypted once
//! per call.

pub mod anthropic;
pub mod gemini;
pub mod open_ai;
mod sse;
pub mod test;

use std::{pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::Stream;
use http::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::{HttpConfig, StreamingConfig},
    models::{Capability, CompletionRequest, ProviderCompletion, ProviderRecord, VendorKind},
    secrets::{CredentialCipher, SecretError, decrypt_credential},
};

/// Lazily produced text fragments of a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{vendor} request failed: {source}")]
    Request {
        vendor: VendorKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{vendor} did not respond within {}s", timeout.as_secs())]
    Timeout {
        vendor: VendorKind,
        timeout: Duration,
    },

    #[error("{vendor} API error ({status}): {message}")]
    Api {
        vendor: VendorKind,
        status: StatusCode,
        message: String,
    },

    #[error("{vendor} returned a malformed response: {message}")]
    InvalidResponse { vendor: VendorKind, message: String },

    #[error("{vendor} stream failed: {message}")]
    Stream { vendor: VendorKind, message: String },

    #[error("{vendor} does not support {capability}")]
    UnsupportedCapability {
        vendor: VendorKind,
        capability: Capability,
    },

    #[error("{vendor} credential could not be decrypted: {source}")]
    Credential {
        vendor: VendorKind,
        #[source]
        source: SecretError,
    },
}

impl ProviderError {
    pub fn vendor(&self) -> VendorKind {
        match self {
            ProviderError::Request { vendor, .. }
            | ProviderError::Timeout { vendor, .. }
            | ProviderError::Api { vendor, .. }
            | ProviderError::InvalidResponse { vendor, .. }
            | ProviderError::Stream { vendor, .. }
            | ProviderError::UnsupportedCapability { vendor, .. }
            | ProviderError::Credential { vendor, .. } => *vendor,
        }
    }

    pub(crate) fn request(vendor: VendorKind) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| {
            if source.is_timeout() {
                tracing::debug!(%vendor, error = %source, "Provider request timed out");
            }
            ProviderError::Request { vendor, source }
        }
    }

    pub(crate) fn invalid(vendor: VendorKind, message: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            vendor,
            message: message.into(),
        }
    }

    pub(crate) fn stream(vendor: VendorKind, message: impl Into<String>) -> Self {
        ProviderError::Stream {
            vendor,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn vendor(&self) -> VendorKind;

    /// Single-shot completion.
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError>;

    /// Streaming completion. An `Err` here means nothing was produced; an
    /// `Err` item inside the stream means the transport failed mid-way and
    /// the fragments already yielded stand.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError>;

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::UnsupportedCapability {
            vendor: self.vendor(),
            capability: Capability::Embeddings,
        })
    }
}

/// Per-call knobs shared by every adapter.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub max_line_bytes: usize,
}

impl AdapterSettings {
    pub fn from_config(http: &HttpConfig, streaming: &StreamingConfig) -> Self {
        Self {
            timeout: Duration::from_secs(http.timeout_secs),
            max_line_bytes: streaming.max_line_bytes,
        }
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self::from_config(&HttpConfig::default(), &StreamingConfig::default())
    }
}

pub enum VendorAdapter {
    OpenAi(open_ai::OpenAiProvider),
    Anthropic(anthropic::AnthropicProvider),
    Gemini(gemini::GeminiProvider),
}

impl VendorAdapter {
    /// Build the adapter for `record` with an already decrypted key.
    pub fn for_record(
        record: &ProviderRecord,
        api_key: Option<String>,
        client: reqwest::Client,
        settings: &AdapterSettings,
    ) -> Self {
        match record.vendor {
            VendorKind::OpenAi => {
                VendorAdapter::OpenAi(open_ai::OpenAiProvider::new(record, api_key, client, settings))
            }
            VendorKind::Anthropic => VendorAdapter::Anthropic(anthropic::AnthropicProvider::new(
                record, api_key, client, settings,
            )),
            VendorKind::Gemini => {
                VendorAdapter::Gemini(gemini::GeminiProvider::new(record, api_key, client, settings))
            }
        }
    }

    fn inner(&self) -> &dyn Provider {
        match self {
            VendorAdapter::OpenAi(p) => p,
            VendorAdapter::Anthropic(p) => p,
            VendorAdapter::Gemini(p) => p,
        }
    }
}

#[async_trait]
impl Provider for VendorAdapter {
    fn vendor(&self) -> VendorKind {
        self.inner().vendor()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<ProviderCompletion, ProviderError> {
        self.inner().complete(request).await
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
    ) -> Result<TextStream, ProviderError> {
        self.inner().complete_streaming(request).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.inner().embed(text).await
    }
}

/// Produces the adapter used for one attempt against a provider record.
pub trait AdapterFactory: Send + Sync {
    fn adapter_for(&self, provider: &ProviderRecord) -> Result<Arc<dyn Provider>, ProviderError>;
}

/// Builds real HTTP adapters, decrypting the stored credential per attempt.
pub struct HttpAdapterFactory {
    client: reqwest::Client,
    cipher: Arc<dyn CredentialCipher>,
    settings: AdapterSettings,
}

impl HttpAdapterFactory {
    pub fn new(
        client: reqwest::Client,
        cipher: Arc<dyn CredentialCipher>,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            client,
            cipher,
            settings,
        }
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn adapter_for(&self, provider: &ProviderRecord) -> Result<Arc<dyn Provider>, ProviderError> {
        let api_key = provider
            .encrypted_credential
            .as_deref()
            .map(|blob| decrypt_credential(self.cipher.as_ref(), blob))
            .transpose()
            .map_err(|source| ProviderError::Credential {
                vendor: provider.vendor,
                source,
            })?;

        Ok(Arc::new(VendorAdapter::for_record(
            provider,
            api_key,
            self.client.clone(),
            &self.settings,
        )))
    }
}

/// Shared HTTP client. Per-call timeouts are applied by each adapter.
pub fn build_http_client(config: &HttpConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .user_agent(config.user_agent.clone())
        .build()
}

/// System prompt with the JSON-mode instruction appended when requested.
///
/// Vendors without a native JSON switch rely on the instruction alone; the
/// OpenAI protocol additionally requires the word "JSON" in the messages.
pub(crate) fn effective_system_prompt(request: &CompletionRequest) -> Option<String> {
    if !request.json_mode {
        return request.system_prompt.clone();
    }

    let mut instruction =
        String::from("Respond only with a single valid JSON value. Do not wrap it in Markdown.");
    if let Some(schema) = &request.schema {
        instruction.push_str(" The JSON must conform to this JSON Schema: ");
        instruction.push_str(&schema.to_string());
    }

    Some(match request.system_prompt.as_deref() {
        Some(system) if !system.trim().is_empty() => format!("{system}\n\n{instruction}"),
        _ => instruction,
    })
}

/// Send a prepared request, mapping non-2xx statuses to [`ProviderError::Api`].
pub(crate) async fn send_checked(
    vendor: VendorKind,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await.map_err(ProviderError::request(vendor))?;
    check_response(vendor, response).await
}

/// Check response status and extract the vendor error message on failure.
///
/// All three vendors return errors as `{"error": {"message": "..."}}`.
pub(crate) async fn check_response(
    vendor: VendorKind,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("(empty body)"));

    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or(body);

    Err(ProviderError::Api {
        vendor,
        status,
        message,
    })
}

/// Read and decode a JSON body, reporting decode failures as malformed responses.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    vendor: VendorKind,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let body = response.bytes().await.map_err(ProviderError::request(vendor))?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::invalid(vendor, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemoryCipher;

    #[test]
    fn test_json_mode_appends_instruction() {
        let request = CompletionRequest::new("list risks")
            .with_system_prompt("You are an auditor.")
            .json(Some(serde_json::json!({"type": "object"})));

        let system = effective_system_prompt(&request).unwrap();
        assert!(system.starts_with("You are an auditor.\n\n"));
        assert!(system.contains("JSON"));
        assert!(system.contains(r#"{"type":"object"}"#));
    }

    #[test]
    fn test_plain_mode_keeps_system_prompt() {
        let request = CompletionRequest::new("hi");
        assert_eq!(effective_system_prompt(&request), None);
    }

    #[test]
    fn test_factory_reports_undecryptable_credential() {
        let factory = HttpAdapterFactory::new(
            reqwest::Client::new(),
            Arc::new(MemoryCipher::new()),
            AdapterSettings::default(),
        );
        let record =
            ProviderRecord::new("a", VendorKind::Anthropic, "claude-3-5-haiku").with_credential("blob");

        let err = factory.adapter_for(&record).err().unwrap();
        assert!(matches!(
            err,
            ProviderError::Credential {
                vendor: VendorKind::Anthropic,
                ..
            }
        ));
    }

    #[test]
    fn test_factory_builds_matching_variant() {
        let factory = HttpAdapterFactory::new(
            reqwest::Client::new(),
            Arc::new(MemoryCipher::new().with("blob", "sk")),
            AdapterSettings::default(),
        );
        let record = ProviderRecord::new("g", VendorKind::Gemini, "gemini-2.0-flash")
            .with_credential("blob");

        let adapter = factory.adapter_for(&record).unwrap();
        assert_eq!(adapter.vendor(), VendorKind::Gemini);
    }
}
