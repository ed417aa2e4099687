use serde::{Deserialize, Serialize};

use super::VendorKind;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A single stateless generation request.
///
/// Conversation history is never carried here; callers flatten any prior
/// turns into `prompt` before calling the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub json_mode: bool,
    /// JSON schema the output is checked against when `json_mode` is set.
    pub schema: Option<serde_json::Value>,
    /// Call-site name used for routing-rule lookup.
    pub feature: Option<String>,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: None,
            prompt: prompt.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
            json_mode: false,
            schema: None,
            feature: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enables JSON mode, optionally validating output against `schema`.
    pub fn json(mut self, schema: Option<serde_json::Value>) -> Self {
        self.json_mode = true;
        self.schema = schema;
        self
    }

    /// Character count of everything sent as input, used for usage estimates.
    pub fn input_chars(&self) -> usize {
        self.prompt.chars().count()
            + self
                .system_prompt
                .as_deref()
                .map(|s| s.chars().count())
                .unwrap_or(0)
    }
}

/// Who is asking, and on whose behalf, for metering and quota purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub client_id: Option<String>,
    pub user_id: Option<String>,
    /// Endpoint label written to usage records. Defaults to the request's
    /// feature name, then to the configured default label.
    pub endpoint: Option<String>,
}

impl RequestMetadata {
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// What an adapter returns for a blocking call, before the executor
/// attaches attempt metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCompletion {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub vendor: VendorKind,
    pub model: String,
    pub provider_id: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
    /// Schema violations found in JSON-mode output. Advisory only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schema_warnings: Vec<String>,
}
