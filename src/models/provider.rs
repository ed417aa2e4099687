use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire protocol family spoken by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    /// Generic REST endpoint speaking the OpenAI chat-completions protocol
    /// (OpenAI itself, OpenRouter, Ollama, vLLM, ...).
    #[serde(alias = "openai", alias = "generic")]
    OpenAi,
    Anthropic,
    #[serde(alias = "google")]
    Gemini,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::OpenAi => "open_ai",
            VendorKind::Anthropic => "anthropic",
            VendorKind::Gemini => "gemini",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "open_ai" | "openai" | "generic" => Some(VendorKind::OpenAi),
            "anthropic" => Some(VendorKind::Anthropic),
            "gemini" | "google" => Some(VendorKind::Gemini),
            _ => None,
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional operations a provider may support beyond text generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Embeddings,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Embeddings => f.write_str("embeddings"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    #[serde(default)]
    pub supports_embeddings: bool,
}

impl ProviderCapabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Embeddings => self.supports_embeddings,
        }
    }
}

/// A configured provider as stored by the administration layer.
///
/// The gateway treats these records as read-only. Disabled providers are
/// never returned by resolution, but usage rows referencing them survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    pub vendor: VendorKind,
    pub model: String,
    /// Overrides the vendor's public API base URL.
    pub base_url: Option<String>,
    /// Credential as stored, decrypted once per call.
    pub encrypted_credential: Option<String>,
    pub enabled: bool,
    /// Higher is preferred.
    pub priority: i32,
    pub capabilities: ProviderCapabilities,
    /// Model used for embedding calls. Falls back to the vendor default.
    pub embedding_model: Option<String>,
}

impl ProviderRecord {
    pub fn new(id: impl Into<String>, vendor: VendorKind, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vendor,
            model: model.into(),
            base_url: None,
            encrypted_credential: None,
            enabled: true,
            priority: 0,
            capabilities: ProviderCapabilities::default(),
            embedding_model: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.encrypted_credential = Some(credential.into());
        self
    }

    pub fn with_embeddings(mut self, embedding_model: Option<String>) -> Self {
        self.capabilities.supports_embeddings = true;
        self.embedding_model = embedding_model;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Binds a call-site feature name to its preferred provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub feature: String,
    pub provider_id: String,
    pub active: bool,
}

impl RoutingRule {
    pub fn new(feature: impl Into<String>, provider_id: impl Into<String>) -> Self {
        Self {
            feature: feature.into(),
            provider_id: provider_id.into(),
            active: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_kind_parse_aliases() {
        assert_eq!(VendorKind::parse("openai"), Some(VendorKind::OpenAi));
        assert_eq!(VendorKind::parse("Open_AI"), Some(VendorKind::OpenAi));
        assert_eq!(VendorKind::parse("google"), Some(VendorKind::Gemini));
        assert_eq!(VendorKind::parse("bedrock"), None);
    }

    #[test]
    fn test_vendor_kind_serde_matches_as_str() {
        for vendor in [VendorKind::OpenAi, VendorKind::Anthropic, VendorKind::Gemini] {
            let json = serde_json::to_string(&vendor).unwrap();
            assert_eq!(json, format!("\"{}\"", vendor.as_str()));
        }
    }
}
