use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::{ProviderCapabilities, ProviderRecord, RoutingRule, VendorKind};

/// A declarative `[[providers]]` entry.
///
/// ```toml
/// [[providers]]
/// id = "openrouter"
/// type = "open_ai"
/// model = "anthropic/claude-3.5-haiku"
/// base_url = "https://openrouter.ai/api/v1"
/// credential = "${OPENROUTER_API_KEY}"
/// priority = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderEntry {
    pub id: String,

    #[serde(rename = "type")]
    pub vendor: VendorKind,

    pub model: String,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Stored credential. Interpreted by the configured `[secrets]` cipher.
    #[serde(default)]
    pub credential: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Higher is tried first.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub supports_embeddings: bool,

    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl ProviderEntry {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Validation("provider id must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "provider '{}' has an empty model",
                self.id
            )));
        }
        if let Some(base_url) = &self.base_url {
            url::Url::parse(base_url).map_err(|e| {
                ConfigError::Validation(format!(
                    "provider '{}' has an invalid base_url '{base_url}': {e}",
                    self.id
                ))
            })?;
        }
        if self.embedding_model.is_some() && !self.supports_embeddings {
            return Err(ConfigError::Validation(format!(
                "provider '{}' sets embedding_model without supports_embeddings",
                self.id
            )));
        }
        Ok(())
    }

    pub fn to_record(&self) -> ProviderRecord {
        ProviderRecord {
            id: self.id.clone(),
            vendor: self.vendor,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            encrypted_credential: self.credential.clone(),
            enabled: self.enabled,
            priority: self.priority,
            capabilities: ProviderCapabilities {
                supports_embeddings: self.supports_embeddings,
            },
            embedding_model: self.embedding_model.clone(),
        }
    }
}

/// A `[[routing]]` entry binding a feature to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingEntry {
    pub feature: String,
    pub provider: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl RoutingEntry {
    pub fn to_rule(&self) -> RoutingRule {
        RoutingRule {
            feature: self.feature.clone(),
            provider_id: self.provider.clone(),
            active: self.active,
        }
    }
}

fn default_true() -> bool {
    true
}
