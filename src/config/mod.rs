//! TOML configuration. `${VAR}` references are expanded from the process
//! environment before parsing.
//!
//! ```toml
//! [database]
//! type = "sqlite"
//! path = "gateway.db"
//!
//! [[providers]]
//! id = "claude"
//! type = "anthropic"
//! model = "claude-3-5-haiku-latest"
//! credential = "${ANTHROPIC_API_KEY}"
//! priority = 10
//!
//! [[routing]]
//! feature = "summarize"
//! provider = "claude"
//! ```

mod database;
mod http;
mod limits;
mod observability;
mod providers;

use std::{collections::HashSet, path::Path, sync::LazyLock};

pub use database::*;
pub use http::*;
pub use limits::*;
pub use observability::*;
pub use providers::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use crate::secrets::SecretsConfig;
use crate::db::StoreSeed;

/// Root configuration for the gateway.
///
/// All sections are optional with sensible defaults. A config with no
/// providers loads fine; every generation call then fails with
/// "no provider configured".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Outbound HTTP settings shared by every adapter.
    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    /// Plan-tier quota enforcement.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Cipher used to decrypt stored provider credentials.
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Backing store for providers, routing rules, usage and plan tiers.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Declarative provider records, seeded into the store at start-up.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    /// Feature-to-provider bindings.
    #[serde(default)]
    pub routing: Vec<RoutingEntry>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Read and parse a TOML config file. `${VAR}` references must all be set.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_compiled_features(&raw)?;

        let config: GatewayConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Cross-section checks: unique provider ids, rules naming known
    /// providers, at most one active rule per feature.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.http.validate()?;
        self.streaming.validate()?;
        self.quota.validate()?;
        self.database.validate()?;

        let mut ids = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !ids.insert(provider.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate provider id '{}'",
                    provider.id
                )));
            }
        }

        let mut active_features = HashSet::new();
        for rule in &self.routing {
            if !ids.contains(rule.provider.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "routing rule for feature '{}' names unknown provider '{}'",
                    rule.feature, rule.provider
                )));
            }
            if rule.active && !active_features.insert(rule.feature.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "feature '{}' has more than one active routing rule",
                    rule.feature
                )));
            }
        }

        Ok(())
    }

    /// Records to load into the configured store at start-up.
    pub fn seed(&self) -> StoreSeed {
        let mut plan_tiers: Vec<(String, String)> = self
            .quota
            .clients
            .iter()
            .map(|(client, tier)| (client.clone(), tier.as_str().to_string()))
            .collect();
        plan_tiers.sort();

        StoreSeed {
            providers: self.providers.iter().map(ProviderEntry::to_record).collect(),
            rules: self.routing.iter().map(RoutingEntry::to_rule).collect(),
            plan_tiers,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config references ${{{0}}} but it is not set")]
    EnvVarNotFound(String),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Settings that need a cargo feature, checked on the raw TOML so a slim
/// build names the missing feature instead of reporting an unknown variant.
fn check_compiled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let lookup = |path: &[&str]| path.iter().try_fold(raw, |value, key| value.get(*key));
    let mut missing: Vec<(&str, &str)> = Vec::new();

    if !cfg!(feature = "database-sqlite")
        && lookup(&["database", "type"]).and_then(toml::Value::as_str) == Some("sqlite")
    {
        missing.push(("database.type = \"sqlite\"", "database-sqlite"));
    }
    if !cfg!(feature = "prometheus")
        && lookup(&["observability", "metrics", "enabled"]).and_then(toml::Value::as_bool)
            == Some(true)
    {
        missing.push(("observability.metrics.enabled", "prometheus"));
    }

    if missing.is_empty() {
        return Ok(());
    }
    let settings: Vec<&str> = missing.iter().map(|(setting, _)| *setting).collect();
    let features: Vec<&str> = missing.iter().map(|(_, feature)| *feature).collect();
    Err(ConfigError::Validation(format!(
        "{} needs cargo features missing from this build; rebuild with --features {}",
        settings.join(", "),
        features.join(",")
    )))
}

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Replace `${VAR}` with the variable's value. Text after a `#` is a
/// comment and is left as written.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());

    for (index, line) in input.split('\n').enumerate() {
        if index > 0 {
            out.push('\n');
        }
        let (code, comment) = line.split_at(line.find('#').unwrap_or(line.len()));

        let mut missing = None;
        let expanded = ENV_VAR.replace_all(code, |caps: &regex::Captures| {
            let name = &caps[1];
            std::env::var(name).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            })
        });
        if let Some(name) = missing {
            return Err(ConfigError::EnvVarNotFound(name));
        }

        out.push_str(&expanded);
        out.push_str(comment);
    }

    Ok(out)
}
