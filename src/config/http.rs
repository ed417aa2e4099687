use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::models::DEFAULT_TEMPERATURE;

/// Outbound HTTP settings shared by every vendor adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Per-call timeout. For streaming calls it bounds the wait for the
    /// response headers and then every silent gap between body chunks.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "http timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    concat!("provider-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamingConfig {
    /// Fragments buffered between the executor task and the consumer.
    /// A slow consumer applies backpressure to the upstream read.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Longest SSE line accepted from a vendor before the stream is failed.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "streaming.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Validation(
                "streaming.max_line_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_channel_capacity() -> usize {
    32
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

/// Defaults applied to generation calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationConfig {
    /// Temperature used by the CLI when none is given.
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Check JSON-mode output against the request schema. Violations are
    /// reported, never fatal.
    #[serde(default = "default_true")]
    pub validate_json_schema: bool,

    /// Endpoint label recorded when neither the caller nor the request
    /// names one.
    #[serde(default = "default_endpoint")]
    pub default_endpoint: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_temperature: default_temperature(),
            validate_json_schema: true,
            default_endpoint: default_endpoint(),
        }
    }
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_endpoint() -> String {
    "generate".to_string()
}

fn default_true() -> bool {
    true
}
