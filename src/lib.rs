//! LLM provider gateway.
//!
//! Routes text-generation requests from application code to one of several
//! configured vendors (OpenAI-compatible, Anthropic, Gemini), with
//! per-feature routing rules, ordered fallback, per-attempt usage metering
//! and plan-tier quotas. Blocking and streaming calls share one fallback
//! and accounting path.
//!
//! ```ignore
//! let config = GatewayConfig::from_file("gateway.toml")?;
//! let gateway = Gateway::from_config(&config).await?;
//! let response = gateway
//!     .generate(
//!         &CompletionRequest::new("Summarize this").with_feature("summarize"),
//!         &RequestMetadata::for_client("acme"),
//!     )
//!     .await?;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod observability;
pub mod pricing;
pub mod providers;
pub mod quota;
pub mod routing;
pub mod secrets;
pub mod services;
pub mod usage_tracker;
pub mod validation;

#[cfg(test)]
mod tests;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult, SetupError};
pub use models::{CompletionRequest, CompletionResponse, RequestMetadata};
pub use services::{Gateway, GenerationStream};
