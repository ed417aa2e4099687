use thiserror::Error;

use crate::{db::DbError, providers::ProviderError, quota::QuotaExceededError};

/// Failures surfaced to gateway callers.
///
/// Individual provider failures never appear here directly; they are
/// absorbed by fallback and only reported once every candidate is spent.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no provider configured")]
    NoProviderConfigured,

    #[error("no embedding provider configured")]
    NoEmbeddingProviderConfigured,

    #[error("all {attempts} provider(s) failed; last error: {last_error}")]
    AllProvidersFailed {
        attempts: usize,
        #[source]
        last_error: ProviderError,
    },

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceededError),

    /// Output was already delivered when the provider failed. The result
    /// is truncated and no other provider was tried.
    #[error("stream from provider '{provider_id}' was interrupted: {source}")]
    StreamInterrupted {
        provider_id: String,
        #[source]
        source: ProviderError,
    },

    #[error("provider configuration store error: {0}")]
    Store(#[from] DbError),
}

impl GatewayError {
    /// The underlying vendor failure, for exhaustion and interruption.
    pub fn provider_error(&self) -> Option<&ProviderError> {
        match self {
            GatewayError::AllProvidersFailed { last_error, .. } => Some(last_error),
            GatewayError::StreamInterrupted { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures while wiring a [`crate::Gateway`] from configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to open store: {0}")]
    Store(#[from] DbError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
