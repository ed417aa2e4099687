//! Ordered walk over candidate providers.
//!
//! Blocking, streaming and embedding calls share this loop. Each attempt
//! reports whether the walk may continue: a failure with nothing delivered
//! to the caller moves on to the next candidate, anything else ends the
//! walk. Attempts are strictly sequential.

use std::future::Future;

use crate::{
    error::{GatewayError, GatewayResult},
    models::ProviderRecord,
    observability::metrics,
    providers::ProviderError,
};

/// How one attempt ended, from the walk's point of view.
#[derive(Debug)]
pub(crate) enum AttemptOutcome<T> {
    Done(T),
    /// Failed before any output reached the caller; try the next candidate.
    Retry(ProviderError),
    /// Stop here and surface this error.
    Abort(GatewayError),
}

/// Try `candidates` in order until one attempt is not a retry.
///
/// Returns [`GatewayError::AllProvidersFailed`] carrying the last provider
/// error when every candidate was retried.
pub(crate) async fn walk_candidates<'a, T, F, Fut>(
    candidates: &'a [ProviderRecord],
    operation: &'static str,
    mut attempt: F,
) -> GatewayResult<T>
where
    F: FnMut(&'a ProviderRecord) -> Fut,
    Fut: Future<Output = AttemptOutcome<T>>,
{
    let mut last_error = None;

    for (index, provider) in candidates.iter().enumerate() {
        match attempt(provider).await {
            AttemptOutcome::Done(value) => return Ok(value),
            AttemptOutcome::Abort(error) => return Err(error),
            AttemptOutcome::Retry(error) => {
                let remaining = candidates.len() - index - 1;
                tracing::warn!(
                    provider_id = %provider.id,
                    vendor = %provider.vendor,
                    operation,
                    remaining,
                    error = %error,
                    "Provider attempt failed"
                );
                if remaining > 0 {
                    metrics::record_fallback(&provider.id, operation);
                }
                last_error = Some(error);
            }
        }
    }

    match last_error {
        Some(last_error) => {
            tracing::error!(
                attempts = candidates.len(),
                operation,
                error = %last_error,
                "All providers failed"
            );
            Err(GatewayError::AllProvidersFailed {
                attempts: candidates.len(),
                last_error,
            })
        }
        None => Err(GatewayError::NoProviderConfigured),
    }
}
