use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use courier_core::{CourierError, Result};

use crate::provider::{Credentials, Provider, ProviderRequest, ProviderResponse};

#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base: Duration,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Policy layer over a [`Provider`]: enforced per-call timeout, bounded
/// retry with exponential backoff for transient failures, and strict
/// propagation of cancellation.
pub struct ProviderGateway {
    provider: Arc<dyn Provider>,
    options: GatewayOptions,
}

impl ProviderGateway {
    pub fn new(provider: Arc<dyn Provider>, options: GatewayOptions) -> Self {
        Self { provider, options }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Run one completion. Credentials are scoped to this call.
    ///
    /// Cancellation wins over everything and is returned as
    /// [`CourierError::Cancelled`], never converted into content. Transient
    /// failures retry up to the attempt bound; anything else surfaces
    /// immediately as a recoverable error.
    pub async fn complete(
        &self,
        request: &ProviderRequest,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(CourierError::Cancelled),
                r = tokio::time::timeout(
                    self.options.timeout,
                    self.provider.complete(request, credentials),
                ) => match r {
                    Ok(inner) => inner,
                    Err(_) => Err(CourierError::ProviderTimeout {
                        timeout_secs: self.options.timeout.as_secs(),
                    }),
                },
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_cancellation() => return Err(e),
                Err(e) if e.is_transient() && attempt < self.options.max_attempts => {
                    let delay = match &e {
                        CourierError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs)
                        }
                        _ => self.options.backoff_base * 2u32.pow(attempt - 1),
                    };
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient provider failure, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(CourierError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
