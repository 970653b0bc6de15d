//! Ordered provider fallback with retry and backoff.
//!
//! ```text
//! TRY_PRIMARY ──ok──► DONE
//!     │ exhausted
//!     ▼
//! TRY_SECONDARY ──ok──► DONE
//!     │ exhausted
//!     ▼
//! TRY_FALLBACK ──ok──► DONE
//!     │ disabled / failed
//!     ▼
//!   FAILED (AllProvidersFailed)
//! ```
//!
//! One driver loop walks the providers in order. Each provider gets up to
//! `max_retries` attempts, each bounded by `timeout`, with an exponential
//! pause between attempts. Once a provider is exhausted the chain moves on
//! and never returns to it for the same request.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::metrics::EmbeddingMetrics;
use crate::provider::{EmbeddingProvider, HashFallbackProvider};
use crate::vector;

/// Retry settings applied to every provider in a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per provider (at least one is always made).
    pub max_retries: u32,

    /// Deadline for a single attempt.
    pub timeout: Duration,

    /// Pause after the first failed attempt; doubles after each further one.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }

    /// Pause after attempt `attempt` failed with `error`.
    ///
    /// A rate limit stretches the exponential backoff to the server's
    /// `retry-after`, capped at [`MAX_RATE_LIMIT_WAIT`].
    pub fn pause_after(&self, attempt: u32, error: &EmbeddingError) -> Duration {
        let backoff = self.backoff(attempt);
        match error {
            EmbeddingError::RateLimited { retry_after_secs } => {
                backoff.max(Duration::from_secs(*retry_after_secs).min(MAX_RATE_LIMIT_WAIT))
            }
            _ => backoff,
        }
    }
}

/// Longest pause honored from a provider's `retry-after`.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// A vector produced by one of the chain's providers.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub embedding: Embedding,
    pub provider: String,
    pub model: String,
    pub degraded: bool,
    /// Failed attempts across all providers before this result.
    pub failed_attempts: usize,
}

/// Ordered list of providers tried until one succeeds.
pub struct ProviderChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    retry: RetryPolicy,
    dimension: usize,
    metrics: Option<Arc<EmbeddingMetrics>>,
}

impl ProviderChain {
    /// Create an empty chain expecting `dimension`-sized vectors.
    pub fn new(dimension: usize, retry: RetryPolicy) -> Self {
        Self {
            providers: Vec::new(),
            retry,
            dimension,
            metrics: None,
        }
    }

    /// Append a provider; earlier providers are tried first.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Append the deterministic hash fallback as the last resort.
    pub fn with_fallback(self) -> Self {
        let dimension = self.dimension;
        self.with_provider(Arc::new(HashFallbackProvider::new(dimension)))
    }

    /// Count failed attempts per provider into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<EmbeddingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Names of the providers in order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Expected vector length.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Generate an embedding, walking the chain until a provider succeeds.
    pub async fn generate(&self, text: &str) -> Result<ChainOutput> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        let mut attempts = Vec::new();
        let mut failed_attempts = 0;

        for provider in &self.providers {
            if !provider.is_available() {
                debug!("Skipping unavailable provider {}", provider.name());
                attempts.push(format!("{}: not configured", provider.name()));
                continue;
            }

            match self.try_provider(provider.as_ref(), &mut failed_attempts, text).await {
                Ok(embedding) => {
                    if provider.is_degraded() {
                        info!("Using degraded {} embedding", provider.name());
                    }
                    return Ok(ChainOutput {
                        embedding,
                        provider: provider.name().to_string(),
                        model: provider.model().to_string(),
                        degraded: provider.is_degraded(),
                        failed_attempts,
                    });
                }
                Err(e) => {
                    warn!("Embedding provider {} exhausted, moving on: {e}", provider.name());
                    attempts.push(format!("{}: {e}", provider.name()));
                }
            }
        }

        Err(EmbeddingError::AllProvidersFailed { attempts })
    }

    async fn try_provider(
        &self,
        provider: &dyn EmbeddingProvider,
        failed_attempts: &mut usize,
        text: &str,
    ) -> Result<Embedding> {
        let max_attempts = self.retry.max_retries.max(1);
        let timeout_ms = u64::try_from(self.retry.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            // Dropping the timed-out future cancels the in-flight request.
            let result = match timeout(self.retry.timeout, provider.embed(text)).await {
                Ok(Ok(embedding)) => vector::validate(&embedding, self.dimension)
                    .map(|()| embedding)
                    .map_err(|e| {
                        EmbeddingError::provider(provider.name(), format!("malformed response: {e}"))
                    }),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(EmbeddingError::Timeout { timeout_ms }),
            };

            match result {
                Ok(embedding) => return Ok(embedding),
                Err(e) => {
                    *failed_attempts += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_error(provider.name());
                    }
                    debug!(
                        "Attempt {}/{max_attempts} with {} failed: {e}",
                        attempt + 1,
                        provider.name()
                    );
                    if !e.is_retryable() {
                        last_error = Some(e);
                        break;
                    }
                    if attempt + 1 < max_attempts {
                        sleep(self.retry.pause_after(attempt, &e)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| EmbeddingError::provider(provider.name(), "no attempt was made")))
    }
}
