//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Empty or whitespace-only input text.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single provider attempt failed.
    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    /// Every provider in the chain was exhausted.
    #[error("all embedding providers failed: {}", attempts.join("; "))]
    AllProvidersFailed { attempts: Vec<String> },

    /// Provider not configured.
    #[error("embedding provider not configured: {0}")]
    ProviderNotConfigured(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Provider attempt exceeded its deadline.
    #[error("provider timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cache backend failure.
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Snapshot could not be decoded.
    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Build a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the same call could succeed.
    ///
    /// Validation failures never become valid on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput(_)
                | Self::DimensionMismatch { .. }
                | Self::AllProvidersFailed { .. }
                | Self::ProviderNotConfigured(_)
                | Self::Config(_)
                | Self::ConfigParse(_)
        )
    }
}
