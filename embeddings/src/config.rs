//! Configuration for the embedding service.
//!
//! Every field has a default, so a TOML file only needs to name what it
//! changes:
//!
//! ```toml
//! dimension = 384
//! fallback_enabled = true
//!
//! [primary]
//! kind = "openai"
//! model = "text-embedding-3-small"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [secondary]
//! kind = "huggingface"
//! model = "sentence-transformers/all-MiniLM-L6-v2"
//!
//! [cache]
//! ttl_ms = 604800000
//! max_entries = 10000
//! path = "/var/cache/prism/embeddings.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_DIMENSION;
use crate::cache::EvictionPolicy;
use crate::chain::RetryPolicy;
use crate::error::{EmbeddingError, Result};

/// Top-level configuration for [`crate::EmbeddingService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier for the primary provider when it does not name one.
    pub model: Option<String>,

    /// Vector length every provider must produce.
    pub dimension: usize,

    /// First provider to try.
    pub primary: Option<ProviderConfig>,

    /// Provider tried after the primary is exhausted.
    pub secondary: Option<ProviderConfig>,

    /// Cache retention settings.
    pub cache: CacheConfig,

    /// Per-provider retry settings.
    pub retry: RetryConfig,

    /// Texts per batch group.
    pub batch_size: usize,

    /// In-flight requests allowed within a batch group.
    pub max_concurrency: usize,

    /// Whether generation events are appended to the event log.
    pub metrics_enabled: bool,

    /// Whether the deterministic hash fallback ends the provider chain.
    pub fallback_enabled: bool,
}

impl EmbeddingConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml_str(&content)
    }

    /// Set the primary provider.
    pub fn with_primary(mut self, provider: ProviderConfig) -> Self {
        self.primary = Some(provider);
        self
    }

    /// Set the secondary provider.
    pub fn with_secondary(mut self, provider: ProviderConfig) -> Self {
        self.secondary = Some(provider);
        self
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable the hash fallback.
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    /// Check values that would make the service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::Config("batch_size must be positive".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(EmbeddingError::Config(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(EmbeddingError::Config(
                "cache.max_entries must be positive".to_string(),
            ));
        }
        if self.cache.eviction_headroom > self.cache.max_entries {
            return Err(EmbeddingError::Config(format!(
                "cache.eviction_headroom ({}) exceeds cache.max_entries ({})",
                self.cache.eviction_headroom, self.cache.max_entries
            )));
        }
        if self.retry.max_retries == 0 {
            return Err(EmbeddingError::Config(
                "retry.max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry.timeout_ms == 0 {
            return Err(EmbeddingError::Config(
                "retry.timeout_ms must be positive".to_string(),
            ));
        }
        if self.primary.is_none() && self.secondary.is_none() && !self.fallback_enabled {
            return Err(EmbeddingError::Config(
                "no embedding provider configured and fallback disabled".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: None,
            dimension: DEFAULT_DIMENSION,
            primary: None,
            secondary: None,
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            batch_size: 10,
            max_concurrency: 5,
            metrics_enabled: true,
            fallback_enabled: true,
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAI,
    /// Hugging Face feature-extraction pipeline.
    #[serde(rename = "huggingface")]
    HuggingFace,
}

/// Endpoint and credentials for one network provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,

    /// Base URL; the provider's public endpoint when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    /// Inline API key. Prefer `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl ProviderConfig {
    /// Create a provider entry with defaults for `kind`.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            base_url: None,
            model: None,
            api_key: None,
            api_key_env: None,
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set an inline API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// The inline key, else the value of `api_key_env`.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.is_empty())
        })
    }
}

/// Cache retention and storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entry age in milliseconds.
    pub ttl_ms: u64,

    /// Maximum number of entries.
    pub max_entries: usize,

    /// Extra entries freed whenever eviction runs.
    pub eviction_headroom: usize,

    /// Snapshot file for a durable cache; in-memory when unset.
    pub path: Option<PathBuf>,
}

impl CacheConfig {
    /// Retention policy derived from these settings.
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            max_entries: self.max_entries,
            headroom: self.eviction_headroom,
            ttl: Duration::from_millis(self.ttl_ms),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let policy = EvictionPolicy::default();
        Self {
            ttl_ms: u64::try_from(policy.ttl.as_millis()).unwrap_or(u64::MAX),
            max_entries: policy.max_entries,
            eviction_headroom: policy.headroom,
            path: None,
        }
    }
}

/// Per-provider retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub backoff_base_ms: u64,
}

impl RetryConfig {
    /// Retry policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            timeout: Duration::from_millis(self.timeout_ms),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_ms: 30_000,
            backoff_base_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = EmbeddingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dimension, 384);
        assert_eq!(config.retry.retry_policy(), RetryPolicy::default());
        assert_eq!(config.cache.eviction_policy(), EvictionPolicy::default());
    }

    #[test]
    fn test_parse_toml() {
        let config = EmbeddingConfig::from_toml_str(
            r#"
            batch_size = 4
            fallback_enabled = false

            [primary]
            kind = "openai"
            model = "text-embedding-3-small"
            api_key = "sk-inline"

            [secondary]
            kind = "huggingface"
            base_url = "http://localhost:8080"

            [cache]
            max_entries = 50
            eviction_headroom = 5

            [retry]
            max_retries = 2
            timeout_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 4);
        assert!(!config.fallback_enabled);
        let primary = config.primary.unwrap();
        assert_eq!(primary.kind, ProviderKind::OpenAI);
        assert_eq!(primary.resolve_api_key(), Some("sk-inline".to_string()));
        assert_eq!(config.secondary.unwrap().kind, ProviderKind::HuggingFace);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.ttl_ms, CacheConfig::default().ttl_ms);
        assert_eq!(config.retry.backoff_base_ms, 1_000);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EmbeddingConfig::from_toml_str("batch_size = 0").is_err());
        assert!(
            EmbeddingConfig::from_toml_str("[cache]\nmax_entries = 10\neviction_headroom = 11")
                .is_err()
        );
        assert!(EmbeddingConfig::from_toml_str("fallback_enabled = false").is_err());
        assert!(matches!(
            EmbeddingConfig::from_toml_str("dimension = \"big\""),
            Err(EmbeddingError::ConfigParse(_))
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("embeddings.toml");
        tokio::fs::write(&path, "max_concurrency = 2\n").await.unwrap();

        let config = EmbeddingConfig::load(&path).await.unwrap();
        assert_eq!(config.max_concurrency, 2);
    }
}
