//! Embedding providers.
//!
//! Every strategy that turns text into a vector implements
//! [`EmbeddingProvider`]. Two network providers are included (an
//! OpenAI-compatible `/embeddings` endpoint and the Hugging Face
//! feature-extraction pipeline) plus a local, deterministic fallback used to
//! keep the pipeline alive when every remote provider is down.

mod fallback;
mod huggingface;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::Embedding;
use crate::config::{ProviderConfig, ProviderKind};
use crate::error::Result;

pub use fallback::{FALLBACK_MODEL, FALLBACK_PROVIDER, HashFallbackProvider};
pub use huggingface::HuggingFaceProvider;
pub use openai::OpenAIProvider;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Model identifier recorded alongside produced vectors.
    fn model(&self) -> &str;

    /// Length of the vectors this provider returns.
    fn dimension(&self) -> usize;

    /// Whether results are a lower-quality stand-in for semantic vectors.
    fn is_degraded(&self) -> bool {
        false
    }

    /// Check if the provider is usable (API key set, etc.).
    fn is_available(&self) -> bool {
        true
    }

    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Embedding>;
}

/// Build a network provider from its configuration.
pub fn build_provider(
    config: &ProviderConfig,
    default_model: Option<&str>,
    dimension: usize,
) -> Arc<dyn EmbeddingProvider> {
    let model = config.model.as_deref().or(default_model);
    let api_key = config.resolve_api_key();

    match config.kind {
        ProviderKind::OpenAI => {
            let mut provider = OpenAIProvider::new(dimension);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            if let Some(key) = api_key {
                provider = provider.with_api_key(key);
            }
            Arc::new(provider)
        }
        ProviderKind::HuggingFace => {
            let mut provider = HuggingFaceProvider::new(dimension);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = model {
                provider = provider.with_model(model);
            }
            if let Some(key) = api_key {
                provider = provider.with_api_key(key);
            }
            Arc::new(provider)
        }
    }
}
