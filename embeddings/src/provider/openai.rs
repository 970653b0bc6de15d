//! OpenAI-compatible embeddings endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::EmbeddingProvider;
use crate::Embedding;
use crate::error::{EmbeddingError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// OpenAI embedding provider.
///
/// Works against any server exposing `POST {base_url}/embeddings` with the
/// OpenAI request and response shape. The configured dimension is sent as
/// the `dimensions` parameter so models that support shortening return
/// vectors of the cache's size.
pub struct OpenAIProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model to request.
    model: String,

    /// Requested output dimension.
    dimension: usize,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            model: DEFAULT_MODEL.to_string(),
            dimension,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbeddingError::ProviderNotConfigured(self.name().to_string()))?;

        debug!("Generating embedding with model: {}", self.model);

        let body = serde_json::json!({
            "input": text,
            "model": self.model,
            "dimensions": self.dimension,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::provider(
                self.name(),
                format!("API error {status}: {error_text}"),
            ));
        }

        let result: OpenAIEmbeddingResponse = response.json().await?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding in response".to_string()))
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}
