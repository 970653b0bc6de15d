//! Hugging Face feature-extraction provider.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::EmbeddingProvider;
use crate::Embedding;
use crate::error::{EmbeddingError, Result};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
const DEFAULT_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Provider for `POST {base_url}/pipeline/feature-extraction/{model}`.
///
/// Sentence-transformer models answer with a flat vector. Token-level
/// models answer with one row per token; those rows are mean-pooled.
pub struct HuggingFaceProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    model: String,
    dimension: usize,
}

impl HuggingFaceProvider {
    /// Create a new provider producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::new(),
            model: DEFAULT_MODEL.to_string(),
            dimension,
        }
    }

    /// Set the API token.
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

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Flat(Vec<f32>),
    Rows(Vec<Vec<f32>>),
    Batched(Vec<Vec<Vec<f32>>>),
}

impl FeatureExtractionResponse {
    fn into_embedding(self) -> Result<Embedding> {
        match self {
            Self::Flat(v) => Ok(v),
            Self::Rows(rows) => mean_pool(rows),
            Self::Batched(batch) => {
                let rows = batch.into_iter().next().ok_or_else(|| {
                    EmbeddingError::InvalidResponse("empty batch in response".to_string())
                })?;
                mean_pool(rows)
            }
        }
    }
}

fn mean_pool(rows: Vec<Vec<f32>>) -> Result<Embedding> {
    let mut rows = rows.into_iter();
    let mut pooled = rows
        .next()
        .ok_or_else(|| EmbeddingError::InvalidResponse("no rows in response".to_string()))?;
    let mut n = 1.0f32;

    for row in rows {
        if row.len() != pooled.len() {
            return Err(EmbeddingError::InvalidResponse(
                "ragged token embeddings".to_string(),
            ));
        }
        for (acc, x) in pooled.iter_mut().zip(row) {
            *acc += x;
        }
        n += 1.0;
    }

    for x in pooled.iter_mut() {
        *x /= n;
    }
    Ok(pooled)
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceProvider {
    fn name(&self) -> &str {
        "huggingface"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        debug!("Generating embedding with model: {}", self.model);

        let mut request = self
            .client
            .post(format!(
                "{}/pipeline/feature-extraction/{}",
                self.base_url, self.model
            ))
            .json(&serde_json::json!({
                "inputs": text,
                "options": {"wait_for_model": true},
            }));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(EmbeddingError::RateLimited {
                retry_after_secs: 60,
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

        response
            .json::<FeatureExtractionResponse>()
            .await?
            .into_embedding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_flat_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline/feature-extraction/test/model"))
            .and(body_partial_json(serde_json::json!({"inputs": "struct Foo;"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([0.5, 0.25])))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(2)
            .with_base_url(server.uri())
            .with_model("test/model");

        assert_eq!(provider.embed("struct Foo;").await.unwrap(), vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_token_rows_are_mean_pooled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([[1.0, 0.0], [0.0, 1.0]])),
            )
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(2).with_base_url(server.uri());
        assert_eq!(provider.embed("a b").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("loading"))
            .mount(&server)
            .await;

        let provider = HuggingFaceProvider::new(2).with_base_url(server.uri());
        assert!(matches!(
            provider.embed("x").await,
            Err(EmbeddingError::Provider { .. })
        ));
    }

    #[test]
    fn test_mean_pool_rejects_ragged_rows() {
        assert!(mean_pool(vec![vec![1.0, 2.0], vec![1.0]]).is_err());
        assert!(mean_pool(Vec::new()).is_err());
    }
}
