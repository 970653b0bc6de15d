//! Deterministic last-resort embeddings.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::vector::normalize;

/// Provider name reported for fallback vectors.
pub const FALLBACK_PROVIDER: &str = "hash-fallback";

/// Model identifier stored with fallback vectors.
pub const FALLBACK_MODEL: &str = "hash-fallback-v1";

const TRIGRAM_WEIGHT: f32 = 0.5;

/// Feature-hashing embedder that needs no network.
///
/// Words (identifiers split on any non-alphanumeric character) and their
/// character trigrams are hashed into signed buckets and the result is
/// L2-normalized. Texts sharing words land close to each other, which keeps
/// ranking usable, but the vectors carry no semantic information and are
/// flagged as degraded.
#[derive(Debug, Clone)]
pub struct HashFallbackProvider {
    dimension: usize,
}

impl HashFallbackProvider {
    /// Create a fallback producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(index_bytes) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }

    /// Compute the vector for `text`. Never fails for non-blank input.
    pub fn embed_text(&self, text: &str) -> Result<Embedding> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }

        let lowered = trimmed.to_lowercase();
        let mut tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            // Pure punctuation: use the whole string as one feature.
            tokens.push(&lowered);
        }

        let mut vector = vec![0.0f32; self.dimension];
        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;

            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let (index, sign) = self.bucket(&format!("#{trigram}"));
                vector[index] += sign * TRIGRAM_WEIGHT;
            }
        }

        if vector.iter().all(|x| *x == 0.0) {
            // Every feature cancelled out; fall back to a single bucket.
            let (index, _) = self.bucket(&lowered);
            vector[index] = 1.0;
        }

        normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingProvider for HashFallbackProvider {
    fn name(&self) -> &str {
        FALLBACK_PROVIDER
    }

    fn model(&self) -> &str {
        FALLBACK_MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_degraded(&self) -> bool {
        true
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.embed_text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use crate::vector::magnitude;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deterministic_and_normalized() {
        let provider = HashFallbackProvider::new(384);
        let a = provider.embed_text("fn parse_config(path: &Path)").unwrap();
        let b = provider.embed_text("fn parse_config(path: &Path)").unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 384);
        assert!((magnitude(&a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_identifiers_score_higher() {
        let provider = HashFallbackProvider::new(384);
        let query = provider.embed_text("parse config file").unwrap();
        let related = provider.embed_text("fn parse_config_file() {}").unwrap();
        let unrelated = provider.embed_text("render button widget").unwrap();

        let related_score = cosine_similarity(&query, &related).unwrap();
        let unrelated_score = cosine_similarity(&query, &unrelated).unwrap();
        assert!(related_score > unrelated_score);
    }

    #[test]
    fn test_punctuation_only_still_embeds() {
        let provider = HashFallbackProvider::new(16);
        let v = provider.embed_text("+++ --- ***").unwrap();
        assert!(magnitude(&v) > 0.0);
    }

    #[test]
    fn test_blank_input_rejected() {
        let provider = HashFallbackProvider::new(16);
        assert!(provider.embed_text("   \n\t").is_err());
    }
}
