//! Similarity computation and ranking for embeddings.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::vector::{dot_product, magnitude};

/// Compute the cosine similarity between two embeddings.
///
/// The score is clamped to `[0.0, 1.0]`: anti-correlated vectors rank the
/// same as orthogonal ones. A zero-magnitude input yields exactly `0.0`, as
/// does any input with non-finite components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let dot = dot_product(a, b)?;
    let magnitude_a = magnitude(a);
    let magnitude_b = magnitude(b);

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return Ok(0.0);
    }

    let score = dot / (magnitude_a * magnitude_b);
    if !score.is_finite() {
        return Ok(0.0);
    }
    Ok(score.clamp(0.0, 1.0) as f32)
}

/// A candidate vector to rank against a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Caller-supplied identifier (file path, chunk id, ...).
    pub id: String,

    /// The candidate embedding.
    pub embedding: Embedding,

    /// Opaque metadata carried through to the result.
    pub metadata: Option<serde_json::Value>,
}

impl Candidate {
    /// Create a new candidate.
    pub fn new(id: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            id: id.into(),
            embedding,
            metadata: None,
        }
    }

    /// Attach metadata to the candidate.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A ranked similarity search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// ID of the matched item.
    pub id: String,

    /// Similarity score.
    pub score: f32,

    /// 1-based position in the ranking.
    pub rank: usize,

    /// Additional metadata.
    pub metadata: Option<serde_json::Value>,
}

/// Rank `candidates` by cosine similarity to `query`.
///
/// Sorting is stable, so equal scores keep the order in which the candidates
/// were given. At most `limit` results are returned.
pub fn find_similar(
    query: &[f32],
    candidates: &[Candidate],
    limit: usize,
) -> Result<Vec<SimilarityResult>> {
    let mut scores: Vec<(OrderedFloat<f32>, &Candidate)> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        if candidate.embedding.len() != query.len() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: query.len(),
                actual: candidate.embedding.len(),
            });
        }
        let score = cosine_similarity(query, &candidate.embedding)?;
        scores.push((OrderedFloat(score), candidate));
    }

    // Sort by score descending
    scores.sort_by_key(|(score, _)| Reverse(*score));

    let results = scores
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (score, candidate))| SimilarityResult {
            id: candidate.id.clone(),
            score: score.0,
            rank: i + 1,
            metadata: candidate.metadata.clone(),
        })
        .collect();

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite_clamps_to_zero() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
    }

    #[test]
    fn test_cosine_similarity_symmetric() {
        let a = vec![0.3, 0.9, 0.1, 0.4];
        let b = vec![0.8, 0.2, 0.5, 0.05];
        assert_eq!(
            cosine_similarity(&a, &b).unwrap(),
            cosine_similarity(&b, &a).unwrap()
        );
    }

    #[test]
    fn test_zero_vector_is_exactly_zero() {
        let zero = vec![0.0; 384];
        let other = vec![0.5; 384];
        assert_eq!(cosine_similarity(&zero, &other).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&zero, &zero).unwrap(), 0.0);
    }

    #[test]
    fn test_self_similarity_with_extreme_magnitudes() {
        let large = vec![1e20; 4];
        let tiny = vec![1e-30; 4];
        assert!((cosine_similarity(&large, &large).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&tiny, &tiny).unwrap() - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&large, &tiny).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_input_scores_zero() {
        let a = vec![f32::INFINITY, 1.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b).unwrap(), 0.0);
        assert_eq!(cosine_similarity(&[f32::NAN, 1.0], &b).unwrap(), 0.0);
    }

    #[test]
    fn test_find_similar_never_ranks_non_finite_first() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            Candidate::new("broken", vec![f32::NAN, 0.0]),
            Candidate::new("good", vec![1.0, 0.0]),
        ];
        let results = find_similar(&query, &candidates, 2).unwrap();
        assert_eq!(results[0].id, "good");
        assert_eq!(results[1].score, 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = vec![0.1; 384];
        let b = vec![0.1; 256];
        assert!(matches!(
            cosine_similarity(&a, &b),
            Err(EmbeddingError::DimensionMismatch {
                expected: 384,
                actual: 256
            })
        ));
    }

    #[test]
    fn test_find_similar_ranks_and_truncates() {
        let query = vec![1.0, 0.0, 0.0];
        let candidates = vec![
            Candidate::new("a", vec![1.0, 0.0, 0.0]), // similarity 1.0
            Candidate::new("b", vec![0.0, 1.0, 0.0]), // similarity 0.0
            Candidate::new("c", vec![0.7, 0.7, 0.0]), // similarity ~0.7
        ];

        let results = find_similar(&query, &candidates, 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].id, "c");
        assert_eq!(results[1].rank, 2);
    }

    #[test]
    fn test_find_similar_ties_keep_input_order() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            Candidate::new("first", vec![2.0, 0.0]),
            Candidate::new("second", vec![1.0, 0.0]),
            Candidate::new("third", vec![5.0, 0.0]),
        ];

        let ids: Vec<String> = find_similar(&query, &candidates, 10)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_find_similar_carries_metadata() {
        let query = vec![1.0, 0.0];
        let candidates = vec![
            Candidate::new("src/lib.rs#12", vec![1.0, 0.0])
                .with_metadata(serde_json::json!({"line": 12})),
        ];
        let results = find_similar(&query, &candidates, 1).unwrap();
        assert_eq!(results[0].metadata, Some(serde_json::json!({"line": 12})));
    }

    #[test]
    fn test_find_similar_rejects_mismatched_candidate() {
        let query = vec![1.0, 0.0];
        let candidates = vec![Candidate::new("bad", vec![1.0, 0.0, 0.0])];
        assert!(find_similar(&query, &candidates, 1).is_err());
    }
}
