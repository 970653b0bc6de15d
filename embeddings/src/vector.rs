//! Vector utilities and the on-disk vector encoding.
//!
//! Vectors are stored as raw little-endian `f32` values, `dimension * 4`
//! bytes, with no header. Decoding is the exact inverse of encoding.

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Encode a vector as little-endian `f32` bytes.
pub fn to_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian `f32` bytes produced by [`to_bytes`].
pub fn from_bytes(bytes: &[u8]) -> Result<Embedding> {
    if bytes.len() % 4 != 0 {
        return Err(EmbeddingError::Snapshot(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Dot product of two equal-length vectors, accumulated in `f64`.
pub fn dot_product(a: &[f32], b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum())
}

/// Euclidean length of a vector, accumulated in `f64` so large or tiny
/// components neither overflow nor underflow.
pub fn magnitude(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

/// Normalize a vector to unit length. Zero vectors are left untouched.
pub fn normalize(embedding: &mut [f32]) {
    let magnitude = magnitude(embedding);
    if magnitude > 0.0 {
        for x in embedding.iter_mut() {
            *x = (f64::from(*x) / magnitude) as f32;
        }
    }
}

/// Check that a provider returned a usable vector of the expected size.
pub fn validate(vector: &[f32], expected: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(EmbeddingError::InvalidResponse(
            "empty embedding payload".to_string(),
        ));
    }
    if vector.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingError::InvalidResponse(
            "embedding contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bytes_round_trip_is_bit_exact() {
        let v = vec![0.1f32, -0.0, f32::MIN_POSITIVE, 1.0e-38, -123.456, f32::MAX];
        let bytes = to_bytes(&v);
        assert_eq!(bytes.len(), v.len() * 4);

        let decoded = from_bytes(&bytes).unwrap();
        let original_bits: Vec<u32> = v.iter().map(|x| x.to_bits()).collect();
        let decoded_bits: Vec<u32> = decoded.iter().map(|x| x.to_bits()).collect();
        assert_eq!(original_bits, decoded_bits);
    }

    #[test]
    fn test_bytes_are_little_endian() {
        assert_eq!(to_bytes(&[1.0]), vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_from_bytes_rejects_truncated_blob() {
        assert!(from_bytes(&[0, 0, 128]).is_err());
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_extreme_components_do_not_overflow() {
        let dot = dot_product(&[1e20; 4], &[1e20; 4]).unwrap();
        assert!(dot.is_finite());
        assert!((dot / 4e40 - 1.0).abs() < 1e-6);

        let tiny = magnitude(&[1e-30; 4]);
        assert!(tiny > 0.0);
        assert!((tiny / 2e-30 - 1.0).abs() < 1e-6);

        let mut v = vec![3e30, 4e30];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_validate() {
        assert!(validate(&[0.5, 0.5], 2).is_ok());
        assert!(validate(&[], 2).is_err());
        assert!(matches!(
            validate(&[0.5], 2),
            Err(EmbeddingError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(validate(&[0.5, f32::NAN], 2).is_err());
    }
}
