//! Cosine similarity scoring.

use crate::core::embeddings::Embedding;
use crate::error::{AppError, Result};

/// Cosine similarity between two embeddings, clamped to `[0, 1]`.
///
/// # Errors
///
/// `DimensionMismatch` if the lengths differ or either embedding is empty.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Result<f32> {
    cosine_similarity_slices(a.as_slice(), b.as_slice())
}

/// Cosine similarity between two raw vectors, clamped to `[0, 1]`.
///
/// A zero-norm input scores `0`. So does any input that drives the result
/// to NaN or infinity.
pub fn cosine_similarity_slices(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() || a.is_empty() {
        return Err(AppError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    // f64 accumulation keeps large f32 components from overflowing.
    let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f64, 0.0f64, 0.0f64), |acc, (&x, &y)| {
        let (x, y) = (f64::from(x), f64::from(y));
        (acc.0 + x * y, acc.1 + x * x, acc.2 + y * y)
    });

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !similarity.is_finite() {
        log::warn!("Cosine similarity is not finite, scoring 0");
        return Ok(0.0);
    }
    if similarity < 0.0 {
        log::debug!("Negative cosine similarity {:.6} clamped to 0", similarity);
    }

    Ok(similarity.clamp(0.0, 1.0) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::embeddings::{embedding_for_tests, StorageTracker};

    #[test]
    fn test_cosine_similarity() {
        // Identical vectors
        let s = cosine_similarity_slices(&[1.0, 0.0, 0.0], &[1.0, 0.0, 0.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-6);

        // Orthogonal vectors
        let s = cosine_similarity_slices(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(s.abs() < 1e-6);

        // Opposite vectors are floored at zero
        let s = cosine_similarity_slices(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert_eq!(s, 0.0);
    }

    #[test]
    fn scale_invariant_and_symmetric() {
        let a = [0.3, 1.7, 2.2, 0.01];
        let b = [3.0, 0.2, 1.1, 4.0];
        let scaled: Vec<f32> = a.iter().map(|v| v * 1000.0).collect();

        let ab = cosine_similarity_slices(&a, &b).unwrap();
        let ba = cosine_similarity_slices(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((cosine_similarity_slices(&scaled, &b).unwrap() - ab).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_scores_zero() {
        assert_eq!(cosine_similarity_slices(&[0.0; 4], &[1.0, 2.0, 3.0, 4.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity_slices(&[1.0, 2.0], &[0.0, 0.0]).unwrap(), 0.0);
        assert_eq!(cosine_similarity_slices(&[0.0], &[0.0]).unwrap(), 0.0);
    }

    #[test]
    fn mismatched_or_empty_vectors_fail() {
        assert!(matches!(
            cosine_similarity_slices(&[1.0, 2.0], &[1.0]),
            Err(AppError::DimensionMismatch { left: 2, right: 1 })
        ));
        assert!(matches!(
            cosine_similarity_slices(&[], &[]),
            Err(AppError::DimensionMismatch { left: 0, right: 0 })
        ));
    }

    #[test]
    fn adversarial_inputs_stay_in_range() {
        let cases: Vec<(Vec<f32>, Vec<f32>)> = vec![
            (vec![f32::MAX, f32::MAX], vec![f32::MAX, f32::MAX]),
            (vec![f32::MIN_POSITIVE, 0.0], vec![f32::MIN_POSITIVE, 0.0]),
            (vec![1e-45, 1e-45], vec![1e-45, 1e-45]),
            (vec![f32::NAN, 1.0], vec![1.0, 1.0]),
            (vec![f32::INFINITY, 1.0], vec![1.0, 1.0]),
            (vec![-3.0, -4.0], vec![3.0, 4.0]),
            (vec![0.1, 0.2, 0.3], vec![0.1, 0.2, 0.3000001]),
        ];

        for (a, b) in cases {
            let s = cosine_similarity_slices(&a, &b).unwrap();
            assert!((0.0..=1.0).contains(&s), "{:?} vs {:?} scored {}", a, b, s);
        }

        let s = cosine_similarity_slices(&[f32::MAX, f32::MAX], &[f32::MAX, f32::MAX]).unwrap();
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn scores_embeddings() {
        let storage = StorageTracker::new();
        let a = embedding_for_tests(vec![1.0, 1.0], &storage);
        let b = embedding_for_tests(vec![1.0, 0.0], &storage);
        let s = cosine_similarity(&a, &b).unwrap();
        assert!((s - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }
}
