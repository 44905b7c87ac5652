/// Cosine of the angle between two embedding vectors, in [-1.0, 1.0].
///
/// Empty, length-mismatched or degenerate (near-zero magnitude) inputs all
/// score 0.0 rather than erroring, matching how the entropy filter treats a
/// missing embedding.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.is_empty() || a.len() != b.len() {
    return 0.0;
  }

  let mut dot = 0.0_f64;
  let mut norm_a = 0.0_f64;
  let mut norm_b = 0.0_f64;
  for i in 0..a.len() {
    let x = f64::from(a[i]);
    let y = f64::from(b[i]);
    dot += x * y;
    norm_a += x * x;
    norm_b += y * y;
  }

  let magnitude = (norm_a * norm_b).sqrt();
  if magnitude < 1e-24 {
    return 0.0;
  }
  (dot / magnitude) as f32
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identical_vectors_score_one() {
    let v = vec![0.3_f32, -0.4, 0.5];
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn opposite_vectors_score_minus_one() {
    let v = vec![0.6_f32, 0.8];
    let w = vec![-0.6_f32, -0.8];
    assert!((cosine_similarity(&v, &w) + 1.0).abs() < 1e-6);
  }

  #[test]
  fn orthogonal_vectors_score_zero() {
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
  }

  #[test]
  fn mismatched_lengths_score_zero() {
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
  }

  #[test]
  fn zero_magnitude_scores_zero() {
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
  }
}
