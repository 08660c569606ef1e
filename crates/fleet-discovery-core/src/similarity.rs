//! Vector similarity primitives shared by clustering, scoring and the baseline.
//!
//! All functions return finite values: zero-magnitude or mismatched inputs
//! score 0.0 similarity instead of producing NaN.

/// Raw cosine similarity in [-1.0, 1.0].
///
/// Returns 0.0 for empty, mismatched or zero-magnitude vectors.
///
/// # Example
///
/// ```
/// use fleet_discovery_core::similarity::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a_sq = 0.0f64;
    let mut mag_b_sq = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        mag_a_sq += x * x;
        mag_b_sq += y * y;
    }

    if mag_a_sq == 0.0 || mag_b_sq == 0.0 {
        return 0.0;
    }

    let sim = dot / (mag_a_sq.sqrt() * mag_b_sq.sqrt());
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Cosine distance `1 - cos`, in [0.0, 2.0].
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Element-wise mean of equally sized vectors.
///
/// Vectors whose length differs from the first are skipped. Empty input
/// yields an empty vector.
pub fn mean_vector<'a, I>(vectors: I) -> Vec<f32>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum: Vec<f64> = Vec::new();
    let mut count = 0usize;
    for v in vectors {
        if count == 0 {
            sum = vec![0.0; v.len()];
        } else if v.len() != sum.len() {
            continue;
        }
        for (s, &x) in sum.iter_mut().zip(v.iter()) {
            *s += f64::from(x);
        }
        count += 1;
    }

    if count == 0 {
        return Vec::new();
    }
    sum.into_iter().map(|s| (s / count as f64) as f32).collect()
}
