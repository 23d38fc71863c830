//! Euclidean distance for vector similarity.
//!
//! Indexes compare candidates with the squared form (no sqrt) and only take
//! the root when reporting a distance to the caller. Since sqrt is monotonic
//! on non-negative inputs, both forms order candidates identically.
//!
//! Both functions are written to be auto-vectorized by the compiler in
//! release builds.

/// Compute Euclidean (L2) distance between two vectors.
///
/// Returns sqrt(sum((a[i] - b[i])^2)).
///
/// # Example
///
/// ```
/// use nori_vector::euclidean_distance;
///
/// let a = [1.0, 2.0, 3.0];
/// let b = [4.0, 5.0, 6.0];
/// let dist = euclidean_distance(&a, &b);
/// assert!((dist - 5.196).abs() < 0.01); // sqrt(27)
/// ```
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_distance_squared(a, b).sqrt()
}

/// Compute squared Euclidean distance (avoids sqrt for comparisons).
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    // Process in chunks of 4 for better auto-vectorization
    let mut sum = 0.0f32;
    let chunks = a.len() / 4;

    for i in 0..chunks {
        let base = i * 4;
        let d0 = a[base] - b[base];
        let d1 = a[base + 1] - b[base + 1];
        let d2 = a[base + 2] - b[base + 2];
        let d3 = a[base + 3] - b[base + 3];
        sum += d0 * d0 + d1 * d1 + d2 * d2 + d3 * d3;
    }

    for i in (chunks * 4)..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }

    sum
}
