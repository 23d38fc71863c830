//! Vector primitives for NoriKV's approximate nearest neighbor indexes.
//!
//! This crate holds the pieces every index implementation shares:
//!
//! - **Distance**: Euclidean (L2) distance, plus the squared form used for
//!   ordering comparisons on hot paths
//! - **Identifiers**: sequential [`VectorId`]s and the reserved
//!   [`INVALID_VECTOR_ID`] sentinel
//! - **VectorIndex trait**: the append-and-search contract of an index
//! - **Validation**: dimension and finiteness checks applied before any
//!   mutation or search
//!
//! # Example
//!
//! ```
//! use nori_vector::{euclidean_distance, validate_vector, VectorMatch};
//!
//! let a = [0.0, 0.0, 0.0];
//! let b = [3.0, 4.0, 0.0];
//! assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
//!
//! assert!(validate_vector(3, &b).is_ok());
//! assert!(validate_vector(2, &b).is_err());
//!
//! let mut hits = vec![VectorMatch::new(7, 1.0), VectorMatch::new(2, 0.5)];
//! hits.sort();
//! assert_eq!(hits[0].id, 2);
//! ```

mod distance;
mod traits;

pub use distance::{euclidean_distance, euclidean_distance_squared};
pub use traits::{VectorIndex, VectorMatch};

/// Sequential identifier assigned to a vector on insertion (0, 1, 2, ...).
pub type VectorId = u64;

/// Reserved identifier that is never assigned to a stored vector.
///
/// Sentinel-style callers return it to signal a failed insertion.
pub const INVALID_VECTOR_ID: VectorId = u64::MAX;

/// Error type for vector operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector: {0}")]
    InvalidVector(String),
}

/// Result type for vector operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Check that `vector` has exactly `dimensions` components, all finite.
///
/// NaN or infinite components would make distance ordering meaningless,
/// so they are rejected up front.
pub fn validate_vector(dimensions: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dimensions {
        return Err(VectorError::DimensionMismatch {
            expected: dimensions,
            actual: vector.len(),
        });
    }

    for (i, &v) in vector.iter().enumerate() {
        if v.is_nan() {
            return Err(VectorError::InvalidVector(format!("NaN at index {}", i)));
        }
        if v.is_infinite() {
            return Err(VectorError::InvalidVector(format!("Inf at index {}", i)));
        }
    }

    Ok(())
}
