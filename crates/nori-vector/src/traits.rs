//! Core traits for vector indices.
//!
//! The `VectorIndex` trait is the append-only contract shared by index
//! implementations: vectors receive sequential ids on insertion and can be
//! searched but never updated or removed.

use crate::VectorId;

/// A match returned from vector search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorMatch {
    /// The vector ID.
    pub id: VectorId,
    /// Euclidean distance to the query (lower = more similar).
    pub distance: f32,
}

impl VectorMatch {
    /// Create a new vector match.
    pub fn new(id: VectorId, distance: f32) -> Self {
        Self { id, distance }
    }
}

impl Eq for VectorMatch {}

impl PartialOrd for VectorMatch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VectorMatch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Distance ascending, ties broken by id so result lists are deterministic
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Common interface for append-only vector indices.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. Searches may run concurrently with
/// each other; insertions are serialized internally by each implementation.
pub trait VectorIndex: Send + Sync {
    /// The error type returned by fallible operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append a vector, returning its sequential id.
    ///
    /// # Errors
    ///
    /// Returns an error (and leaves the index untouched) if:
    /// - The vector dimension doesn't match the index dimension
    /// - The vector contains invalid values (NaN, Inf)
    fn add(&self, vector: &[f32]) -> Result<VectorId, Self::Error>;

    /// Search for the k nearest neighbors to the query vector.
    ///
    /// Returns at most `min(k, len())` matches sorted by ascending distance.
    /// An empty index yields an empty list, not an error.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>, Self::Error>;

    /// Get the number of vectors in the index.
    fn len(&self) -> u64;

    /// Check if the index is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the dimension of vectors in this index.
    fn dimensions(&self) -> u32;
}
