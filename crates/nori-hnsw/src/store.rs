//! Flat, append-only vector storage.
//!
//! Vectors live back to back in one `Vec<f32>`; node `i` occupies
//! `data[i * dimensions..(i + 1) * dimensions]`.

use crate::error::{HnswError, Result};
use crate::graph::NodeId;

/// Append-only store of fixed-dimension vectors.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimensions: usize,
    data: Vec<f32>,
}

impl VectorStore {
    /// Create an empty store.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    /// Rebuild a store from a flat buffer (used by the loader).
    pub fn from_raw(dimensions: usize, data: Vec<f32>) -> Result<Self> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(HnswError::Corruption(format!(
                "vector block of {} floats is not a multiple of {} dimensions",
                data.len(),
                dimensions
            )));
        }
        Ok(Self { dimensions, data })
    }

    /// Reserve room for one more vector without touching contents.
    ///
    /// Called before any mutation so a failed allocation leaves the store unchanged.
    pub fn reserve_one(&mut self) -> Result<()> {
        self.data.try_reserve(self.dimensions)?;
        Ok(())
    }

    /// Append a vector and return its node id.
    ///
    /// Caller has validated the length.
    pub fn push(&mut self, vector: &[f32]) -> Result<NodeId> {
        debug_assert_eq!(vector.len(), self.dimensions);
        let id = NodeId::try_from(self.len()).map_err(|_| {
            HnswError::ResourceExhausted(format!("node id space exhausted at {}", self.len()))
        })?;
        self.reserve_one()?;
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Borrow the vector for `id`. Panics if out of range.
    #[inline]
    pub fn vector(&self, id: NodeId) -> &[f32] {
        let start = id as usize * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    /// Borrow the vector for `id`, or `None` if out of range.
    pub fn get(&self, id: NodeId) -> Option<&[f32]> {
        let start = (id as usize).checked_mul(self.dimensions)?;
        self.data.get(start..start.checked_add(self.dimensions)?)
    }

    /// Number of stored vectors.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions
    }

    /// All vectors as one flat slice, in id order.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}
