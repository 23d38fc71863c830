//! Error types for nori-hnsw operations.

use nori_vector::VectorError;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum HnswError {
    /// Vector or query length differs from the index dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Vector contains NaN or infinite components.
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// Path is not representable as a native path or points somewhere unusable.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// On-disk index is truncated, checksum-inconsistent, or structurally invalid.
    #[error("Corrupted index file: {0}")]
    Corruption(String),

    /// In-memory graph fails a structural or connectivity check.
    #[error("Index invariant violated: {0}")]
    InvariantViolation(String),

    /// Tuning parameter or argument outside its accepted range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// I/O error from filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index file required to exist was absent.
    #[error("Index file not found: {0}")]
    NotFound(String),

    /// Allocation failed or the id space is used up.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Operation attempted through a handle that was already closed.
    #[error("Index is closed")]
    Closed,
}

/// Structured error kind, for callers that branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DimensionMismatch,
    InvalidVector,
    InvalidPath,
    Corruption,
    InvariantViolation,
    InvalidParameter,
    IoFailure,
    NotFound,
    ResourceExhausted,
    Closed,
}

impl HnswError {
    /// Returns the structured kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            Self::InvalidVector(_) => ErrorKind::InvalidVector,
            Self::InvalidPath(_) => ErrorKind::InvalidPath,
            Self::Corruption(_) => ErrorKind::Corruption,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Closed => ErrorKind::Closed,
        }
    }

    /// Reclassify a graph check failure found while loading a file.
    pub(crate) fn into_corruption(self) -> Self {
        match self {
            Self::InvariantViolation(msg) => Self::Corruption(msg),
            other => other,
        }
    }
}

impl From<VectorError> for HnswError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            VectorError::InvalidVector(msg) => Self::InvalidVector(msg),
        }
    }
}

impl From<TryReserveError> for HnswError {
    fn from(err: TryReserveError) -> Self {
        Self::ResourceExhausted(err.to_string())
    }
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, HnswError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_error_keeps_kind() {
        let err: HnswError = VectorError::DimensionMismatch {
            expected: 3,
            actual: 2,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);
        assert!(err.to_string().contains("expected 3, got 2"));

        let err: HnswError = VectorError::InvalidVector("NaN at index 0".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidVector);
    }

    #[test]
    fn test_invariant_violation_is_not_file_corruption() {
        let err = HnswError::InvariantViolation("node 3 links to itself at layer 0".into());
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        assert!(!err.to_string().contains("file"));

        let loaded = err.into_corruption();
        assert_eq!(loaded.kind(), ErrorKind::Corruption);
        assert_eq!(
            loaded.to_string(),
            "Corrupted index file: node 3 links to itself at layer 0"
        );
    }

    #[test]
    fn test_io_error_kind() {
        let err: HnswError = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.kind(), ErrorKind::IoFailure);
    }

    #[test]
    fn test_try_reserve_maps_to_exhausted() {
        let mut v: Vec<u64> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        let err: HnswError = err.into();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }
}
