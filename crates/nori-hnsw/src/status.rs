//! Sentinel-style boundary over [`HnswIndex`].
//!
//! For callers that cannot receive a `Result` (foreign function layers,
//! embedding runtimes): each operation returns a sentinel on failure and
//! records the error in a per-thread slot, read back with
//! [`last_error_message`] / [`last_error_kind`]. Every successful call clears
//! the slot, so an empty search with no recorded error is a genuine empty
//! result.
//!
//! The slot is thread-local, so concurrent callers never see each other's
//! errors.

use crate::error::{ErrorKind, HnswError, Result};
use crate::index::HnswIndex;
use nori_vector::{VectorId, INVALID_VECTOR_ID};
use std::cell::RefCell;
use std::path::PathBuf;

#[derive(Debug, Clone)]
struct LastError {
    kind: ErrorKind,
    message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// Message of the most recent failure on this thread, if the last call failed.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|e| e.message.clone()))
}

/// Kind of the most recent failure on this thread, if the last call failed.
pub fn last_error_kind() -> Option<ErrorKind> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|e| e.kind))
}

pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn set_last_error(err: &HnswError) {
    let last = LastError {
        kind: err.kind(),
        message: err.to_string(),
    };
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(last));
}

/// Record the outcome of `result` in the slot and pass it through.
fn record<T>(result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => clear_last_error(),
        Err(e) => set_last_error(e),
    }
    result
}

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Decode a path received as raw bytes. Must be UTF-8.
pub fn open_path_bytes(path: &[u8]) -> Result<PathBuf> {
    let path = std::str::from_utf8(path)
        .map_err(|e| HnswError::InvalidPath(format!("path is not valid UTF-8: {}", e)))?;
    if path.is_empty() {
        return Err(HnswError::InvalidPath("empty path".into()));
    }
    Ok(PathBuf::from(path))
}

/// Add a vector; returns [`INVALID_VECTOR_ID`] on failure.
pub fn add_or_sentinel(index: &HnswIndex, vector: &[f32]) -> VectorId {
    record(index.add(vector)).unwrap_or(INVALID_VECTOR_ID)
}

/// Search and write up to `k` results into the output buffers, closest first.
///
/// Returns the number of results written. On failure returns 0 with the
/// error recorded; a successful empty search returns 0 with the slot clear.
/// `k` must be at least 1 and both buffers must hold `k` entries.
pub fn search_into(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ids_out: &mut [VectorId],
    distances_out: &mut [f32],
) -> usize {
    record(search_into_inner(index, query, k, ids_out, distances_out)).unwrap_or(0)
}

fn search_into_inner(
    index: &HnswIndex,
    query: &[f32],
    k: usize,
    ids_out: &mut [VectorId],
    distances_out: &mut [f32],
) -> Result<usize> {
    if k == 0 {
        return Err(HnswError::InvalidParameter("k must be at least 1".into()));
    }
    if ids_out.len() < k || distances_out.len() < k {
        return Err(HnswError::InvalidParameter(format!(
            "output buffers hold {} ids and {} distances, need {}",
            ids_out.len(),
            distances_out.len(),
            k
        )));
    }

    let matches = index.search(query, k)?;
    for (i, m) in matches.iter().enumerate() {
        ids_out[i] = m.id;
        distances_out[i] = m.distance;
    }
    Ok(matches.len())
}

/// Flush; returns 0 on success, -1 on failure.
pub fn flush_status(index: &HnswIndex) -> i32 {
    match record(index.flush()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Owned handle with explicit, idempotent close.
///
/// Operations on a closed handle fail with [`HnswError::Closed`] through the
/// same sentinel channel.
#[derive(Debug)]
pub struct IndexHandle {
    inner: Option<HnswIndex>,
}

impl IndexHandle {
    /// Open with default tuning. `None` on failure (see [`last_error_message`]).
    pub fn open(path: &[u8], dimensions: u32) -> Option<Self> {
        Self::from_result(open_path_bytes(path).and_then(|p| HnswIndex::open(p, dimensions)))
    }

    /// Open with explicit tuning. `None` on failure.
    pub fn open_with_options(
        path: &[u8],
        dimensions: u32,
        max_connections: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Option<Self> {
        Self::from_result(open_path_bytes(path).and_then(|p| {
            HnswIndex::open_with_options(p, dimensions, max_connections, ef_construction, ef_search)
        }))
    }

    fn from_result(result: Result<HnswIndex>) -> Option<Self> {
        record(result).ok().map(|index| Self { inner: Some(index) })
    }

    fn index(&self) -> Result<&HnswIndex> {
        self.inner.as_ref().ok_or(HnswError::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns [`INVALID_VECTOR_ID`] on failure.
    pub fn add(&self, vector: &[f32]) -> VectorId {
        match record(self.index()) {
            Ok(index) => add_or_sentinel(index, vector),
            Err(_) => INVALID_VECTOR_ID,
        }
    }

    /// See [`search_into`].
    pub fn search_into(
        &self,
        query: &[f32],
        k: usize,
        ids_out: &mut [VectorId],
        distances_out: &mut [f32],
    ) -> usize {
        match record(self.index()) {
            Ok(index) => search_into(index, query, k, ids_out, distances_out),
            Err(_) => 0,
        }
    }

    /// 0 on success, -1 on failure.
    pub fn flush(&self) -> i32 {
        match record(self.index()) {
            Ok(index) => flush_status(index),
            Err(_) => -1,
        }
    }

    /// Vector count; 0 on a closed handle.
    pub fn len(&self) -> u64 {
        record(self.index()).map(HnswIndex::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality; 0 on a closed handle.
    pub fn dimensions(&self) -> u32 {
        record(self.index())
            .map(HnswIndex::dimensions)
            .unwrap_or(0)
    }

    /// Release the index without flushing. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(index) = self.inner.take() {
            index.close();
        }
        clear_last_error();
    }
}
