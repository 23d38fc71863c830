//! Persistent HNSW (Hierarchical Navigable Small World) index for NoriKV.
//!
//! Provides approximate nearest neighbor (ANN) search over fixed-dimension
//! `f32` vectors with Euclidean distance. HNSW builds a multi-layer graph where:
//!
//! - Higher layers have fewer nodes (exponential decay)
//! - Each layer is a navigable small-world graph
//! - Search starts at top layer and descends
//!
//! Vectors are append-only and receive sequential ids `0, 1, 2, ...`.
//! The whole index lives in one file:
//!
//! ```text
//! open ──► in-memory graph + vectors ──add/search──► ...
//!                     │
//!                  flush (temp file + fsync + rename)
//!                     ▼
//!              index file (header, vectors, graph; CRC32C-checked)
//! ```
//!
//! Adds are visible to searches on the same handle immediately, but survive
//! a restart only after [`HnswIndex::flush`]. Closing does not flush.
//!
//! # Parameters
//!
//! - `M`: Max connections per node per layer, doubled at layer 0 (default: 16)
//! - `ef_construction`: Beam width during index building (default: 200)
//! - `ef_search`: Beam width during search (default: 50)
//! - `max_layers`: Maximum number of layers (default: 16)
//!
//! # Example
//!
//! ```
//! use nori_hnsw::HnswIndex;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("vectors.hnsw");
//!
//! let index = HnswIndex::open(&path, 3).unwrap();
//! assert_eq!(index.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
//! assert_eq!(index.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
//! assert_eq!(index.add(&[0.0, 0.0, 1.0]).unwrap(), 2);
//!
//! let results = index.search(&[0.9, 0.1, 0.1], 3).unwrap();
//! assert_eq!(results[0].id, 0);
//!
//! index.flush().unwrap();
//! index.close();
//!
//! let reopened = HnswIndex::open(&path, 3).unwrap();
//! assert_eq!(reopened.len(), 3);
//! ```

mod config;
mod error;
mod format;
mod graph;
mod index;
mod insert;
mod layer;
mod persist;
mod search;
mod store;

pub mod status;

pub use config::HnswConfig;
pub use error::{ErrorKind, HnswError, Result};
pub use index::HnswIndex;
pub use nori_vector::{VectorId, VectorIndex, VectorMatch, INVALID_VECTOR_ID};
