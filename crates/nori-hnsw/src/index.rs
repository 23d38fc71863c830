//! HNSW index handle.
//!
//! Implements the Hierarchical Navigable Small World algorithm for
//! approximate nearest neighbor search, backed by a single index file.

use crate::config::HnswConfig;
use crate::error::{HnswError, Result};
use crate::format::{self, Header, HEADER_SIZE};
use crate::graph::{Graph, NodeId};
use crate::insert;
use crate::layer::LevelGenerator;
use crate::persist;
use crate::search;
use crate::store::VectorStore;
use nori_observe::{obs_count, obs_gauge, obs_hist, IndexEvt, IndexKind, Meter, NoopMeter, VizEvent};
use nori_vector::{validate_vector, VectorId, VectorIndex, VectorMatch};
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Graph plus the vectors it indexes. Always mutated together.
struct IndexState {
    store: VectorStore,
    graph: Graph,
}

/// HNSW index.
///
/// Thread-safe: searches and metadata reads share a read lock and never block
/// each other. `add` and `flush` are serialized by an internal writer lock;
/// an add does its graph search under the shared lock and holds the exclusive
/// lock only to link the new node, so readers see either the whole insert or
/// none of it.
///
/// Added vectors are searchable immediately but only reach disk on
/// [`flush`](Self::flush). Dropping or closing the handle does not flush.
pub struct HnswIndex {
    path: PathBuf,
    dimensions: u32,
    /// Structural parameters; `ef_search` lives in its own atomic.
    config: HnswConfig,
    ef_search: AtomicUsize,
    state: RwLock<IndexState>,
    /// Writer lock. Also owns the level generator, which only writers use.
    writer: Mutex<LevelGenerator>,
    meter: Arc<dyn Meter>,
}

impl HnswIndex {
    /// Open the index at `path`, creating an empty one with default tuning if
    /// the file does not exist.
    ///
    /// An existing file must have been created with the same `dimensions`.
    pub fn open(path: impl AsRef<Path>, dimensions: u32) -> Result<Self> {
        Self::open_inner(path.as_ref(), dimensions, None, true, Arc::new(NoopMeter))
    }

    /// Open or create with explicit tuning.
    ///
    /// The tuning applies on creation. When the file exists its stored
    /// structural parameters win; only `ef_search` is taken from the arguments.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        dimensions: u32,
        max_connections: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Result<Self> {
        let config = HnswConfig::with_tuning(max_connections, ef_construction, ef_search);
        Self::open_with_config(path, dimensions, config)
    }

    /// Open or create with a full [`HnswConfig`]. Same reopen rules as
    /// [`open_with_options`](Self::open_with_options).
    pub fn open_with_config(
        path: impl AsRef<Path>,
        dimensions: u32,
        config: HnswConfig,
    ) -> Result<Self> {
        Self::open_with_meter(path, dimensions, config, Arc::new(NoopMeter))
    }

    /// Like [`open_with_config`](Self::open_with_config), reporting metrics and
    /// lifecycle events to `meter`.
    pub fn open_with_meter(
        path: impl AsRef<Path>,
        dimensions: u32,
        config: HnswConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        Self::open_inner(path.as_ref(), dimensions, Some(config), true, meter)
    }

    /// Open an index that must already exist; fails with `NotFound` otherwise.
    pub fn open_existing(path: impl AsRef<Path>, dimensions: u32) -> Result<Self> {
        Self::open_inner(path.as_ref(), dimensions, None, false, Arc::new(NoopMeter))
    }

    fn open_inner(
        path: &Path,
        dimensions: u32,
        requested: Option<HnswConfig>,
        create: bool,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        if dimensions == 0 {
            return Err(HnswError::InvalidParameter(
                "dimensions must be at least 1".into(),
            ));
        }
        if let Some(config) = &requested {
            config.validate()?;
        }

        if persist::check_path(path)? {
            Self::load(path, dimensions, requested, meter)
        } else if create {
            Self::create(path, dimensions, requested.unwrap_or_default(), meter)
        } else {
            Err(HnswError::NotFound(path.display().to_string()))
        }
    }

    fn create(
        path: &Path,
        dimensions: u32,
        config: HnswConfig,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        let index = Self::from_parts(
            path,
            dimensions,
            config,
            VectorStore::new(dimensions as usize),
            Graph::new(),
            meter,
        );

        // Persist the empty index now so path problems surface at open time
        let image = {
            let state = index.state.read();
            format::encode(dimensions, &index.config(), &state.store, &state.graph)
        };
        persist::write_atomic(path, &image)?;

        tracing::info!(
            "Created HNSW index at {} (dimensions={}, M={}, ef_construction={}, ef_search={})",
            path.display(),
            dimensions,
            index.config.max_connections,
            index.config.ef_construction,
            index.ef_search()
        );
        index.meter.emit(VizEvent::Index(IndexEvt {
            dimensions,
            kind: IndexKind::Created,
        }));

        Ok(index)
    }

    fn load(
        path: &Path,
        dimensions: u32,
        requested: Option<HnswConfig>,
        meter: Arc<dyn Meter>,
    ) -> Result<Self> {
        let data = persist::read_file(path)?;

        // Check dimensionality before parsing the body
        let header = Header::decode(&data)?;
        if header.dimensions != dimensions {
            tracing::debug!(
                "Rejected reopen of {}: stored dimensions {}, requested {}",
                path.display(),
                header.dimensions,
                dimensions
            );
            return Err(HnswError::DimensionMismatch {
                expected: header.dimensions as usize,
                actual: dimensions as usize,
            });
        }

        let decoded = format::decode_body(header, &data[HEADER_SIZE..])?;
        let mut config = decoded.header.config();
        if let Some(requested) = requested {
            if !config.same_structure(&requested) {
                tracing::warn!(
                    "Ignoring tuning for existing index {}: stored M={}, ef_construction={}, max_layers={}; requested M={}, ef_construction={}, max_layers={}",
                    path.display(),
                    config.max_connections,
                    config.ef_construction,
                    config.max_layers,
                    requested.max_connections,
                    requested.ef_construction,
                    requested.max_layers
                );
            }
            config.ef_search = requested.ef_search;
            config.seed = requested.seed;
        }

        let vectors = decoded.graph.len() as u64;
        let index = Self::from_parts(
            path,
            dimensions,
            config,
            decoded.store,
            decoded.graph,
            meter,
        );

        tracing::info!(
            "Loaded HNSW index from {} ({} vectors, dimensions={}, {} bytes)",
            path.display(),
            vectors,
            dimensions,
            data.len()
        );
        obs_gauge!(index.meter, "hnsw_vectors", &[], vectors);
        index.meter.emit(VizEvent::Index(IndexEvt {
            dimensions,
            kind: IndexKind::Loaded {
                vectors,
                bytes: data.len() as u64,
            },
        }));

        Ok(index)
    }

    fn from_parts(
        path: &Path,
        dimensions: u32,
        config: HnswConfig,
        store: VectorStore,
        graph: Graph,
        meter: Arc<dyn Meter>,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            dimensions,
            ef_search: AtomicUsize::new(config.ef_search),
            writer: Mutex::new(LevelGenerator::new(&config)),
            config,
            state: RwLock::new(IndexState { store, graph }),
            meter,
        }
    }

    /// Insert a vector and return its id.
    ///
    /// Ids are sequential from 0. On error the index is unchanged.
    pub fn add(&self, vector: &[f32]) -> Result<VectorId> {
        if let Err(e) = validate_vector(self.dimensions as usize, vector) {
            tracing::debug!("Rejected add: {}", e);
            return Err(e.into());
        }

        let mut levels = self.writer.lock();
        let level = levels.next_level();

        // Writers are serialized, so the graph cannot move between plan and commit
        let plan = {
            let state = self.state.read();
            insert::plan(&state.graph, &state.store, &self.config, vector, level)
        };
        let (inserted, count) = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let inserted = insert::commit(
                &mut state.graph,
                &mut state.store,
                &self.config,
                vector,
                plan,
            )?;
            (inserted, state.graph.len())
        };
        drop(levels);

        obs_count!(self.meter, "hnsw_add_total", &[], 1);
        obs_gauge!(self.meter, "hnsw_vectors", &[], count);
        if inserted.promoted {
            tracing::trace!(
                "Entry point promoted to {} at level {}",
                inserted.id,
                inserted.level
            );
            self.meter.emit(VizEvent::Index(IndexEvt {
                dimensions: self.dimensions,
                kind: IndexKind::EntryPointPromoted {
                    id: inserted.id as u64,
                    level: inserted.level,
                },
            }));
        }

        Ok(inserted.id as VectorId)
    }

    /// Approximate k nearest neighbors of `query`, closest first.
    ///
    /// Returns at most `min(k, len)` matches; `k == 0` returns an empty list.
    /// Equal distances are ordered by ascending id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        if let Err(e) = validate_vector(self.dimensions as usize, query) {
            tracing::debug!("Rejected search: {}", e);
            return Err(e.into());
        }
        obs_count!(self.meter, "hnsw_search_total", &[], 1);

        if k == 0 {
            return Ok(Vec::new());
        }

        let ef = self.ef_search.load(Ordering::Relaxed);
        let state = self.state.read();
        Ok(search::knn(&state.graph, &state.store, query, k, ef))
    }

    /// Durably replace the index file with the current in-memory state.
    ///
    /// Memory is never changed. If writing the new image fails the previous
    /// file is left intact. If only the final directory sync fails, the new
    /// image is already in place but the rename may not survive a crash; the
    /// error message says so.
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock();
        let start = Instant::now();

        let (image, vectors) = {
            let state = self.state.read();
            let image = format::encode(self.dimensions, &self.config(), &state.store, &state.graph);
            (image, state.graph.len() as u64)
        };
        persist::write_atomic(&self.path, &image)?;

        let elapsed = start.elapsed();
        let ms = elapsed.as_millis().min(u32::MAX as u128) as u32;
        tracing::info!(
            "Flushed HNSW index to {} ({} vectors, {} bytes, {:?})",
            self.path.display(),
            vectors,
            image.len(),
            elapsed
        );
        obs_count!(self.meter, "hnsw_flush_total", &[], 1);
        obs_hist!(self.meter, "hnsw_flush_ms", &[], elapsed.as_secs_f64() * 1000.0);
        self.meter.emit(VizEvent::Index(IndexEvt {
            dimensions: self.dimensions,
            kind: IndexKind::Flushed {
                vectors,
                bytes: image.len() as u64,
                ms,
            },
        }));

        Ok(())
    }

    /// Release the index. Unflushed additions are discarded.
    pub fn close(self) {
        tracing::debug!(
            "Closed HNSW index at {} ({} vectors in memory)",
            self.path.display(),
            self.len()
        );
    }

    /// Number of stored vectors.
    pub fn len(&self) -> u64 {
        self.state.read().graph.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> u32 {
        self.dimensions
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective configuration, including the current `ef_search`.
    pub fn config(&self) -> HnswConfig {
        HnswConfig {
            ef_search: self.ef_search(),
            ..self.config.clone()
        }
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search.load(Ordering::Relaxed)
    }

    /// Change the search beam width for this handle. Persisted on the next flush.
    pub fn set_ef_search(&self, ef_search: usize) -> Result<()> {
        if ef_search == 0 {
            return Err(HnswError::InvalidParameter(
                "ef_search must be >= 1, got 0".into(),
            ));
        }
        self.ef_search.store(ef_search, Ordering::Relaxed);
        Ok(())
    }

    /// Copy of the stored vector with this id, if any.
    pub fn get_vector(&self, id: VectorId) -> Option<Vec<f32>> {
        let id = NodeId::try_from(id).ok()?;
        self.state.read().store.get(id).map(<[f32]>::to_vec)
    }

    /// Verify the graph invariants: neighbor ranges and degrees, levels, the
    /// entry point holding the top level, and layer-0 reachability from it.
    ///
    /// Violations are reported as `InvariantViolation`.
    pub fn check_invariants(&self) -> Result<()> {
        let state = self.state.read();
        if state.store.len() != state.graph.len() {
            return Err(HnswError::InvariantViolation(format!(
                "{} vectors but {} graph nodes",
                state.store.len(),
                state.graph.len()
            )));
        }
        state.graph.validate_structure(&self.config)?;

        let orphans = state.graph.unreachable_nodes();
        if let Some(first) = orphans.first() {
            return Err(HnswError::InvariantViolation(format!(
                "{} nodes unreachable from the entry point (first: {})",
                orphans.len(),
                first
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("path", &self.path)
            .field("dimensions", &self.dimensions)
            .field("len", &self.len())
            .field("config", &self.config())
            .finish()
    }
}

impl VectorIndex for HnswIndex {
    type Error = HnswError;

    fn add(&self, vector: &[f32]) -> Result<VectorId> {
        HnswIndex::add(self, vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        HnswIndex::search(self, query, k)
    }

    fn len(&self) -> u64 {
        HnswIndex::len(self)
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}
