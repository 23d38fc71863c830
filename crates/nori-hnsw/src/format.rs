//! On-disk layout of an HNSW index file.
//!
//! ```text
//! +----------------------------- header (64 bytes) -----------------------------+
//! | magic u64 | version u32 | dimensions u32 | M u32 | ef_construction u32      |
//! | ef_search u32 | max_layers u8 | max_level u8 | reserved u16 | count u64      |
//! | entry_point u64 | body_len u64 | body_crc u32 | header_crc u32              |
//! +------------------------------------------------------------------------------+
//! | vectors: count * dimensions f32                                              |
//! | graph:   per node: level u8, then per layer 0..=level: degree u32, ids u32.. |
//! +------------------------------------------------------------------------------+
//! ```
//!
//! All integers and floats are little-endian. `header_crc` covers header
//! bytes `0..60`; `body_crc` covers the whole body. An empty index stores
//! `INVALID_VECTOR_ID` as its entry point.
//!
//! Decoding also rejects graphs whose nodes are not all joined to the entry
//! point by mutual layer-0 links.

use crate::config::{HnswConfig, MAX_CONNECTIONS_LIMIT, MAX_LAYERS_LIMIT};
use crate::error::{HnswError, Result};
use crate::graph::{Graph, Neighbors, Node, NodeId};
use crate::store::VectorStore;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use nori_vector::{VectorId, INVALID_VECTOR_ID};

/// File magic: "NORIHNSW" as little-endian u64.
pub const MAGIC: u64 = u64::from_le_bytes(*b"NORIHNSW");

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

const HEADER_CRC_OFFSET: usize = 60;

/// Decoded file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub dimensions: u32,
    pub max_connections: u32,
    pub ef_construction: u32,
    pub ef_search: u32,
    pub max_layers: u8,
    pub max_level: u8,
    pub count: u64,
    pub entry_point: VectorId,
    pub body_len: u64,
    pub body_crc: u32,
}

impl Header {
    /// Tuning parameters recorded in the file. The seed is not persisted.
    pub fn config(&self) -> HnswConfig {
        HnswConfig {
            max_connections: self.max_connections as usize,
            ef_construction: self.ef_construction as usize,
            ef_search: self.ef_search as usize,
            max_layers: self.max_layers as usize,
            seed: None,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u64_le(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.dimensions);
        buf.put_u32_le(self.max_connections);
        buf.put_u32_le(self.ef_construction);
        buf.put_u32_le(self.ef_search);
        buf.put_u8(self.max_layers);
        buf.put_u8(self.max_level);
        buf.put_u16_le(0);
        buf.put_u64_le(self.count);
        buf.put_u64_le(self.entry_point);
        buf.put_u64_le(self.body_len);
        buf.put_u32_le(self.body_crc);
        let crc = crc32c::crc32c(&buf[start..start + HEADER_CRC_OFFSET]);
        buf.put_u32_le(crc);
    }

    /// Parse and verify the header at the start of `data`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(HnswError::Corruption(format!(
                "file is {} bytes, shorter than the {}-byte header",
                data.len(),
                HEADER_SIZE
            )));
        }

        let mut cursor = &data[..HEADER_SIZE];
        let magic = cursor.get_u64_le();
        if magic != MAGIC {
            return Err(HnswError::Corruption(format!("bad magic {:#018x}", magic)));
        }

        let stored_crc = (&data[HEADER_CRC_OFFSET..HEADER_SIZE]).get_u32_le();
        let actual_crc = crc32c::crc32c(&data[..HEADER_CRC_OFFSET]);
        if stored_crc != actual_crc {
            return Err(HnswError::Corruption(format!(
                "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let version = cursor.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(HnswError::Corruption(format!(
                "unsupported format version {}",
                version
            )));
        }

        let dimensions = cursor.get_u32_le();
        let max_connections = cursor.get_u32_le();
        let ef_construction = cursor.get_u32_le();
        let ef_search = cursor.get_u32_le();
        let max_layers = cursor.get_u8();
        let max_level = cursor.get_u8();
        cursor.advance(2); // reserved
        let header = Header {
            dimensions,
            max_connections,
            ef_construction,
            ef_search,
            max_layers,
            max_level,
            count: cursor.get_u64_le(),
            entry_point: cursor.get_u64_le(),
            body_len: cursor.get_u64_le(),
            body_crc: cursor.get_u32_le(),
        };
        header.check_ranges()?;
        Ok(header)
    }

    fn check_ranges(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(HnswError::Corruption("zero dimensions".into()));
        }
        if self.max_connections == 0 || self.max_connections as usize > MAX_CONNECTIONS_LIMIT {
            return Err(HnswError::Corruption(format!(
                "max_connections {} out of range",
                self.max_connections
            )));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(HnswError::Corruption("zero beam width".into()));
        }
        if self.max_layers == 0 || self.max_layers as usize > MAX_LAYERS_LIMIT {
            return Err(HnswError::Corruption(format!(
                "max_layers {} out of range",
                self.max_layers
            )));
        }
        if self.count > NodeId::MAX as u64 {
            return Err(HnswError::Corruption(format!(
                "vector count {} exceeds limit",
                self.count
            )));
        }
        let empty = self.count == 0;
        if empty != (self.entry_point == INVALID_VECTOR_ID) {
            return Err(HnswError::Corruption(format!(
                "entry point {} inconsistent with count {}",
                self.entry_point, self.count
            )));
        }
        Ok(())
    }
}

/// Serialize a full index image (header + body).
pub fn encode(
    dimensions: u32,
    config: &HnswConfig,
    store: &VectorStore,
    graph: &Graph,
) -> Bytes {
    let mut body = BytesMut::with_capacity(body_size_hint(store, graph));

    for &v in store.as_slice() {
        body.put_f32_le(v);
    }
    for node in graph.nodes() {
        body.put_u8(node.level());
        for neighbors in node.layers() {
            body.put_u32_le(neighbors.len() as u32);
            for &id in neighbors.as_slice() {
                body.put_u32_le(id);
            }
        }
    }

    let header = Header {
        dimensions,
        max_connections: config.max_connections as u32,
        ef_construction: config.ef_construction.min(u32::MAX as usize) as u32,
        ef_search: config.ef_search.min(u32::MAX as usize) as u32,
        max_layers: config.max_layers as u8,
        max_level: graph.max_level(),
        count: graph.len() as u64,
        entry_point: graph
            .entry_point()
            .map(VectorId::from)
            .unwrap_or(INVALID_VECTOR_ID),
        body_len: body.len() as u64,
        body_crc: crc32c::crc32c(&body),
    };

    let mut out = BytesMut::with_capacity(HEADER_SIZE + body.len());
    header.encode(&mut out);
    out.put_slice(&body);
    out.freeze()
}

fn body_size_hint(store: &VectorStore, graph: &Graph) -> usize {
    let vectors = store.as_slice().len() * 4;
    let links: usize = graph
        .nodes()
        .iter()
        .map(|n| {
            1 + n
                .layers()
                .iter()
                .map(|l| 4 + 4 * l.len())
                .sum::<usize>()
        })
        .sum();
    vectors + links
}

/// Everything recovered from an index file.
#[derive(Debug)]
pub struct Decoded {
    pub header: Header,
    pub store: VectorStore,
    pub graph: Graph,
}

/// Parse the body for an already verified header, checking its checksum,
/// exact length, and graph structure.
pub fn decode_body(header: Header, body: &[u8]) -> Result<Decoded> {
    if body.len() as u64 != header.body_len {
        return Err(HnswError::Corruption(format!(
            "body is {} bytes, header says {}",
            body.len(),
            header.body_len
        )));
    }
    let actual_crc = crc32c::crc32c(body);
    if actual_crc != header.body_crc {
        return Err(HnswError::Corruption(format!(
            "body checksum mismatch: stored {:#010x}, computed {:#010x}",
            header.body_crc, actual_crc
        )));
    }

    let dims = header.dimensions as usize;
    let count = header.count as usize;
    let floats = count
        .checked_mul(dims)
        .filter(|&n| n.checked_mul(4).map_or(false, |b| b <= body.len()))
        .ok_or_else(|| {
            HnswError::Corruption(format!(
                "{} vectors of {} dimensions do not fit in the body",
                count, dims
            ))
        })?;

    let mut cursor = body;
    let mut data = Vec::new();
    data.try_reserve_exact(floats)?;
    for _ in 0..floats {
        let v = cursor.get_f32_le();
        if !v.is_finite() {
            return Err(HnswError::Corruption("non-finite vector component".into()));
        }
        data.push(v);
    }
    let store = VectorStore::from_raw(dims, data)?;

    let config = header.config();
    let mut nodes = Vec::new();
    nodes.try_reserve_exact(count)?;
    for id in 0..count {
        if cursor.remaining() < 1 {
            return Err(truncated(id));
        }
        let level = cursor.get_u8();
        if level as usize >= config.max_layers {
            return Err(HnswError::Corruption(format!(
                "node {} has level {} but max_layers is {}",
                id, level, config.max_layers
            )));
        }

        let mut layers = Vec::with_capacity(level as usize + 1);
        for layer in 0..=level as usize {
            if cursor.remaining() < 4 {
                return Err(truncated(id));
            }
            let degree = cursor.get_u32_le() as usize;
            let cap = config.max_degree(layer);
            if degree > cap {
                return Err(HnswError::Corruption(format!(
                    "node {} has {} neighbors at layer {} (capacity {})",
                    id, degree, layer, cap
                )));
            }
            if cursor.remaining() < degree * 4 {
                return Err(truncated(id));
            }
            let mut ids = Vec::new();
            ids.try_reserve_exact(degree)?;
            for _ in 0..degree {
                ids.push(cursor.get_u32_le());
            }
            layers.push(Neighbors::try_from_slice(&ids)?);
        }
        nodes.push(Node::from_layers(layers)?);
    }

    if cursor.has_remaining() {
        return Err(HnswError::Corruption(format!(
            "{} trailing bytes after graph block",
            cursor.remaining()
        )));
    }

    let entry_point = if count == 0 {
        None
    } else {
        Some(header.entry_point as NodeId)
    };
    if header.entry_point != INVALID_VECTOR_ID && header.entry_point >= header.count {
        return Err(HnswError::Corruption(format!(
            "entry point {} out of range ({} vectors)",
            header.entry_point, header.count
        )));
    }

    let mut graph = Graph::from_parts(nodes, entry_point);
    if graph.max_level() != header.max_level {
        return Err(HnswError::Corruption(format!(
            "entry point level {} disagrees with header max level {}",
            graph.max_level(),
            header.max_level
        )));
    }
    graph
        .validate_structure(&config)
        .and_then(|()| graph.link_tree())
        .map_err(HnswError::into_corruption)?;

    Ok(Decoded {
        header,
        store,
        graph,
    })
}

fn truncated(node: usize) -> HnswError {
    HnswError::Corruption(format!("graph block truncated at node {}", node))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert::{commit, plan};
    use crate::layer::LevelGenerator;

    fn decode(data: &[u8]) -> Result<Decoded> {
        let header = Header::decode(data)?;
        decode_body(header, &data[HEADER_SIZE..])
    }

    fn build(n: usize) -> (HnswConfig, VectorStore, Graph) {
        build_with(
            HnswConfig {
                max_connections: 4,
                ef_construction: 20,
                ef_search: 10,
                max_layers: 5,
                seed: Some(5),
            },
            n,
        )
    }

    fn build_with(config: HnswConfig, n: usize) -> (HnswConfig, VectorStore, Graph) {
        let mut levels = LevelGenerator::new(&config);
        let mut store = VectorStore::new(3);
        let mut graph = Graph::new();
        for i in 0..n {
            let v = [i as f32, (i % 5) as f32, -(i as f32) / 2.0];
            let p = plan(&graph, &store, &config, &v, levels.next_level());
            commit(&mut graph, &mut store, &config, &v, p).unwrap();
        }
        (config, store, graph)
    }

    #[test]
    fn test_encode_decode_preserves_everything() {
        let (config, store, graph) = build(40);
        let bytes = encode(3, &config, &store, &graph);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.header.dimensions, 3);
        assert_eq!(decoded.header.count, 40);
        assert_eq!(decoded.header.config().max_connections, 4);
        assert_eq!(decoded.store.as_slice(), store.as_slice());
        assert_eq!(decoded.graph.len(), graph.len());
        for (loaded, built) in decoded.graph.nodes().iter().zip(graph.nodes()) {
            assert_eq!(loaded.level(), built.level());
            assert_eq!(loaded.layers(), built.layers());
        }
        assert_eq!(decoded.graph.entry_point(), graph.entry_point());
        assert_eq!(decoded.graph.max_level(), graph.max_level());

        // The rebuilt tree is rooted at the entry point and spans every node
        let root = decoded.graph.entry_point().unwrap();
        assert_eq!(decoded.graph.parent(root), None);
        for id in 0..decoded.graph.len() as NodeId {
            if id != root {
                let parent = decoded.graph.parent(id).unwrap();
                assert!(decoded.graph.neighbors(parent, 0).contains(&id));
            }
        }
    }

    #[test]
    fn test_decoded_lists_sized_by_degree() {
        let config = HnswConfig {
            max_connections: 65_535,
            ef_construction: 16,
            ef_search: 10,
            max_layers: 4,
            seed: Some(8),
        };
        let (config, store, graph) = build_with(config, 60);
        let decoded = decode(&encode(3, &config, &store, &graph)).unwrap();

        for node in decoded.graph.nodes() {
            for neighbors in node.layers() {
                assert!(neighbors.allocated() <= neighbors.len().max(4));
            }
        }
    }

    #[test]
    fn test_one_way_attachment_rejected() {
        // Node 2 is only reachable through 0 -> 2, which 2 does not return
        let mut store = VectorStore::new(3);
        for i in 0..3 {
            store.push(&[i as f32, 0.0, 0.0]).unwrap();
        }
        let lists: [&[NodeId]; 3] = [&[1, 2], &[0], &[1]];
        let nodes = lists
            .iter()
            .map(|ids| Node::from_layers(vec![Neighbors::try_from_slice(ids).unwrap()]).unwrap())
            .collect();
        let graph = Graph::from_parts(nodes, Some(0));
        let config = HnswConfig::default();
        let bytes = encode(3, &config, &store, &graph);

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, HnswError::Corruption(_)), "{:?}", err);
        assert!(err.to_string().contains("mutual layer-0 links"), "{}", err);
    }

    #[test]
    fn test_empty_index_image() {
        let config = HnswConfig::default();
        let bytes = encode(8, &config, &VectorStore::new(8), &Graph::new());
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.header.entry_point, INVALID_VECTOR_ID);
        assert_eq!(decoded.graph.len(), 0);
        assert_eq!(decoded.header.config(), config);
    }

    #[test]
    fn test_every_truncation_is_corruption() {
        let (config, store, graph) = build(6);
        let bytes = encode(3, &config, &store, &graph);

        for len in 0..bytes.len() {
            let err = decode(&bytes[..len]).unwrap_err();
            assert!(matches!(err, HnswError::Corruption(_)), "len {}", len);
        }
    }

    #[test]
    fn test_bit_flips_are_detected() {
        let (config, store, graph) = build(6);
        let bytes = encode(3, &config, &store, &graph);

        for pos in (0..bytes.len()).step_by(7) {
            let mut corrupted = bytes.to_vec();
            corrupted[pos] ^= 0x40;
            let err = decode(&corrupted).unwrap_err();
            assert!(matches!(err, HnswError::Corruption(_)), "pos {}", pos);
        }
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let (config, store, graph) = build(3);
        let mut bytes = encode(3, &config, &store, &graph).to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            HnswError::Corruption(_)
        ));
    }
}
