//! Graph data structures for HNSW.
//!
//! Nodes live in a flat table indexed by [`NodeId`]; neighbor lists hold ids,
//! never references, so the graph can be serialized and grown freely.
//!
//! Layer 0 carries a spanning tree whose edges are present in both endpoint
//! lists. Eviction never removes a tree edge, so every node stays reachable
//! from every other one, the entry point included. The tree is not stored on
//! disk; [`Graph::link_tree`] rebuilds it from mutual links after loading.

use crate::config::HnswConfig;
use crate::error::{HnswError, Result};
use std::collections::VecDeque;

/// Internal node ID (dense, for array indexing). Equal to the public vector id.
pub type NodeId = u32;

/// Neighbor list for a node at a specific layer.
///
/// Kept sorted by distance to the owning node (closest first). Lists are sized
/// to their degree, not their capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Neighbors {
    ids: Vec<NodeId>,
}

impl Neighbors {
    /// Copy `ids` into an exactly sized list, failing instead of aborting
    /// when the allocation cannot be satisfied.
    pub fn try_from_slice(ids: &[NodeId]) -> Result<Self> {
        let mut list = Vec::new();
        list.try_reserve_exact(ids.len())?;
        list.extend_from_slice(ids);
        Ok(Self { ids: list })
    }

    /// Make room for one more id so the next [`insert_at`](Self::insert_at)
    /// cannot allocate.
    pub fn reserve_one(&mut self) -> Result<()> {
        self.ids.try_reserve(1)?;
        Ok(())
    }

    /// Insert `id` at `pos`, keeping the caller-computed order.
    pub fn insert_at(&mut self, pos: usize, id: NodeId) {
        self.ids.insert(pos, id);
    }

    pub fn remove_at(&mut self, pos: usize) -> NodeId {
        self.ids.remove(pos)
    }

    /// Get number of neighbors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn as_slice(&self) -> &[NodeId] {
        &self.ids
    }

    #[cfg(test)]
    pub(crate) fn allocated(&self) -> usize {
        self.ids.capacity()
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Highest layer this node participates in.
    level: u8,
    /// Spanning tree parent at layer 0; `None` for the tree root.
    parent: Option<NodeId>,
    /// One neighbor list per layer `0..=level`.
    layers: Vec<Neighbors>,
}

impl Node {
    /// Create a node with its forward links. Layers missing from `links`
    /// start empty and unallocated.
    pub fn try_new(
        level: u8,
        parent: Option<NodeId>,
        links: &[(usize, Vec<NodeId>)],
    ) -> Result<Self> {
        let mut layers = Vec::new();
        layers.try_reserve_exact(level as usize + 1)?;
        layers.resize_with(level as usize + 1, Neighbors::default);
        for (layer, ids) in links {
            layers[*layer] = Neighbors::try_from_slice(ids)?;
        }
        Ok(Self {
            level,
            parent,
            layers,
        })
    }

    /// Build a node from loaded neighbor lists. The tree parent is assigned by
    /// [`Graph::link_tree`].
    pub fn from_layers(layers: Vec<Neighbors>) -> Result<Self> {
        if layers.is_empty() || layers.len() > u8::MAX as usize + 1 {
            return Err(HnswError::Corruption(format!(
                "node has {} layers",
                layers.len()
            )));
        }
        Ok(Self {
            level: (layers.len() - 1) as u8,
            parent: None,
            layers,
        })
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn layers(&self) -> &[Neighbors] {
        &self.layers
    }
}

/// Multi-layer proximity graph over node ids.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    entry_point: Option<NodeId>,
    max_level: u8,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from loaded parts. Structure is checked separately.
    pub fn from_parts(nodes: Vec<Node>, entry_point: Option<NodeId>) -> Self {
        let max_level = entry_point
            .and_then(|ep| nodes.get(ep as usize))
            .map(Node::level)
            .unwrap_or(0);
        Self {
            nodes,
            entry_point,
            max_level,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn entry_point(&self) -> Option<NodeId> {
        self.entry_point
    }

    /// Level of the entry point (0 for an empty graph).
    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Neighbors of `id` at `layer`; empty if the node does not reach that layer.
    #[inline]
    pub fn neighbors(&self, id: NodeId, layer: usize) -> &[NodeId] {
        self.nodes[id as usize]
            .layers
            .get(layer)
            .map(Neighbors::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn neighbors_mut(&mut self, id: NodeId, layer: usize) -> &mut Neighbors {
        &mut self.nodes[id as usize].layers[layer]
    }

    /// Reserve a slot for one more node.
    pub fn reserve_one(&mut self) -> Result<()> {
        self.nodes.try_reserve(1)?;
        Ok(())
    }

    /// Append a node. Its id is its position.
    pub fn push_node(&mut self, node: Node) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        id
    }

    /// Make `id` the entry point.
    pub fn promote(&mut self, id: NodeId) {
        self.max_level = self.nodes[id as usize].level;
        self.entry_point = Some(id);
    }

    /// Spanning tree parent of `id` at layer 0.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id as usize].parent
    }

    /// Whether the layer-0 link between `a` and `b` belongs to the spanning tree.
    pub fn is_tree_edge(&self, a: NodeId, b: NodeId) -> bool {
        self.parent(a) == Some(b) || self.parent(b) == Some(a)
    }

    /// Tree children of `id`, in its layer-0 list order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.neighbors(id, 0)
            .iter()
            .copied()
            .filter(move |&n| self.parent(n) == Some(id))
    }

    /// Layer-0 list entries of `id` that eviction must keep.
    pub fn tree_degree(&self, id: NodeId) -> usize {
        self.neighbors(id, 0)
            .iter()
            .filter(|&&n| self.is_tree_edge(id, n))
            .count()
    }

    /// Position of the farthest entry in `owner`'s list at `layer` that may be
    /// dropped. Tree edges are pinned at layer 0.
    pub fn evictable(&self, owner: NodeId, layer: usize) -> Option<usize> {
        let list = self.neighbors(owner, layer);
        if layer > 0 {
            return list.len().checked_sub(1);
        }
        list.iter().rposition(|&n| !self.is_tree_edge(owner, n))
    }

    /// Structural checks: entry point, levels, neighbor ranges and degrees.
    ///
    /// Everything `check_invariants` verifies except reachability.
    pub fn validate_structure(&self, config: &HnswConfig) -> Result<()> {
        let count = self.nodes.len();

        match self.entry_point {
            None if count == 0 => return Ok(()),
            None => {
                return Err(HnswError::InvariantViolation(format!(
                    "{} nodes but no entry point",
                    count
                )))
            }
            Some(ep) if ep as usize >= count => {
                return Err(HnswError::InvariantViolation(format!(
                    "entry point {} out of range ({} nodes)",
                    ep, count
                )))
            }
            Some(_) => {}
        }

        for (i, node) in self.nodes.iter().enumerate() {
            if node.level as usize >= config.max_layers {
                return Err(HnswError::InvariantViolation(format!(
                    "node {} has level {} but max_layers is {}",
                    i, node.level, config.max_layers
                )));
            }
            if node.level > self.max_level {
                return Err(HnswError::InvariantViolation(format!(
                    "node {} has level {} above entry point level {}",
                    i, node.level, self.max_level
                )));
            }

            for (layer, neighbors) in node.layers.iter().enumerate() {
                let cap = config.max_degree(layer);
                if neighbors.len() > cap {
                    return Err(HnswError::InvariantViolation(format!(
                        "node {} has {} neighbors at layer {} (capacity {})",
                        i,
                        neighbors.len(),
                        layer,
                        cap
                    )));
                }
                for &n in neighbors.as_slice() {
                    if n as usize == i {
                        return Err(HnswError::InvariantViolation(format!(
                            "node {} links to itself at layer {}",
                            i, layer
                        )));
                    }
                    let Some(target) = self.nodes.get(n as usize) else {
                        return Err(HnswError::InvariantViolation(format!(
                            "node {} links to missing node {} at layer {}",
                            i, n, layer
                        )));
                    };
                    if (target.level as usize) < layer {
                        return Err(HnswError::InvariantViolation(format!(
                            "node {} links to node {} at layer {} above its level {}",
                            i, n, layer, target.level
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Nodes that cannot be reached from the entry point over layer-0 edges.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let Some(ep) = self.entry_point else {
            return Vec::new();
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        seen[ep as usize] = true;
        queue.push_back(ep);

        while let Some(id) = queue.pop_front() {
            for &n in self.neighbors(id, 0) {
                if !seen[n as usize] {
                    seen[n as usize] = true;
                    queue.push_back(n);
                }
            }
        }

        seen.iter()
            .enumerate()
            .filter(|&(_, &s)| !s)
            .map(|(i, _)| i as NodeId)
            .collect()
    }

    /// Rebuild the layer-0 spanning tree of a loaded graph by walking mutual
    /// links breadth-first from the entry point.
    ///
    /// Fails when some node is not connected to the entry point that way.
    /// Call after [`validate_structure`](Self::validate_structure).
    pub fn link_tree(&mut self) -> Result<()> {
        let Some(ep) = self.entry_point else {
            return Ok(());
        };

        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        let mut linked = 1;
        seen[ep as usize] = true;
        self.nodes[ep as usize].parent = None;
        queue.push_back(ep);

        while let Some(id) = queue.pop_front() {
            for i in 0..self.neighbors(id, 0).len() {
                let n = self.neighbors(id, 0)[i];
                if seen[n as usize] || !self.neighbors(n, 0).contains(&id) {
                    continue;
                }
                seen[n as usize] = true;
                self.nodes[n as usize].parent = Some(id);
                linked += 1;
                queue.push_back(n);
            }
        }

        if linked < self.nodes.len() {
            let first = seen.iter().position(|&s| !s).unwrap_or_default();
            return Err(HnswError::InvariantViolation(format!(
                "{} nodes not connected to the entry point by mutual layer-0 links (first: {})",
                self.nodes.len() - linked,
                first
            )));
        }
        Ok(())
    }
}
