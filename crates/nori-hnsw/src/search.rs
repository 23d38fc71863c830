//! Layered best-first search over the HNSW graph.
//!
//! All internal distances are squared L2; the square root is taken only when
//! results leave the engine. Ordering is identical either way.

use crate::graph::{Graph, NodeId};
use crate::store::VectorStore;
use nori_vector::{euclidean_distance_squared, VectorId, VectorMatch};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Candidate during search (node_id, squared distance to the query).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub node_id: NodeId,
    pub distance: f32,
}

impl Candidate {
    pub fn new(store: &VectorStore, query: &[f32], node_id: NodeId) -> Self {
        Self {
            node_id,
            distance: euclidean_distance_squared(query, store.vector(node_id)),
        }
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.node_id.cmp(&other.node_id))
    }
}

/// Walk downhill on one layer until no neighbor is closer than the current node.
pub(crate) fn greedy_closest(
    graph: &Graph,
    store: &VectorStore,
    query: &[f32],
    start: Candidate,
    layer: usize,
) -> Candidate {
    let mut current = start;
    loop {
        let mut improved = false;
        for &neighbor_id in graph.neighbors(current.node_id, layer) {
            let candidate = Candidate::new(store, query, neighbor_id);
            if candidate < current {
                current = candidate;
                improved = true;
            }
        }
        if !improved {
            return current;
        }
    }
}

/// Coarse localization: greedy descent from the entry point through layers
/// `top..=stop_above`, ending on the closest node found at `stop_above`.
///
/// Returns `None` for an empty graph.
pub(crate) fn descend(
    graph: &Graph,
    store: &VectorStore,
    query: &[f32],
    stop_above: usize,
) -> Option<Candidate> {
    let entry_point = graph.entry_point()?;
    let mut current = Candidate::new(store, query, entry_point);
    let top = graph.max_level() as usize;
    for layer in (stop_above..=top).rev() {
        current = greedy_closest(graph, store, query, current, layer);
    }
    Some(current)
}

/// Search a single layer for nearest neighbors.
///
/// Returns up to `ef` candidates sorted by distance (closest first).
pub(crate) fn search_layer(
    graph: &Graph,
    store: &VectorStore,
    query: &[f32],
    entry_points: &[Candidate],
    ef: usize,
    layer: usize,
) -> Vec<Candidate> {
    let ef = ef.max(1);
    // Min-heap for candidates (closest first)
    let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
    // Max-heap for results (furthest first, for pruning)
    let mut results: BinaryHeap<Candidate> = BinaryHeap::new();
    let mut visited: HashSet<NodeId> = HashSet::new();

    for &ep in entry_points {
        if visited.insert(ep.node_id) {
            candidates.push(Reverse(ep));
            results.push(ep);
        }
    }
    while results.len() > ef {
        results.pop();
    }

    while let Some(Reverse(current)) = candidates.pop() {
        // Stop once the closest unexplored candidate is worse than the worst kept result
        if results.len() >= ef {
            if let Some(worst) = results.peek() {
                if current > *worst {
                    break;
                }
            }
        }

        for &neighbor_id in graph.neighbors(current.node_id, layer) {
            if !visited.insert(neighbor_id) {
                continue;
            }

            let candidate = Candidate::new(store, query, neighbor_id);

            let should_add = results.len() < ef
                || results.peek().map(|w| candidate < *w).unwrap_or(true);

            if should_add {
                candidates.push(Reverse(candidate));
                results.push(candidate);
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    results.into_sorted_vec()
}

/// Approximate k-nearest neighbors of `query`, closest first.
///
/// The layer-0 beam is `max(ef, k)`. Returns at most `min(k, len)` matches;
/// `k == 0` and an empty graph both yield an empty list.
pub(crate) fn knn(
    graph: &Graph,
    store: &VectorStore,
    query: &[f32],
    k: usize,
    ef: usize,
) -> Vec<VectorMatch> {
    if k == 0 {
        return Vec::new();
    }
    let Some(entry) = descend(graph, store, query, 1) else {
        return Vec::new();
    };

    let found = search_layer(graph, store, query, &[entry], ef.max(k), 0);

    let mut matches: Vec<VectorMatch> = found
        .into_iter()
        .take(k)
        .map(|c| VectorMatch::new(c.node_id as VectorId, c.distance.sqrt()))
        .collect();
    // sqrt can merge nearly equal squared distances; restore the id tie-break
    matches.sort();
    matches
}
