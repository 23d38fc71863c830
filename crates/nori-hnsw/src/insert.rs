//! Insertion engine.
//!
//! An insert runs in two phases. [`plan`] only reads the graph: it localizes
//! the new vector, chooses its neighbors on every layer, and picks its parent
//! in the layer-0 spanning tree. [`commit`] then reserves all memory it needs
//! and applies the plan without any further fallible step, so a failed insert
//! leaves no trace.
//!
//! Planning may run under a shared lock as long as writers are serialized;
//! the graph cannot change between plan and commit.

use crate::config::HnswConfig;
use crate::error::{HnswError, Result};
use crate::graph::{Graph, Node, NodeId};
use crate::search::{descend, search_layer, Candidate};
use crate::store::VectorStore;
use nori_vector::euclidean_distance_squared;

/// Neighbor choices for one pending insert.
#[derive(Debug)]
pub(crate) struct InsertPlan {
    level: u8,
    /// Spanning tree parent; `None` for the first node.
    parent: Option<NodeId>,
    /// `(layer, neighbors closest first)`, top layer first. The layer-0 list
    /// always contains `parent`.
    links: Vec<(usize, Vec<NodeId>)>,
}

/// Outcome of a committed insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Inserted {
    pub id: NodeId,
    pub level: u8,
    /// The new node became the entry point.
    pub promoted: bool,
}

/// Localize `vector` and select its neighbors at every layer it will occupy.
pub(crate) fn plan(
    graph: &Graph,
    store: &VectorStore,
    config: &HnswConfig,
    vector: &[f32],
    level: u8,
) -> InsertPlan {
    let mut links = Vec::new();
    let level_usize = level as usize;

    // Greedy descent down to level + 1
    let Some(entry) = descend(graph, store, vector, level_usize + 1) else {
        return InsertPlan {
            level,
            parent: None,
            links,
        };
    };

    let top = level_usize.min(graph.max_level() as usize);
    let mut entry_points = vec![entry];
    for layer in (0..=top).rev() {
        let found = search_layer(
            graph,
            store,
            vector,
            &entry_points,
            config.ef_construction,
            layer,
        );
        let selected = select_neighbors(store, &found, config.max_degree(layer));
        links.push((layer, selected));
        entry_points = found;
    }

    // entry_points now holds the layer-0 candidates
    let parent = tree_parent(graph, store, config, vector, &entry_points, entry);
    if let Some((_, base)) = links.last_mut() {
        attach_parent(store, config, vector, base, parent);
    }

    InsertPlan {
        level,
        parent: Some(parent),
        links,
    }
}

/// Apply `plan`, appending `vector` as a new node.
///
/// Memory is reserved before the first mutation; on error nothing changed.
pub(crate) fn commit(
    graph: &mut Graph,
    store: &mut VectorStore,
    config: &HnswConfig,
    vector: &[f32],
    plan: InsertPlan,
) -> Result<Inserted> {
    let next = store.len();
    if next >= NodeId::MAX as usize {
        return Err(HnswError::ResourceExhausted(format!(
            "index holds the maximum of {} vectors",
            next
        )));
    }
    debug_assert_eq!(graph.len(), next);

    store.reserve_one()?;
    graph.reserve_one()?;
    let node = Node::try_new(plan.level, plan.parent, &plan.links)?;
    for (layer, selected) in &plan.links {
        for &owner in selected {
            graph.neighbors_mut(owner, *layer).reserve_one()?;
        }
    }

    // Nothing below can fail.
    let id = store.push(vector)?;
    let node_id = graph.push_node(node);
    debug_assert_eq!(id, node_id);

    for (layer, selected) in &plan.links {
        for &neighbor in selected {
            link_back(graph, store, config, neighbor, id, *layer);
        }
    }

    let promoted = graph.entry_point().is_none() || plan.level > graph.max_level();
    if promoted {
        graph.promote(id);
    }

    Ok(Inserted {
        id,
        level: plan.level,
        promoted,
    })
}

/// Add `new` to `owner`'s list at `layer`. If the list overflows, drop its
/// farthest entry that is not a layer-0 tree edge.
///
/// At most `capacity` entries of an overflowing list are pinned: the tree
/// parent was chosen with room to spare and any other owner gains an
/// unpinned entry.
fn link_back(
    graph: &mut Graph,
    store: &VectorStore,
    config: &HnswConfig,
    owner: NodeId,
    new: NodeId,
    layer: usize,
) {
    let owner_vec = store.vector(owner);
    let key = Candidate {
        node_id: new,
        distance: euclidean_distance_squared(owner_vec, store.vector(new)),
    };

    let pos = graph.neighbors(owner, layer).partition_point(|&n| {
        Candidate {
            node_id: n,
            distance: euclidean_distance_squared(owner_vec, store.vector(n)),
        } < key
    });
    graph.neighbors_mut(owner, layer).insert_at(pos, new);

    if graph.neighbors(owner, layer).len() > config.max_degree(layer) {
        if let Some(victim) = graph.evictable(owner, layer) {
            graph.neighbors_mut(owner, layer).remove_at(victim);
        }
    }
}

/// Closest layer-0 candidate that can take one more tree child. When all are
/// full, walk down the tree from the closest one; leaves always have room.
fn tree_parent(
    graph: &Graph,
    store: &VectorStore,
    config: &HnswConfig,
    vector: &[f32],
    candidates: &[Candidate],
    entry: Candidate,
) -> NodeId {
    let room = config.m_max0();
    if let Some(c) = candidates
        .iter()
        .find(|c| graph.tree_degree(c.node_id) < room)
    {
        return c.node_id;
    }

    let mut node = candidates.first().unwrap_or(&entry).node_id;
    while graph.tree_degree(node) >= room {
        let closest_child = graph
            .children(node)
            .map(|child| Candidate::new(store, vector, child))
            .min();
        match closest_child {
            Some(child) => node = child.node_id,
            None => break,
        }
    }
    node
}

/// Put `parent` into the new node's layer-0 list, dropping the farthest other
/// entry if that overflows it.
fn attach_parent(
    store: &VectorStore,
    config: &HnswConfig,
    vector: &[f32],
    base: &mut Vec<NodeId>,
    parent: NodeId,
) {
    if base.contains(&parent) {
        return;
    }
    let key = Candidate::new(store, vector, parent);
    let pos = base.partition_point(|&n| Candidate::new(store, vector, n) < key);
    base.insert(pos, parent);

    if base.len() > config.m_max0() {
        let last = base.len() - 1;
        let victim = if base[last] == parent { last - 1 } else { last };
        base.remove(victim);
    }
}

/// Diversity heuristic: keep a candidate only if it is closer to the new
/// vector than to every neighbor already kept, then top up with the closest
/// pruned candidates until half the capacity is used.
///
/// `candidates` must be sorted closest first; the result is too.
fn select_neighbors(store: &VectorStore, candidates: &[Candidate], capacity: usize) -> Vec<NodeId> {
    let mut selected: Vec<Candidate> = Vec::with_capacity(capacity.min(candidates.len()));
    let mut pruned: Vec<Candidate> = Vec::new();

    for &candidate in candidates {
        if selected.len() >= capacity {
            break;
        }
        let cand_vec = store.vector(candidate.node_id);
        let diverse = selected.iter().all(|kept| {
            euclidean_distance_squared(cand_vec, store.vector(kept.node_id)) > candidate.distance
        });
        if diverse {
            selected.push(candidate);
        } else {
            pruned.push(candidate);
        }
    }

    let floor = (capacity / 2).max(1).min(capacity);
    for candidate in pruned {
        if selected.len() >= floor {
            break;
        }
        selected.push(candidate);
    }

    selected.sort();
    selected.into_iter().map(|c| c.node_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LevelGenerator;
    use crate::search::knn;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config() -> HnswConfig {
        HnswConfig {
            max_connections: 4,
            ef_construction: 32,
            ef_search: 16,
            max_layers: 6,
            seed: Some(11),
        }
    }

    fn insert(
        graph: &mut Graph,
        store: &mut VectorStore,
        config: &HnswConfig,
        vector: &[f32],
        level: u8,
    ) -> Inserted {
        let p = plan(graph, store, config, vector, level);
        commit(graph, store, config, vector, p).unwrap()
    }

    #[test]
    fn test_first_insert_becomes_entry_point() {
        let cfg = config();
        let mut graph = Graph::new();
        let mut store = VectorStore::new(2);

        let first = insert(&mut graph, &mut store, &cfg, &[0.0, 0.0], 2);
        assert_eq!(first.id, 0);
        assert!(first.promoted);
        assert_eq!(graph.entry_point(), Some(0));
        assert_eq!(graph.max_level(), 2);

        let second = insert(&mut graph, &mut store, &cfg, &[1.0, 0.0], 0);
        assert_eq!(second.id, 1);
        assert!(!second.promoted);
        assert_eq!(graph.neighbors(1, 0), &[0]);
        assert_eq!(graph.neighbors(0, 0), &[1]);

        let third = insert(&mut graph, &mut store, &cfg, &[2.0, 0.0], 3);
        assert!(third.promoted);
        assert_eq!(graph.entry_point(), Some(2));
        assert_eq!(graph.max_level(), 3);
    }

    #[test]
    fn test_backlinks_respect_capacity() {
        let cfg = config();
        let mut graph = Graph::new();
        let mut store = VectorStore::new(2);
        let mut levels = LevelGenerator::new(&cfg);

        for i in 0..200 {
            let v = [(i % 20) as f32, (i / 20) as f32];
            let level = levels.next_level();
            insert(&mut graph, &mut store, &cfg, &v, level);
        }

        graph.validate_structure(&cfg).unwrap();
        for id in 0..graph.len() as NodeId {
            for (layer, neighbors) in graph.nodes()[id as usize].layers().iter().enumerate() {
                assert!(neighbors.len() <= cfg.max_degree(layer));
            }
        }
    }

    #[test]
    fn test_neighbor_lists_sorted_by_distance() {
        let cfg = config();
        let mut graph = Graph::new();
        let mut store = VectorStore::new(1);

        for i in 0..9 {
            insert(&mut graph, &mut store, &cfg, &[i as f32], 0);
        }

        for id in 0..graph.len() as NodeId {
            let me = store.vector(id)[0];
            let dists: Vec<f32> = graph
                .neighbors(id, 0)
                .iter()
                .map(|&n| (store.vector(n)[0] - me).abs())
                .collect();
            for pair in dists.windows(2) {
                assert!(pair[0] <= pair[1], "node {} list {:?}", id, dists);
            }
        }
    }

    #[test]
    fn test_small_graph_fully_reachable_and_self_match() {
        let cfg = config();
        let mut graph = Graph::new();
        let mut store = VectorStore::new(3);
        let mut levels = LevelGenerator::new(&cfg);

        let points: Vec<[f32; 3]> = (0..9)
            .map(|i| [i as f32, (i * i % 7) as f32, (i % 3) as f32])
            .collect();
        for p in &points {
            let level = levels.next_level();
            insert(&mut graph, &mut store, &cfg, p, level);
        }

        assert!(graph.unreachable_nodes().is_empty());
        for (i, p) in points.iter().enumerate() {
            let hits = knn(&graph, &store, p, 1, cfg.ef_search);
            assert_eq!(hits[0].id, i as u64);
            assert!(hits[0].distance < 1e-6);
        }
    }

    fn random_points(n: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dims).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    fn build(cfg: &HnswConfig, points: &[Vec<f32>]) -> (Graph, VectorStore) {
        let mut graph = Graph::new();
        let mut store = VectorStore::new(points[0].len());
        let mut levels = LevelGenerator::new(cfg);
        for p in points {
            let level = levels.next_level();
            insert(&mut graph, &mut store, cfg, p, level);
        }
        (graph, store)
    }

    #[test]
    fn test_small_m_keeps_every_node_reachable() {
        for m in [1, 2, 4] {
            let cfg = HnswConfig {
                max_connections: m,
                max_layers: 8,
                seed: Some(m as u64),
                ..config()
            };
            let points = random_points(600, 4, 40 + m as u64);
            let (graph, store) = build(&cfg, &points);

            graph.validate_structure(&cfg).unwrap();
            assert!(graph.unreachable_nodes().is_empty(), "M={}", m);

            let mut roots = 0;
            for id in 0..graph.len() as NodeId {
                assert!(graph.tree_degree(id) <= cfg.m_max0(), "M={} node {}", m, id);
                match graph.parent(id) {
                    Some(p) => {
                        assert!(graph.neighbors(id, 0).contains(&p));
                        assert!(graph.neighbors(p, 0).contains(&id));
                    }
                    None => roots += 1,
                }
            }
            assert_eq!(roots, 1);

            // A beam as wide as the graph visits every reachable node
            for (i, p) in points.iter().enumerate() {
                let hits = knn(&graph, &store, p, 1, points.len());
                assert_eq!(hits[0].id, i as u64, "M={}", m);
                assert!(hits[0].distance < 1e-6);
            }
        }
    }

    #[test]
    fn test_lists_sized_by_degree() {
        let cfg = HnswConfig {
            max_connections: 65_535,
            ef_construction: 16,
            max_layers: 4,
            seed: Some(3),
            ..config()
        };
        let (graph, _) = build(&cfg, &random_points(300, 4, 9));

        for node in graph.nodes() {
            for neighbors in node.layers() {
                let allocated = neighbors.allocated();
                assert!(
                    allocated <= (2 * neighbors.len()).max(4),
                    "{} slots for {} neighbors",
                    allocated,
                    neighbors.len()
                );
            }
        }
    }

    #[test]
    fn test_parent_added_to_full_list() {
        let cfg = HnswConfig {
            max_connections: 1,
            ..config()
        };
        let mut store = VectorStore::new(1);
        for x in [0.0, 1.0, 2.0, 3.0] {
            store.push(&[x]).unwrap();
        }

        // Capacity 2: the farthest non-parent entry makes way
        let mut base = vec![1, 2];
        attach_parent(&store, &cfg, &[0.0], &mut base, 3);
        assert_eq!(base, vec![1, 3]);

        let mut base = vec![1, 3];
        attach_parent(&store, &cfg, &[0.0], &mut base, 3);
        assert_eq!(base, vec![1, 3]);

        let mut base = vec![2];
        attach_parent(&store, &cfg, &[0.0], &mut base, 1);
        assert_eq!(base, vec![1, 2]);
    }

    #[test]
    fn test_select_neighbors_prefers_diverse() {
        // New vector at origin; 1 and 2 sit together on the right, 3 on the left
        let mut store = VectorStore::new(2);
        store.push(&[0.0, 0.0]).unwrap(); // 0 (unused)
        store.push(&[1.0, 0.0]).unwrap(); // 1
        store.push(&[1.1, 0.0]).unwrap(); // 2
        store.push(&[-1.5, 0.0]).unwrap(); // 3

        let query = [0.0, 0.0];
        let mut candidates: Vec<Candidate> = [1, 2, 3]
            .iter()
            .map(|&id| Candidate::new(&store, &query, id))
            .collect();
        candidates.sort();

        // capacity 2: heuristic keeps 1 and 3, skipping 2 (closer to 1 than to query)
        assert_eq!(select_neighbors(&store, &candidates, 2), vec![1, 3]);

        // capacity 6: half capacity is 3, so the pruned 2 is added back
        assert_eq!(select_neighbors(&store, &candidates, 6), vec![1, 2, 3]);
    }
}
