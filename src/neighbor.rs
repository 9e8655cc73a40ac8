//! The neighbor provider port (spec §4.5) and its two canonical
//! implementations: an in-memory adjacency map over a [`State`], and a
//! bitmap-backed provider over a [`ShardIndex`].

use std::collections::BTreeMap;

use crate::error::Result;
use crate::keycodec::decode_edge_key;
use crate::shard::ShardIndex;
use crate::state::State;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LatencyClass {
    Sync,
    AsyncLocal,
    AsyncRemote,
}

#[derive(Clone, Debug, Default)]
pub struct NeighborOptions {
    /// Restrict results to these labels; `None` means every label.
    pub labels: Option<Vec<String>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Neighbor {
    pub node_id: String,
    pub label: String,
}

/// A single abstraction over "what is node X connected to" so the
/// traversal engine never has to know whether it is walking an in-memory
/// adjacency map or a sharded bitmap index (spec §4.5).
pub trait NeighborProvider {
    /// Sorted by `(neighborId, label)`, strict codepoint comparison.
    /// `Both` unions out- and in-edges, deduplicated by `(neighborId,
    /// label)`, with directionality deliberately erased.
    fn get_neighbors(&self, node_id: &str, direction: Direction, options: &NeighborOptions) -> Result<Vec<Neighbor>>;
    fn has_node(&self, node_id: &str) -> bool;
    fn latency_class(&self) -> LatencyClass;
}

fn matches_filter(label: &str, filter: &Option<Vec<String>>) -> bool {
    match filter {
        None => true,
        Some(labels) => labels.iter().any(|l| l == label),
    }
}

fn dedup_sorted(mut neighbors: Vec<Neighbor>) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| (a.node_id.as_str(), a.label.as_str()).cmp(&(b.node_id.as_str(), b.label.as_str())));
    neighbors.dedup();
    neighbors
}

/// In-memory adjacency provider built once from a materialized [`State`]
/// (spec §4.5 "adjacency-map provider").
pub struct AdjacencyMapProvider {
    out: BTreeMap<String, Vec<Neighbor>>,
    incoming: BTreeMap<String, Vec<Neighbor>>,
    alive_nodes: std::collections::BTreeSet<String>,
}

impl AdjacencyMapProvider {
    pub fn from_state(state: &State) -> Self {
        let mut out: BTreeMap<String, Vec<Neighbor>> = BTreeMap::new();
        let mut incoming: BTreeMap<String, Vec<Neighbor>> = BTreeMap::new();
        for edge_key in state.edge_alive.alive_keys() {
            let Some((from, to, label)) = decode_edge_key(edge_key) else {
                continue;
            };
            out.entry(from.to_string())
                .or_default()
                .push(Neighbor { node_id: to.to_string(), label: label.to_string() });
            incoming
                .entry(to.to_string())
                .or_default()
                .push(Neighbor { node_id: from.to_string(), label: label.to_string() });
        }
        for list in out.values_mut().chain(incoming.values_mut()) {
            list.sort();
        }
        let alive_nodes = state.node_alive.alive_keys().cloned().collect();
        Self { out, incoming, alive_nodes }
    }
}

impl NeighborProvider for AdjacencyMapProvider {
    fn get_neighbors(&self, node_id: &str, direction: Direction, options: &NeighborOptions) -> Result<Vec<Neighbor>> {
        let filtered = |map: &BTreeMap<String, Vec<Neighbor>>| -> Vec<Neighbor> {
            map.get(node_id)
                .into_iter()
                .flatten()
                .filter(|n| matches_filter(&n.label, &options.labels))
                .cloned()
                .collect()
        };
        Ok(match direction {
            Direction::Out => filtered(&self.out),
            Direction::In => filtered(&self.incoming),
            Direction::Both => {
                let mut combined = filtered(&self.out);
                combined.extend(filtered(&self.incoming));
                dedup_sorted(combined)
            }
        })
    }

    fn has_node(&self, node_id: &str) -> bool {
        self.alive_nodes.contains(node_id)
    }

    fn latency_class(&self) -> LatencyClass {
        LatencyClass::Sync
    }
}

/// Bitmap-backed provider over §4.3's sharded index.
pub struct BitmapNeighborProvider<'a> {
    index: &'a ShardIndex,
    global_to_node: BTreeMap<u32, String>,
}

impl<'a> BitmapNeighborProvider<'a> {
    pub fn new(index: &'a ShardIndex) -> Self {
        let mut global_to_node = BTreeMap::new();
        for shard in index.shards.values() {
            for (node, global_id) in &shard.meta.nodes {
                global_to_node.insert(*global_id, node.clone());
            }
        }
        Self { index, global_to_node }
    }

    /// Unfiltered case: `shard.rs`'s `rebuild()` writes `"all"` as the union
    /// of every per-label bucket for an owner (spec §4.3's "all-edges
    /// bucket"), so a missing/empty `"all"` entry means this owner has no
    /// edges in this direction at all — one bucket read short-circuits the
    /// rest of the scan instead of probing every per-label bucket first.
    /// When `"all"` does have members, the per-label buckets actually
    /// written into *this* shard/direction's map are enumerated (bounded by
    /// labels present here, not by `self.index.labels`'s whole-graph
    /// registry) to recover each neighbor's real label — the `"all"` bucket
    /// itself carries no per-member label, so it cannot answer `getNeighbors`
    /// on its own without collapsing distinct labels together.
    fn collect(&self, global_id: u32, buckets: &crate::shard::Buckets, filter: &Option<Vec<String>>) -> Vec<Neighbor> {
        let owner_key = global_id.to_string();
        let mut out = Vec::new();
        match filter {
            None => {
                let has_any = buckets
                    .0
                    .get(crate::shard::ALL_BUCKET)
                    .map(|owners| owners.contains_key(&owner_key))
                    .unwrap_or(false);
                if !has_any {
                    return out;
                }
                for (bucket_key, owners) in &buckets.0 {
                    if bucket_key == crate::shard::ALL_BUCKET {
                        continue;
                    }
                    let Some(label_name) = bucket_key.parse::<u32>().ok().and_then(|id| self.index.labels.name_of(id)) else {
                        continue;
                    };
                    let Some(members) = owners.get(&owner_key) else {
                        continue;
                    };
                    for member in members.0.iter() {
                        if let Some(node_id) = self.global_to_node.get(&member) {
                            out.push(Neighbor { node_id: node_id.clone(), label: label_name.to_string() });
                        }
                    }
                }
            }
            Some(labels) => {
                for label in labels {
                    let Some(label_id) = self.index.labels.id_of(label) else {
                        continue;
                    };
                    let Some(members) = buckets.0.get(&label_id.to_string()).and_then(|m| m.get(&owner_key)) else {
                        continue;
                    };
                    for member in members.0.iter() {
                        if let Some(node_id) = self.global_to_node.get(&member) {
                            out.push(Neighbor { node_id: node_id.clone(), label: label.clone() });
                        }
                    }
                }
            }
        }
        out
    }
}

impl<'a> NeighborProvider for BitmapNeighborProvider<'a> {
    fn get_neighbors(&self, node_id: &str, direction: Direction, options: &NeighborOptions) -> Result<Vec<Neighbor>> {
        let Some((shard, global_id)) = self.index.global_id_of(node_id) else {
            return Ok(Vec::new());
        };
        let Some(shard_data) = self.index.shards.get(&shard) else {
            return Ok(Vec::new());
        };
        let mut neighbors = match direction {
            Direction::Out => self.collect(global_id, &shard_data.fwd, &options.labels),
            Direction::In => self.collect(global_id, &shard_data.rev, &options.labels),
            Direction::Both => {
                let mut combined = self.collect(global_id, &shard_data.fwd, &options.labels);
                combined.extend(self.collect(global_id, &shard_data.rev, &options.labels));
                combined
            }
        };
        neighbors.sort();
        neighbors.dedup();
        Ok(neighbors)
    }

    fn has_node(&self, node_id: &str) -> bool {
        self.index.global_id_of(node_id).map(|(shard, global_id)| {
            self.index.shards.get(&shard).map(|s| s.meta.alive.0.contains(global_id)).unwrap_or(false)
        }).unwrap_or(false)
    }

    fn latency_class(&self) -> LatencyClass {
        LatencyClass::AsyncLocal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::patch::{Op, Patch};
    use crate::reduce::{reduce as fold, ReduceOptions};

    fn build_state() -> State {
        let patches = vec![
            (Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]), "s1".to_string()),
            (Patch::new("w", 2, vec![Op::NodeAdd { node: "B".into(), dot: Dot::new("w", 2) }]), "s2".to_string()),
            (Patch::new("w", 3, vec![Op::NodeAdd { node: "C".into(), dot: Dot::new("w", 3) }]), "s3".to_string()),
            (
                Patch::new("w", 4, vec![Op::EdgeAdd { from: "A".into(), to: "B".into(), label: "knows".into(), dot: Dot::new("w", 4) }]),
                "s4".to_string(),
            ),
            (
                Patch::new("w", 5, vec![Op::EdgeAdd { from: "A".into(), to: "C".into(), label: "likes".into(), dot: Dot::new("w", 5) }]),
                "s5".to_string(),
            ),
        ];
        fold(None, &patches, ReduceOptions::StateOnly).unwrap().into_state()
    }

    #[test]
    fn adjacency_map_out_neighbors_sorted_by_node_then_label() {
        let state = build_state();
        let provider = AdjacencyMapProvider::from_state(&state);
        let neighbors = provider.get_neighbors("A", Direction::Out, &NeighborOptions::default()).unwrap();
        assert_eq!(
            neighbors,
            vec![
                Neighbor { node_id: "B".into(), label: "knows".into() },
                Neighbor { node_id: "C".into(), label: "likes".into() },
            ]
        );
    }

    #[test]
    fn adjacency_map_label_filter() {
        let state = build_state();
        let provider = AdjacencyMapProvider::from_state(&state);
        let options = NeighborOptions { labels: Some(vec!["likes".into()]) };
        let neighbors = provider.get_neighbors("A", Direction::Out, &options).unwrap();
        assert_eq!(neighbors, vec![Neighbor { node_id: "C".into(), label: "likes".into() }]);
    }

    #[test]
    fn bitmap_and_adjacency_agree_on_every_alive_node() {
        let state = build_state();
        let index = crate::shard::build(&state, None).unwrap();
        let adjacency = AdjacencyMapProvider::from_state(&state);
        let bitmap = BitmapNeighborProvider::new(&index);

        for node in ["A", "B", "C"] {
            for direction in [Direction::Out, Direction::In, Direction::Both] {
                let a = adjacency.get_neighbors(node, direction, &NeighborOptions::default()).unwrap();
                let b = bitmap.get_neighbors(node, direction, &NeighborOptions::default()).unwrap();
                assert_eq!(a, b, "mismatch for {node:?} direction {direction:?}");
            }
        }
    }

    /// Regression for the unfiltered bitmap path: a node with out-edges
    /// under three distinct labels must still report each edge's real
    /// label, not the `"all"` bucket's own key, and must agree with the
    /// adjacency provider exactly (spec §8).
    #[test]
    fn bitmap_unfiltered_neighbors_keep_distinct_labels_across_more_than_two() {
        let patches = vec![
            (Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]), "s1".to_string()),
            (Patch::new("w", 2, vec![Op::NodeAdd { node: "B".into(), dot: Dot::new("w", 2) }]), "s2".to_string()),
            (Patch::new("w", 3, vec![Op::NodeAdd { node: "C".into(), dot: Dot::new("w", 3) }]), "s3".to_string()),
            (Patch::new("w", 4, vec![Op::NodeAdd { node: "D".into(), dot: Dot::new("w", 4) }]), "s4".to_string()),
            (
                Patch::new("w", 5, vec![Op::EdgeAdd { from: "A".into(), to: "B".into(), label: "knows".into(), dot: Dot::new("w", 5) }]),
                "s5".to_string(),
            ),
            (
                Patch::new("w", 6, vec![Op::EdgeAdd { from: "A".into(), to: "C".into(), label: "likes".into(), dot: Dot::new("w", 6) }]),
                "s6".to_string(),
            ),
            (
                Patch::new("w", 7, vec![Op::EdgeAdd { from: "A".into(), to: "D".into(), label: "blocks".into(), dot: Dot::new("w", 7) }]),
                "s7".to_string(),
            ),
        ];
        let state = fold(None, &patches, ReduceOptions::StateOnly).unwrap().into_state();
        let index = crate::shard::build(&state, None).unwrap();
        let adjacency = AdjacencyMapProvider::from_state(&state);
        let bitmap = BitmapNeighborProvider::new(&index);

        let expected = adjacency.get_neighbors("A", Direction::Out, &NeighborOptions::default()).unwrap();
        assert_eq!(expected.len(), 3, "fixture sanity: three distinct labels out of A");
        let actual = bitmap.get_neighbors("A", Direction::Out, &NeighborOptions::default()).unwrap();
        assert_eq!(actual, expected);
        assert!(actual.iter().all(|n| n.label != crate::shard::ALL_BUCKET));
    }

    #[test]
    fn bitmap_unfiltered_neighbors_of_a_node_with_no_edges_is_empty() {
        let patches = vec![(Patch::new("w", 1, vec![Op::NodeAdd { node: "Z".into(), dot: Dot::new("w", 1) }]), "s1".to_string())];
        let state = fold(None, &patches, ReduceOptions::StateOnly).unwrap().into_state();
        let index = crate::shard::build(&state, None).unwrap();
        let bitmap = BitmapNeighborProvider::new(&index);
        let neighbors = bitmap.get_neighbors("Z", Direction::Both, &NeighborOptions::default()).unwrap();
        assert!(neighbors.is_empty());
    }
}
