//! Materialized view service (spec §4.4): builds or incrementally updates
//! the sharded bitmap index and property index from a [`State`], and
//! persists/reloads both through an [`ObjectStore`].
//!
//! Shard filenames follow spec §6 with one consolidation: `meta_XX`,
//! `fwd_XX`, and `rev_XX` are stored together as a single `shard_XX.cbor`
//! blob (the bundled [`ShardData`] [`crate::reader::ShardReader`] already
//! treats as one unit) rather than three separate files — recorded in
//! DESIGN.md.

use std::collections::BTreeMap;

use crate::codec::{CborCodec, Codec};
use crate::error::{GraphError, Result};
use crate::propindex::{self, PropertyIndex, PropertySnapshot};
use crate::reader::{unwrap_shard, wrap_shard};
use crate::shard::{self, LabelRegistry, ShardIndex};
use crate::state::{Diff, State};
use crate::store::{ObjectStore, TreeEntries};

fn shard_file(key: &str) -> String {
    format!("shard_{key}.cbor")
}

fn props_file(key: &str) -> String {
    format!("props_{key}.cbor")
}

/// A fully built or incrementally updated view: the two indexes the
/// traversal engine and property lookups consult.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub shard_index: ShardIndex,
    pub property_index: PropertyIndex,
}

/// Full rebuild from scratch (spec §4.4 `build`).
pub fn build(state: &State) -> Result<View> {
    let shard_index = shard::build(state, None)?;
    let property_index = propindex::build(state, &shard_index);
    Ok(View { shard_index, property_index })
}

/// Incremental update against a diff and the prior view (spec §4.4
/// `applyDiff`). The property index is always rebuilt wholesale from
/// `state`; it is cheap relative to the bitmap rebuild and has no partial-
/// update path of its own.
pub fn apply_diff(prior: &View, diff: &Diff, state: &State) -> Result<View> {
    let shard_index = shard::apply_diff(&prior.shard_index, diff, state)?;
    let property_index = propindex::build(state, &shard_index);
    Ok(View { shard_index, property_index })
}

/// Writes every shard file, the label registry, and the receipt into a new
/// tree, returning its oid (spec §4.4 `persistIndexTree`).
pub fn persist_index_tree(store: &dyn ObjectStore, view: &View) -> Result<String> {
    let codec = CborCodec;
    let mut entries: TreeEntries = BTreeMap::new();

    for (key, data) in &view.shard_index.shards {
        let bytes = wrap_shard(data, &codec)?;
        let oid = store.write_blob(&bytes)?;
        entries.insert(shard_file(key), oid);
    }
    for (key, snapshot) in &view.property_index.shards {
        let bytes = wrap_shard(snapshot, &codec)?;
        let oid = store.write_blob(&bytes)?;
        entries.insert(props_file(key), oid);
    }

    let labels_bytes = wrap_shard(&view.shard_index.labels, &codec)?;
    entries.insert("labels.cbor".to_string(), store.write_blob(&labels_bytes)?);

    let receipt_bytes = wrap_shard(&view.shard_index.receipt(), &codec)?;
    entries.insert("receipt.cbor".to_string(), store.write_blob(&receipt_bytes)?);

    store.write_tree(&entries)
}

/// Reloads a [`View`] from a previously persisted index tree's oid map
/// (spec §4.4 `loadFromOids`). Missing shard/props files are treated as
/// empty shards rather than errors — a shard with no alive nodes at build
/// time is never written (spec §4.3 mirrors this in [`crate::reader::ShardReader`]).
pub fn load_from_oids(store: &dyn ObjectStore, shard_oids: &TreeEntries) -> Result<View> {
    let codec = CborCodec;
    let mut shards = BTreeMap::new();
    let mut props = BTreeMap::new();

    for (path, oid) in shard_oids {
        if let Some(key) = path.strip_prefix("shard_").and_then(|s| s.strip_suffix(".cbor")) {
            let bytes = store.read_blob(oid)?;
            shards.insert(key.to_string(), unwrap_shard(&bytes, &codec, key)?);
        } else if let Some(key) = path.strip_prefix("props_").and_then(|s| s.strip_suffix(".cbor")) {
            let bytes = store.read_blob(oid)?;
            let snapshot: PropertySnapshot = unwrap_shard(&bytes, &codec, key)?;
            props.insert(key.to_string(), snapshot);
        }
    }

    let labels = match shard_oids.get("labels.cbor") {
        Some(oid) => {
            let bytes = store.read_blob(oid)?;
            unwrap_shard(&bytes, &codec, "labels")?
        }
        None => LabelRegistry::new(),
    };

    let id_tables = rebuild_id_tables(&shards);
    let shard_index = ShardIndex { shards, labels, id_tables };
    let property_index = PropertyIndex { shards: props };
    Ok(View { shard_index, property_index })
}

/// Reconstructs the continuity bookkeeping ([`ShardIndex`]'s private
/// `id_tables`) from persisted shard metadata, since that field is
/// intentionally not serialized (spec §4.3 "Global id assignment" — the
/// table is a cache over `meta`'s `(nodeId, globalId)` pairs, not
/// independent state).
fn rebuild_id_tables(
    shards: &BTreeMap<String, crate::shard::ShardData>,
) -> BTreeMap<String, crate::shard::ShardIdState> {
    shards
        .iter()
        .map(|(key, data)| (key.clone(), crate::shard::ShardIdState::from_meta(&data.meta)))
        .collect()
}

/// Samples alive nodes in `state` and asserts the index's neighbor set
/// matches ground-truth adjacency derived straight from `state` (spec §4.4
/// `verifyIndex`). Returns the list of node ids that failed to match; an
/// empty list means the index is verified clean.
pub fn verify_index(state: &State, shard_index: &ShardIndex, sample_size: Option<usize>) -> Result<Vec<String>> {
    use crate::neighbor::{AdjacencyMapProvider, BitmapNeighborProvider, Direction, NeighborOptions, NeighborProvider};

    let adjacency = AdjacencyMapProvider::from_state(state);
    let bitmap = BitmapNeighborProvider::new(shard_index);

    let mut alive: Vec<&String> = state.node_alive.alive_keys().collect();
    alive.sort();
    if let Some(limit) = sample_size {
        alive.truncate(limit);
    }

    let mut mismatches = Vec::new();
    for node in alive {
        for direction in [Direction::Out, Direction::In, Direction::Both] {
            let expected = adjacency.get_neighbors(node, direction, &NeighborOptions::default())?;
            let actual = bitmap.get_neighbors(node, direction, &NeighborOptions::default())?;
            if expected != actual {
                mismatches.push(node.clone());
                break;
            }
        }
    }
    Ok(mismatches)
}

/// Fails loudly if a cached checkpoint-index tree would overwrite a freshly
/// built index — the historical regression spec §9 warns reimplementers
/// about. Callers that seed a cache from a checkpoint hint must route the
/// result through this guard rather than assigning it directly.
pub fn guard_against_stale_cache(fresh: &View, cached_hint: Option<&View>) -> Result<()> {
    if let Some(hint) = cached_hint {
        if hint.shard_index.receipt().node_count > fresh.shard_index.receipt().node_count {
            return Err(GraphError::StorageError {
                message: "cached checkpoint index is staler than the freshly built index".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::patch::{Op, Patch};
    use crate::reduce::{reduce as fold, ReduceOptions};
    use crate::store::MemoryObjectStore;

    fn sample_state() -> State {
        let patches = vec![
            (Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]), "s1".to_string()),
            (Patch::new("w", 2, vec![Op::NodeAdd { node: "B".into(), dot: Dot::new("w", 2) }]), "s2".to_string()),
            (
                Patch::new("w", 3, vec![Op::EdgeAdd { from: "A".into(), to: "B".into(), label: "knows".into(), dot: Dot::new("w", 3) }]),
                "s3".to_string(),
            ),
            (
                Patch::new("w", 4, vec![Op::PropSet { node: "A".into(), key: "name".into(), value: crate::patch::PropValue::Blob { id: "x".into() } }]),
                "s4".to_string(),
            ),
        ];
        fold(None, &patches, ReduceOptions::StateOnly).unwrap().into_state()
    }

    #[test]
    fn build_then_persist_then_reload_round_trips() {
        let state = sample_state();
        let view = build(&state).unwrap();
        let store = MemoryObjectStore::new();
        let tree_oid = persist_index_tree(&store, &view).unwrap();
        let oids = store.read_tree_oids(&tree_oid).unwrap();
        let reloaded = load_from_oids(&store, &oids).unwrap();

        assert_eq!(reloaded.shard_index.shards, view.shard_index.shards);
        assert_eq!(reloaded.shard_index.labels, view.shard_index.labels);
        assert_eq!(reloaded.property_index, view.property_index);
    }

    #[test]
    fn verify_index_reports_no_mismatches_on_a_fresh_build() {
        let state = sample_state();
        let view = build(&state).unwrap();
        let mismatches = verify_index(&state, &view.shard_index, None).unwrap();
        assert!(mismatches.is_empty());
    }

    #[test]
    fn apply_diff_matches_full_rebuild() {
        let mut state = State::new();
        let patch1 = Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]);
        let diff1 = crate::reduce::apply_with_diff(&mut state, &patch1, "sha1").unwrap();
        let view1 = build(&state).unwrap();

        let patch2 = Patch::new("w", 2, vec![Op::NodeAdd { node: "B".into(), dot: Dot::new("w", 2) }]);
        let diff2 = crate::reduce::apply_with_diff(&mut state, &patch2, "sha2").unwrap();
        let incremental = apply_diff(&view1, &diff2, &state).unwrap();
        let full = build(&state).unwrap();

        assert_eq!(incremental.shard_index.shards, full.shard_index.shards);
        let _ = diff1;
    }
}
