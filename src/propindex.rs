//! Per-shard property index (SPEC_FULL §4, the concrete shape of spec.md
//! §2's "Property index builder/reader" row): a `globalId -> [(propKey,
//! LWW snapshot)]` map per shard, stored as `props_XX.cbor`, sufficient to
//! answer point lookups without touching the full [`State`].
//!
//! Edge properties are filed under the edge's `from` node's global id,
//! mirroring the forward-bucket convention in [`crate::shard`] (the source
//! node's shard owns the edge's outgoing data).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::keycodec::{decode_prop_key, PropKey};
use crate::lww::Lww;
use crate::patch::PropValue;
use crate::shard::{shard_key, ShardIndex};
use crate::state::State;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub entries: BTreeMap<u32, Vec<(String, Lww<PropValue>)>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyIndex {
    pub shards: BTreeMap<String, PropertySnapshot>,
}

impl PropertyIndex {
    pub fn lookup(&self, shard: &str, global_id: u32, key: &str) -> Option<&PropValue> {
        self.shards
            .get(shard)?
            .entries
            .get(&global_id)?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, reg)| &reg.value)
    }
}

/// Builds the property index from `state`, resolving owners through
/// `shard_index`'s already-assigned global ids. Only properties of
/// currently-alive nodes/edges are included.
pub fn build(state: &State, shard_index: &ShardIndex) -> PropertyIndex {
    let mut shards: BTreeMap<String, PropertySnapshot> = BTreeMap::new();

    for (prop_key, reg) in &state.prop {
        let Some(decoded) = decode_prop_key(prop_key) else {
            continue;
        };
        let (owner_node, key) = match decoded {
            PropKey::Node { node, key } => {
                if !state.is_node_alive(node) {
                    continue;
                }
                (node, key)
            }
            PropKey::Edge { from, to, label, key } => {
                let edge_key = crate::keycodec::encode_edge_key(from, to, label);
                if !state.is_edge_alive(&edge_key) {
                    continue;
                }
                (from, key)
            }
        };

        let shard = shard_key(owner_node);
        let Some(global_id) = shard_index
            .shards
            .get(&shard)
            .and_then(|s| s.meta.nodes.iter().find(|(n, _)| n == owner_node))
            .map(|(_, g)| *g)
        else {
            continue;
        };

        shards
            .entry(shard)
            .or_default()
            .entries
            .entry(global_id)
            .or_default()
            .push((key.to_string(), reg.clone()));
    }

    for snapshot in shards.values_mut() {
        for entries in snapshot.entries.values_mut() {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }
    }

    PropertyIndex { shards }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::patch::{Op, Patch};
    use crate::reduce::{apply_with_diff, reduce as fold, ReduceOptions};

    #[test]
    fn node_property_is_reachable_through_the_index() {
        let mut state = State::new();
        let out = fold(
            Some(std::mem::take(&mut state)),
            &[(
                Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]),
                "sha1".to_string(),
            )],
            ReduceOptions::StateOnly,
        )
        .unwrap();
        let mut state = out.into_state();
        let patch = Patch::new(
            "w",
            2,
            vec![Op::PropSet { node: "A".into(), key: "name".into(), value: PropValue::Blob { id: "x".into() } }],
        );
        apply_with_diff(&mut state, &patch, "sha2").unwrap();

        let shard_index = crate::shard::build(&state, None).unwrap();
        let index = build(&state, &shard_index);

        let shard = shard_key("A");
        let global_id = shard_index.shards[&shard]
            .meta
            .nodes
            .iter()
            .find(|(n, _)| n == "A")
            .unwrap()
            .1;
        assert_eq!(
            index.lookup(&shard, global_id, "name"),
            Some(&PropValue::Blob { id: "x".into() })
        );
    }

    #[test]
    fn properties_of_dead_nodes_are_excluded() {
        let mut state = State::new();
        let dot = Dot::new("w", 1);
        let patch = Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: dot.clone() }]);
        apply_with_diff(&mut state, &patch, "sha1").unwrap();
        let prop_patch = Patch::new(
            "w",
            2,
            vec![Op::PropSet { node: "A".into(), key: "k".into(), value: PropValue::Blob { id: "1".into() } }],
        );
        apply_with_diff(&mut state, &prop_patch, "sha2").unwrap();
        let remove_patch = Patch::new("w", 3, vec![Op::NodeRemove { node: "A".into(), observed_dots: vec![dot] }]);
        apply_with_diff(&mut state, &remove_patch, "sha3").unwrap();

        let shard_index = crate::shard::build(&state, None).unwrap();
        let index = build(&state, &shard_index);
        assert!(index.shards.values().all(|s| s.entries.is_empty()));
    }
}
