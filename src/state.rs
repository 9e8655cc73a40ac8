//! The materialized CRDT state and its diff type (spec §3 "State", §4.1
//! "Diff tracking").

use std::collections::BTreeMap;

use crate::clock::VersionVector;
use crate::dot::EventId;
use crate::lww::Lww;
use crate::orset::OrSet;
use crate::patch::PropValue;

/// Five fields, exactly as spec.md §3 describes them.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct State {
    pub node_alive: OrSet<String>,
    pub edge_alive: OrSet<String>,
    pub prop: BTreeMap<String, Lww<PropValue>>,
    pub observed_frontier: VersionVector,
    /// Birth event of the currently-alive edge for a given encoded edge
    /// key, used to tie-break concurrent edge-property joins (spec §3, §9
    /// open question resolved in SPEC_FULL §9).
    pub edge_birth_event: BTreeMap<String, EventId>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_node_alive(&self, node: &str) -> bool {
        self.node_alive.is_alive(&node.to_string())
    }

    pub fn is_edge_alive(&self, encoded_edge_key: &str) -> bool {
        self.edge_alive.is_alive(&encoded_edge_key.to_string())
    }
}

/// A diff between two states: five lists, emitted only when aliveness or
/// LWW winner actually transitions (spec §4.1).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Diff {
    pub nodes_added: Vec<String>,
    pub nodes_removed: Vec<String>,
    pub edges_added: Vec<String>,
    pub edges_removed: Vec<String>,
    /// `(propKey, newValue)` — keyed by encoded property key so node and
    /// edge properties share one list, per the key domain split in
    /// [`crate::keycodec`].
    pub props_changed: Vec<(String, PropValue)>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_added.is_empty()
            && self.nodes_removed.is_empty()
            && self.edges_added.is_empty()
            && self.edges_removed.is_empty()
            && self.props_changed.is_empty()
    }

    /// Merges `other` after `self` (as if `self`'s diff had already been
    /// applied). Cancels contradictory add/remove pairs and keeps only the
    /// last entry per property key (spec §4.1 "Merge of two diffs").
    pub fn merge(&mut self, other: Diff) {
        merge_add_remove(&mut self.nodes_added, &mut self.nodes_removed, other.nodes_added, other.nodes_removed);
        merge_add_remove(&mut self.edges_added, &mut self.edges_removed, other.edges_added, other.edges_removed);

        let mut last: BTreeMap<String, PropValue> = self
            .props_changed
            .drain(..)
            .collect();
        for (k, v) in other.props_changed {
            last.insert(k, v);
        }
        self.props_changed = last.into_iter().collect();
    }
}

fn merge_add_remove(
    added: &mut Vec<String>,
    removed: &mut Vec<String>,
    other_added: Vec<String>,
    other_removed: Vec<String>,
) {
    use std::collections::BTreeSet;
    let mut added_set: BTreeSet<String> = added.drain(..).collect();
    let mut removed_set: BTreeSet<String> = removed.drain(..).collect();

    for a in other_added {
        if removed_set.remove(&a) {
            // an add cancels a pending remove of the same key from self
        } else {
            added_set.insert(a);
        }
    }
    for r in other_removed {
        if added_set.remove(&r) {
            // a remove cancels a pending add of the same key from self
        } else {
            removed_set.insert(r);
        }
    }
    *added = added_set.into_iter().collect();
    *removed = removed_set.into_iter().collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_cancels_add_then_remove() {
        let mut a = Diff {
            nodes_added: vec!["n1".into()],
            ..Default::default()
        };
        let b = Diff {
            nodes_removed: vec!["n1".into()],
            ..Default::default()
        };
        a.merge(b);
        assert!(a.nodes_added.is_empty());
        assert!(a.nodes_removed.is_empty());
    }

    #[test]
    fn merge_keeps_last_prop_change() {
        let mut a = Diff {
            props_changed: vec![("k".into(), PropValue::Blob { id: "1".into() })],
            ..Default::default()
        };
        let b = Diff {
            props_changed: vec![("k".into(), PropValue::Blob { id: "2".into() })],
            ..Default::default()
        };
        a.merge(b);
        assert_eq!(a.props_changed.len(), 1);
        assert_eq!(a.props_changed[0].1, PropValue::Blob { id: "2".into() });
    }
}
