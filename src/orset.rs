//! Observed-remove set CRDT, generic over key type.
//!
//! Mirrors the teacher's `DotSet<A>`/`Lattice`/`CausalLattice` split in
//! `crdt/src/store.rs` (an orphaned-but-instructive module in the teacher
//! repo — never wired into `crdt/src/lib.rs`, superseded there by the
//! path-based `DotStore`). Generalized here to the plain entries/tombstones
//! shape spec.md §3 specifies directly, keyed by whatever `K` the caller
//! needs (node id, encoded edge key, ...).

use std::collections::{BTreeMap, BTreeSet};

use crate::dot::Dot;

/// Observed-remove set over key type `K`.
///
/// Invariant: for every key present in `entries`, none of its dots are in
/// `tombstones`. A key is alive iff it is present in `entries`.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrSet<K: Ord> {
    entries: BTreeMap<K, BTreeSet<String>>,
    tombstones: BTreeSet<String>,
}

impl<K: Ord + Clone> OrSet<K> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    pub fn is_alive(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn alive_keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds `dot` as a witness that `key` is alive. Returns `true` if this
    /// is the transition from dead to alive (used by the reducer to decide
    /// whether a diff entry should be emitted).
    pub fn add(&mut self, key: K, dot: Dot) -> bool {
        let was_alive = self.entries.contains_key(&key);
        self.entries.entry(key).or_default().insert(dot.encode());
        !was_alive
    }

    /// Moves every dot in `observed` from `entries` to `tombstones` for
    /// `key`. Returns `true` if this is the transition from alive to dead.
    pub fn remove(&mut self, key: &K, observed: &[Dot]) -> bool {
        let was_alive = self.entries.contains_key(key);
        if let Some(dots) = self.entries.get_mut(key) {
            for dot in observed {
                dots.remove(&dot.encode());
            }
            let emptied = dots.is_empty();
            if emptied {
                self.entries.remove(key);
            }
        }
        for dot in observed {
            self.tombstones.insert(dot.encode());
        }
        was_alive && !self.entries.contains_key(key)
    }

    /// Joins `other` into `self`. Commutative, associative, idempotent: the
    /// result depends only on the union of dots ever observed, never on
    /// application order (spec §8).
    pub fn join(&mut self, other: &Self) {
        for dot in &other.tombstones {
            self.tombstones.insert(dot.clone());
        }
        for (key, dots) in &other.entries {
            let slot = self.entries.entry(key.clone()).or_default();
            for dot in dots {
                slot.insert(dot.clone());
            }
        }
        // Re-apply every observed tombstone against the merged entries so a
        // key that is alive on one side via dots the other side already
        // tombstoned converges correctly regardless of join order.
        let tombstones = &self.tombstones;
        let mut drained = Vec::new();
        for (key, dots) in self.entries.iter_mut() {
            dots.retain(|d| !tombstones.contains(d));
            if dots.is_empty() {
                drained.push(key.clone());
            }
        }
        for key in drained {
            self.entries.remove(&key);
        }
    }

    /// Dots currently keeping `key` alive (empty if dead or unknown).
    pub fn witnesses(&self, key: &K) -> Vec<Dot> {
        self.entries
            .get(key)
            .map(|dots| dots.iter().filter_map(|s| Dot::decode(s)).collect())
            .unwrap_or_default()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Drops tombstones whose dot's writer counter is `<= frontier`, used by
    /// garbage collection (spec §4.6). A tombstone for a dot no writer can
    /// still be racing to re-observe is safe to discard.
    pub fn compact_tombstones(&mut self, frontier: &crate::clock::VersionVector) {
        self.tombstones.retain(|encoded| match Dot::decode(encoded) {
            Some(dot) => dot.counter > frontier.get(&dot.writer),
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_orset() -> impl Strategy<Value = OrSet<String>> {
        prop::collection::vec(("[a-c]", 0u64..6, "[a-c]", 0u64..6), 0..8).prop_map(|ops| {
            let mut s = OrSet::new();
            for (k, c, w, rc) in ops {
                let dot = Dot::new(w.clone(), c);
                if rc % 2 == 0 {
                    s.add(k, dot);
                } else {
                    s.remove(&k, &[dot]);
                }
            }
            s
        })
    }

    #[test]
    fn add_then_alive() {
        let mut s = OrSet::new();
        assert!(s.add("n1".to_string(), Dot::new("w", 1)));
        assert!(s.is_alive(&"n1".to_string()));
    }

    #[test]
    fn redundant_add_not_a_transition() {
        let mut s = OrSet::new();
        assert!(s.add("n1".to_string(), Dot::new("w", 1)));
        assert!(!s.add("n1".to_string(), Dot::new("w", 2)));
    }

    #[test]
    fn remove_all_witnesses_kills_key() {
        let mut s = OrSet::new();
        s.add("n1".to_string(), Dot::new("w", 1));
        assert!(s.remove(&"n1".to_string(), &[Dot::new("w", 1)]));
        assert!(!s.is_alive(&"n1".to_string()));
    }

    #[test]
    fn concurrent_add_survives_partial_remove() {
        let mut s = OrSet::new();
        s.add("n1".to_string(), Dot::new("w1", 1));
        s.add("n1".to_string(), Dot::new("w2", 1));
        s.remove(&"n1".to_string(), &[Dot::new("w1", 1)]);
        assert!(s.is_alive(&"n1".to_string()));
    }

    proptest! {
        #[test]
        fn join_idempotent(a in arb_orset()) {
            let mut j = a.clone();
            j.join(&a);
            prop_assert_eq!(j, a);
        }

        #[test]
        fn join_commutative(a in arb_orset(), b in arb_orset()) {
            let mut ab = a.clone();
            ab.join(&b);
            let mut ba = b.clone();
            ba.join(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn join_associative(a in arb_orset(), b in arb_orset(), c in arb_orset()) {
            let mut ab_c = a.clone();
            ab_c.join(&b);
            ab_c.join(&c);
            let mut bc = b.clone();
            bc.join(&c);
            let mut a_bc = a.clone();
            a_bc.join(&bc);
            prop_assert_eq!(ab_c, a_bc);
        }
    }
}
