//! Version vectors: writerId -> max observed counter.
//!
//! Modeled on `tlfs-crdt`'s `Clock<A>` (`crdt/src/clock.rs`), specialized to
//! `String` writer ids and simplified to a plain max-map — this engine's
//! dots are always contiguous per writer (a writer's own patch chain is a
//! total order), so the teacher's `cloud` overflow set for out-of-order
//! dots has no counterpart here and is dropped.

use std::collections::BTreeMap;

/// Map from writer id to that writer's highest observed counter.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The associated counter for this writer. Writers not present have an
    /// implied count of 0.
    pub fn get(&self, writer: &str) -> u64 {
        self.0.get(writer).copied().unwrap_or(0)
    }

    /// Raises `writer`'s counter to at least `counter`, never retreating it
    /// (spec §8 "monotonic frontier").
    pub fn advance(&mut self, writer: &str, counter: u64) {
        let entry = self.0.entry(writer.to_string()).or_insert(0);
        if counter > *entry {
            *entry = counter;
        }
    }

    pub fn contains(&self, writer: &str, counter: u64) -> bool {
        self.get(writer) >= counter
    }

    /// Per-key maximum join, as specified for version vectors in spec §3.
    pub fn join(&mut self, other: &VersionVector) {
        for (writer, counter) in &other.0 {
            self.advance(writer, *counter);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(w, c)| (w.as_str(), *c))
    }

    pub fn writers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, u64)> for VersionVector {
    fn from_iter<T: IntoIterator<Item = (String, u64)>>(iter: T) -> Self {
        let mut vv = VersionVector::new();
        for (w, c) in iter {
            vv.advance(&w, c);
        }
        vv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_vv() -> impl Strategy<Value = VersionVector> {
        prop::collection::btree_map("[a-e]", 0u64..20, 0..5).prop_map(VersionVector)
    }

    #[test]
    fn advance_never_retreats() {
        let mut vv = VersionVector::new();
        vv.advance("w", 5);
        vv.advance("w", 2);
        assert_eq!(vv.get("w"), 5);
    }

    proptest! {
        #[test]
        fn join_idempotent(a in arb_vv()) {
            let mut joined = a.clone();
            joined.join(&a);
            prop_assert_eq!(joined, a);
        }

        #[test]
        fn join_commutative(a in arb_vv(), b in arb_vv()) {
            let mut ab = a.clone();
            ab.join(&b);
            let mut ba = b.clone();
            ba.join(&a);
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn join_associative(a in arb_vv(), b in arb_vv(), c in arb_vv()) {
            let mut ab_c = a.clone();
            ab_c.join(&b);
            ab_c.join(&c);
            let mut bc = b.clone();
            bc.join(&c);
            let mut a_bc = a.clone();
            a_bc.join(&bc);
            prop_assert_eq!(ab_c, a_bc);
        }

        #[test]
        fn join_monotonic(a in arb_vv(), b in arb_vv()) {
            let mut joined = a.clone();
            joined.join(&b);
            for w in a.writers() {
                prop_assert!(joined.get(w) >= a.get(w));
            }
        }
    }
}
