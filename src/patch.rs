//! Patches and operations (spec §3 "Patch", "Operation variants").

use crate::clock::VersionVector;
use crate::dot::Dot;
use serde::{Deserialize, Serialize};

/// A property value: either inline JSON-serializable data or a reference to
/// a content-addressed blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    Inline(ciborium::value::Value),
    Blob { id: String },
}

/// The six raw operation types that may appear on the wire inside a patch.
/// `NodePropSet`/`EdgePropSet` are reducer-internal derivations of `PropSet`
/// and must never be constructed from decoded bytes (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Op {
    NodeAdd {
        node: String,
        dot: Dot,
    },
    NodeRemove {
        node: String,
        observed_dots: Vec<Dot>,
    },
    EdgeAdd {
        from: String,
        to: String,
        label: String,
        dot: Dot,
    },
    EdgeRemove {
        from: String,
        to: String,
        label: String,
        observed_dots: Vec<Dot>,
    },
    PropSet {
        node: String,
        key: String,
        value: PropValue,
    },
    BlobValue {
        id: String,
    },
    /// Forward-compatible placeholder: unknown tags decode into this and
    /// are silently skipped by the reducer (spec §9 "Unknown tags are
    /// forward-compatible no-ops").
    #[serde(other)]
    Unknown,
}

/// An operation the reducer dispatches internally. `PropSet` decodes into
/// one of these two depending on whether `node` names a node or — when the
/// caller is operating through [`crate::writer::PatchSession::set_edge_property`]
/// — an encoded edge key. These never round-trip through the wire codec.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum CanonicalOp {
    NodeAdd { node: String, dot: Dot },
    NodeRemove { node: String, observed_dots: Vec<Dot> },
    EdgeAdd { from: String, to: String, label: String, dot: Dot },
    EdgeRemove { from: String, to: String, label: String, observed_dots: Vec<Dot> },
    NodePropSet { node: String, key: String, value: PropValue },
    EdgePropSet { from: String, to: String, label: String, key: String, value: PropValue },
}

/// A schema-tagged, CBOR-serialized record of ordered operations plus their
/// causal context (spec §3 "Patch").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub writer_id: String,
    pub lamport: u64,
    pub operations: Vec<Op>,
    pub causal_context: VersionVector,
    pub reads: Option<Vec<String>>,
    pub writes: Option<Vec<String>>,
}

impl Patch {
    pub fn new(writer_id: impl Into<String>, lamport: u64, operations: Vec<Op>) -> Self {
        Self {
            writer_id: writer_id.into(),
            lamport,
            operations,
            causal_context: VersionVector::new(),
            reads: None,
            writes: None,
        }
    }

    /// `EMPTY_PATCH` guard (spec §4.7) — checked by the writer before a
    /// patch is ever serialized, distinct from the reducer's per-op
    /// malformed-field guard (SPEC_FULL §3.2).
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
