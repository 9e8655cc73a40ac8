//! `Writer` and `PatchSession` (spec §4.7): fluent patch building over a
//! single `(graph, writerId)` pair, committed via compare-and-swap against
//! the writer's own ref.

use crate::clock::VersionVector;
use crate::codec::{CborCodec, Codec};
use crate::config::CURRENT_SCHEMA_GENERATION;
use crate::dot::Dot;
use crate::error::{GraphError, Result};
use crate::message::encode_patch_message;
use crate::patch::{Op, Patch, PropValue};
use crate::refs::writer_tip_ref;
use crate::store::SharedObjectStore;

/// The `node`-field marker `canonicalize` (spec §3, [`crate::reduce`])
/// recognizes as "this `PropSet` targets an edge, not a node": a leading
/// `\x01` byte followed by the edge's `(from, to, label)` triple. The
/// actual property key stays in `Op::PropSet`'s own `key` field.
fn edge_prop_marker(from: &str, to: &str, label: &str) -> String {
    format!("\u{1}{from}\0{to}\0{label}")
}

/// Owns `(graph, writerId)` and a private monotonic lamport counter (spec
/// §4.7 "A `Writer` owns `(graphName, writerId)`"). Every committed patch
/// advances `next_lamport` by one, mirroring the teacher's per-replica
/// clock discipline in `crdt/src/clock.rs` without the out-of-order
/// overflow set this engine's single-writer chains never need.
pub struct Writer {
    graph: String,
    writer_id: String,
    store: SharedObjectStore,
    codec: CborCodec,
    next_lamport: u64,
}

impl Writer {
    pub fn new(graph: impl Into<String>, writer_id: impl Into<String>, store: SharedObjectStore) -> Self {
        Self {
            graph: graph.into(),
            writer_id: writer_id.into(),
            store,
            codec: CborCodec,
            next_lamport: 1,
        }
    }

    /// Captures the writer's current tip as `expectedOldHead` and returns a
    /// fresh buffered session (spec §4.7 `beginPatch`).
    pub fn begin_patch(&mut self) -> Result<PatchSession<'_>> {
        let expected_old_head = self.store.read_ref(&writer_tip_ref(&self.graph, &self.writer_id))?;
        let lamport = self.next_lamport;
        Ok(PatchSession {
            writer: self,
            lamport,
            expected_old_head,
            ops: Vec::new(),
            committed: false,
        })
    }

    pub fn graph(&self) -> &str {
        &self.graph
    }

    pub fn writer_id(&self) -> &str {
        &self.writer_id
    }
}

/// A buffered set of operations against one writer tip, committed
/// atomically (spec §4.7 `PatchSession`).
pub struct PatchSession<'w> {
    writer: &'w mut Writer,
    lamport: u64,
    expected_old_head: Option<String>,
    ops: Vec<Op>,
    committed: bool,
}

impl<'w> PatchSession<'w> {
    fn next_dot(&self) -> Dot {
        Dot::new(self.writer.writer_id.clone(), self.lamport)
    }

    pub fn add_node(&mut self, node: impl Into<String>) -> &mut Self {
        self.ops.push(Op::NodeAdd { node: node.into(), dot: self.next_dot() });
        self
    }

    pub fn remove_node(&mut self, node: impl Into<String>, observed_dots: Vec<Dot>) -> &mut Self {
        self.ops.push(Op::NodeRemove { node: node.into(), observed_dots });
        self
    }

    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> &mut Self {
        self.ops.push(Op::EdgeAdd {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            dot: self.next_dot(),
        });
        self
    }

    pub fn remove_edge(
        &mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
        observed_dots: Vec<Dot>,
    ) -> &mut Self {
        self.ops.push(Op::EdgeRemove {
            from: from.into(),
            to: to.into(),
            label: label.into(),
            observed_dots,
        });
        self
    }

    pub fn set_property(&mut self, node: impl Into<String>, key: impl Into<String>, value: PropValue) -> &mut Self {
        self.ops.push(Op::PropSet { node: node.into(), key: key.into(), value });
        self
    }

    /// Property write against an edge rather than a node: the `node` field
    /// of the wire-level `PropSet` carries the marker-prefixed
    /// `"{from}\0{to}\0{label}"` triple the reducer's `canonicalize`
    /// recognizes (spec §3 "Operation variants").
    pub fn set_edge_property(
        &mut self,
        from: &str,
        to: &str,
        label: &str,
        key: impl Into<String>,
        value: PropValue,
    ) -> &mut Self {
        self.ops.push(Op::PropSet {
            node: edge_prop_marker(from, to, label),
            key: key.into(),
            value,
        });
        self
    }

    /// Writes `bytes` to the object store as a content-addressed blob and
    /// buffers a `PropSet` pointing `key` at it (spec §4.7 `attachContent`).
    pub fn attach_content(&mut self, node: impl Into<String>, key: impl Into<String>, bytes: &[u8]) -> Result<&mut Self> {
        let id = self.writer.store.write_blob(bytes)?;
        self.ops.push(Op::BlobValue { id: id.clone() });
        let node = node.into();
        self.ops.push(Op::PropSet { node, key: key.into(), value: PropValue::Blob { id } });
        Ok(self)
    }

    pub fn attach_edge_content(
        &mut self,
        from: &str,
        to: &str,
        label: &str,
        key: impl Into<String>,
        bytes: &[u8],
    ) -> Result<&mut Self> {
        let id = self.writer.store.write_blob(bytes)?;
        self.ops.push(Op::BlobValue { id: id.clone() });
        self.ops.push(Op::PropSet {
            node: edge_prop_marker(from, to, label),
            key: key.into(),
            value: PropValue::Blob { id },
        });
        Ok(self)
    }

    /// Serializes the buffered ops, writes the patch blob, builds the
    /// commit message, and CAS-updates the writer ref (spec §4.7 `commit`).
    /// `EMPTY_PATCH` if nothing was buffered, `SESSION_COMMITTED` on a
    /// second call, `WRITER_REF_ADVANCED` on a lost CAS race (the caller
    /// must re-open a session to retry).
    pub fn commit(&mut self) -> Result<String> {
        if self.committed {
            return Err(GraphError::SessionCommitted);
        }
        let patch = Patch::new(self.writer.writer_id.clone(), self.lamport, std::mem::take(&mut self.ops));
        if patch.is_empty() {
            return Err(GraphError::EmptyPatch);
        }

        let patch_bytes = self.writer.codec.encode(&patch).map_err(|err| GraphError::PersistWriteFailed {
            message: err.to_string(),
        })?;
        let blob_id = self.writer.store.write_blob(&patch_bytes).map_err(|err| GraphError::PersistWriteFailed {
            message: err.to_string(),
        })?;
        let message = encode_patch_message(
            &self.writer.graph,
            &self.writer.writer_id,
            self.lamport,
            CURRENT_SCHEMA_GENERATION,
            &blob_id,
        )?;
        let parents = self.expected_old_head.iter().cloned().collect::<Vec<_>>();
        let sha = self.writer.store.commit_node(&message, &parents).map_err(|err| GraphError::PersistWriteFailed {
            message: err.to_string(),
        })?;

        self.writer
            .store
            .update_ref(&writer_tip_ref(&self.writer.graph, &self.writer.writer_id), &sha, self.expected_old_head.as_deref())?;

        self.writer.next_lamport += 1;
        self.committed = true;
        Ok(sha)
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Caller-observable causal context a writer should attach to its next
/// patch's `causal_context`, derived from whatever frontier the caller has
/// last observed (spec §3 "Patch" — `causalContext`). Not auto-populated by
/// `PatchSession` since the writer may be operating against a materialized
/// view far behind its own tip.
pub fn causal_context_from(frontier: &VersionVector) -> VersionVector {
    frontier.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use std::sync::Arc;

    fn new_writer() -> Writer {
        let store: SharedObjectStore = Arc::new(MemoryObjectStore::new());
        Writer::new("g1", "w1", store)
    }

    #[test]
    fn commit_advances_writer_ref() {
        let mut writer = new_writer();
        let mut session = writer.begin_patch().unwrap();
        session.add_node("A");
        let sha = session.commit().unwrap();
        assert!(!sha.is_empty());
    }

    #[test]
    fn empty_session_commit_fails() {
        let mut writer = new_writer();
        let mut session = writer.begin_patch().unwrap();
        assert!(matches!(session.commit(), Err(GraphError::EmptyPatch)));
    }

    #[test]
    fn second_commit_on_same_session_is_rejected() {
        let mut writer = new_writer();
        let mut session = writer.begin_patch().unwrap();
        session.add_node("A");
        session.commit().unwrap();
        assert!(matches!(session.commit(), Err(GraphError::SessionCommitted)));
    }

    #[test]
    fn concurrent_commits_race_on_cas() {
        let store: SharedObjectStore = Arc::new(MemoryObjectStore::new());
        let mut writer1 = Writer::new("g1", "w1", store.clone());
        let mut session1 = writer1.begin_patch().unwrap();
        session1.add_node("A");

        // Simulate a second, concurrent session racing against the same tip.
        let mut writer2 = Writer::new("g1", "w1", store.clone());
        let mut session2 = writer2.begin_patch().unwrap();
        session2.add_node("B");

        session1.commit().unwrap();
        let err = session2.commit().unwrap_err();
        assert!(matches!(err, GraphError::WriterRefAdvanced { .. }));
    }
}
