//! The graph controller (spec §4.6): orchestrates the reducer, the view
//! service, and the object store across `open`/`materialize`/
//! `materialize_at`/`create_checkpoint`/`fork`/`run_gc`.
//!
//! The `ObjectStore` port (spec §6) has no "list refs" primitive — only
//! point reads of a named ref — so the controller cannot discover the set
//! of writers on its own. Callers pass the current `writer_id -> tip sha`
//! map explicitly to every method that needs it; this is the controller's
//! resolution of spec §4.6's "for each known writer" (recorded in
//! DESIGN.md).

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::VersionVector;
use crate::codec::{CborCodec, Codec};
use crate::config::{GraphConfig, CURRENT_SCHEMA_GENERATION};
use crate::error::{GraphError, Result};
use crate::message::{decode_patch_message, encode_checkpoint_message, MessageKind};
use crate::patch::Patch;
use crate::reduce::{apply_with_diff, reduce, ReduceOptions, ReduceOutput};
use crate::refs::checkpoint_ref;
use crate::state::{Diff, State};
use crate::store::{ObjectStore, SharedObjectStore};
use crate::view::{self, View};

/// `writer_id -> tip sha`, as supplied by the caller (see module docs).
pub type WriterTips = BTreeMap<String, String>;

/// Everything persisted in a checkpoint commit's single blob (spec §4.6
/// "Checkpoint"). Referenced directly from the commit message's
/// `patch_blob_id` field — checkpoints carry one blob, not a tree, the
/// same shape a patch commit does (spec §6).
#[derive(Clone, serde::Serialize, serde::Deserialize)]
struct CheckpointPayload {
    schema: u32,
    frontier: VersionVector,
    state: State,
    state_hash: String,
    index_tree_oid: Option<String>,
}

#[derive(Clone)]
struct Cached {
    state: State,
    frontier: VersionVector,
    view: View,
    index_degraded: bool,
}

fn fingerprint_tips(tips: &WriterTips) -> String {
    tips.iter().map(|(w, s)| format!("{w}={s}")).collect::<Vec<_>>().join(",")
}

fn degraded_view() -> View {
    View { shard_index: Default::default(), property_index: Default::default() }
}

/// Owns a graph's in-memory caches and orchestrates its lifecycle (spec
/// §4.6). The cached materialized state/view and the ceiling-replay cache
/// are guarded by `parking_lot::Mutex` the way the teacher guards its
/// in-memory backend state.
pub struct GraphController {
    graph: String,
    store: SharedObjectStore,
    config: GraphConfig,
    codec: CborCodec,
    cached: Mutex<Option<Cached>>,
    ceiling_cache: Mutex<BTreeMap<(u64, String), State>>,
}

impl GraphController {
    /// Validates the migration boundary: an on-disk checkpoint whose
    /// schema generation does not match `CURRENT_SCHEMA_GENERATION` fails
    /// `E_SCHEMA_INCOMPATIBLE` rather than being silently misread (spec
    /// §3.1, §4.6 "open").
    pub fn open(graph: impl Into<String>, store: SharedObjectStore, config: GraphConfig) -> Result<Self> {
        let graph = graph.into();
        let controller = Self {
            graph: graph.clone(),
            store,
            config,
            codec: CborCodec,
            cached: Mutex::new(None),
            ceiling_cache: Mutex::new(BTreeMap::new()),
        };
        if let Some(payload) = controller.load_checkpoint_payload()? {
            if payload.schema != CURRENT_SCHEMA_GENERATION {
                return Err(GraphError::SchemaIncompatible {
                    found: payload.schema,
                    expected: CURRENT_SCHEMA_GENERATION,
                });
            }
        }
        Ok(controller)
    }

    fn load_checkpoint_payload(&self) -> Result<Option<CheckpointPayload>> {
        let Some(sha) = self.store.read_ref(&checkpoint_ref(&self.graph))? else {
            return Ok(None);
        };
        let info = self.store.get_node_info(&sha)?;
        let envelope = decode_patch_message(&info.message)?;
        if envelope.kind != MessageKind::Checkpoint {
            return Ok(None);
        }
        let Some(blob_id) = envelope.patch_blob_id else {
            return Ok(None);
        };
        let bytes = self.store.read_blob(&blob_id)?;
        match self.codec.decode::<CheckpointPayload>(&bytes) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                warn!(graph = %self.graph, error = %err, "checkpoint payload failed to decode, falling back to full replay");
                Ok(None)
            }
        }
    }

    fn load_patch_from_commit(&self, sha: &str) -> Result<Option<Patch>> {
        let info = self.store.get_node_info(sha)?;
        let envelope = match decode_patch_message(&info.message) {
            Ok(envelope) => envelope,
            Err(_) => return Ok(None),
        };
        if envelope.kind != MessageKind::Patch {
            return Ok(None);
        }
        let Some(blob_id) = envelope.patch_blob_id else {
            return Ok(None);
        };
        let bytes = self.store.read_blob(&blob_id)?;
        Ok(Some(self.codec.decode(&bytes)?))
    }

    /// Walks a single writer's chain from `tip_sha` back to (but not
    /// including) the first patch whose lamport is `<= floor`, returning
    /// the rest oldest-first (spec §4.6 "patches strictly between
    /// frontier[writer] and the current writer tip").
    fn collect_patches_above(&self, tip_sha: &str, floor: u64) -> Result<Vec<(Patch, String)>> {
        let mut collected = Vec::new();
        let mut current = Some(tip_sha.to_string());
        while let Some(sha) = current {
            let info = self.store.get_node_info(&sha)?;
            if let Some(patch) = self.load_patch_from_commit(&sha)? {
                if patch.lamport <= floor {
                    break;
                }
                collected.push((patch, sha.clone()));
            }
            current = info.parents.first().cloned();
        }
        collected.reverse();
        Ok(collected)
    }

    /// Folds every writer's unseen patches into `state`, starting from
    /// `frontier`, returning the updated state, frontier, and combined diff.
    fn fold_forward(
        &self,
        mut state: State,
        mut frontier: VersionVector,
        writer_tips: &WriterTips,
    ) -> Result<(State, VersionVector, Diff)> {
        let mut total_diff = Diff::new();
        for (writer_id, tip_sha) in writer_tips {
            let floor = frontier.get(writer_id);
            let new_patches = self.collect_patches_above(tip_sha, floor)?;
            for (patch, sha) in &new_patches {
                let diff = apply_with_diff(&mut state, patch, sha)?;
                total_diff.merge(diff);
            }
            if let Some((last, _)) = new_patches.last() {
                frontier.advance(writer_id, last.lamport);
            }
        }
        Ok((state, frontier, total_diff))
    }

    /// Loads the checkpoint (if any), folds in every writer's new patches,
    /// and rebuilds or incrementally updates the bitmap/property index
    /// (spec §4.6 "Materialize"). Index build failures are non-fatal: the
    /// controller degrades to an empty index and flags `index_degraded`.
    pub fn materialize(&self, writer_tips: &WriterTips) -> Result<()> {
        let span = tracing::info_span!("materialize", graph = %self.graph);
        let _enter = span.enter();

        let checkpoint = self.load_checkpoint_payload()?;
        let (base_state, base_frontier) = match checkpoint {
            Some(cp) => (cp.state, cp.frontier),
            None => (State::new(), VersionVector::new()),
        };

        let (state, frontier, diff) = self.fold_forward(base_state, base_frontier, writer_tips)?;

        let prior_view = self.cached.lock().as_ref().map(|c| c.view.clone());
        let (view, index_degraded) = match &prior_view {
            Some(prior) if !diff.is_empty() => match view::apply_diff(prior, &diff, &state) {
                Ok(v) => (v, false),
                Err(err) => {
                    warn!(graph = %self.graph, error = %err, "incremental index update failed, falling back to full rebuild");
                    self.rebuild_or_degrade(&state)
                }
            },
            Some(prior) => (prior.clone(), false),
            None => self.rebuild_or_degrade(&state),
        };

        debug!(graph = %self.graph, nodes = view.shard_index.receipt().node_count, index_degraded, "materialized");
        *self.cached.lock() = Some(Cached { state, frontier, view, index_degraded });
        Ok(())
    }

    fn rebuild_or_degrade(&self, state: &State) -> (View, bool) {
        match view::build(state) {
            Ok(v) => (v, false),
            Err(err) => {
                warn!(graph = %self.graph, error = %err, "index build failed, degrading to empty index");
                (degraded_view(), true)
            }
        }
    }

    pub fn cached_state(&self) -> Result<State> {
        self.cached
            .lock()
            .as_ref()
            .map(|c| c.state.clone())
            .ok_or_else(|| GraphError::NoState { graph: self.graph.clone() })
    }

    pub fn cached_view(&self) -> Result<View> {
        self.cached
            .lock()
            .as_ref()
            .map(|c| c.view.clone())
            .ok_or_else(|| GraphError::NoState { graph: self.graph.clone() })
    }

    pub fn index_degraded(&self) -> bool {
        self.cached.lock().as_ref().map(|c| c.index_degraded).unwrap_or(false)
    }

    /// Time-travel replay: bypasses the checkpoint entirely and replays
    /// every patch with `lamport <= ceiling` from every writer's chain from
    /// scratch, cached by `(ceiling, writerTips fingerprint)`. A corrupted
    /// cache entry self-heals by deleting it and rebuilding (spec §4.6
    /// "Ceiling materialize").
    pub fn materialize_at(&self, ceiling: u64, writer_tips: &WriterTips) -> Result<State> {
        let key = (ceiling, fingerprint_tips(writer_tips));
        if let Some(cached) = self.ceiling_cache.lock().get(&key) {
            return Ok(cached.clone());
        }

        let mut all_patches: Vec<(Patch, String)> = Vec::new();
        for tip_sha in writer_tips.values() {
            let patches = self.collect_patches_above(tip_sha, 0)?;
            all_patches.extend(patches.into_iter().filter(|(p, _)| p.lamport <= ceiling));
        }
        all_patches.sort_by(|(a, _), (b, _)| a.lamport.cmp(&b.lamport).then_with(|| a.writer_id.cmp(&b.writer_id)));

        let state = match reduce(None, &all_patches, ReduceOptions::StateOnly) {
            Ok(ReduceOutput::State(s)) => s,
            Ok(ReduceOutput::StateAndDiff(s, _)) => s,
            Err(err) => {
                self.ceiling_cache.lock().remove(&key);
                return Err(err);
            }
        };

        self.ceiling_cache.lock().insert(key, state.clone());
        Ok(state)
    }

    /// Assembles the current frontier, serializes state, persists the
    /// index tree, and writes a checkpoint commit whose parents are all
    /// writer tips (spec §4.6 "Checkpoint"). Must be called after a
    /// `materialize` that folded every writer through the target lamport
    /// tick — callers must not checkpoint mid-tick (all-or-nothing per-tick
    /// inclusion).
    pub fn create_checkpoint(&self, writer_tips: &WriterTips) -> Result<String> {
        let span = tracing::info_span!("create_checkpoint", graph = %self.graph);
        let _enter = span.enter();

        let cached = self.cached.lock().clone().ok_or_else(|| GraphError::NoState { graph: self.graph.clone() })?;
        let state_bytes = self.codec.encode(&cached.state)?;
        let state_hash = blake3::hash(&state_bytes).to_hex().to_string();
        let index_tree_oid = view::persist_index_tree(self.store.as_ref(), &cached.view).ok();

        let payload = CheckpointPayload {
            schema: CURRENT_SCHEMA_GENERATION,
            frontier: cached.frontier.clone(),
            state: cached.state.clone(),
            state_hash,
            index_tree_oid,
        };
        let payload_bytes = self.codec.encode(&payload)?;
        let payload_oid = self.store.write_blob(&payload_bytes)?;

        let max_lamport = cached.frontier.iter().map(|(_, c)| c).max().unwrap_or(0);
        let message = encode_checkpoint_message(&self.graph, max_lamport, CURRENT_SCHEMA_GENERATION, &payload_oid)?;
        let parents: Vec<String> = writer_tips.values().cloned().collect();
        let sha = self.store.commit_node(&message, &parents)?;

        let previous = self.store.read_ref(&checkpoint_ref(&self.graph))?;
        self.store.update_ref(&checkpoint_ref(&self.graph), &sha, previous.as_deref())?;
        info!(graph = %self.graph, sha = %sha, "checkpoint created");
        Ok(sha)
    }

    /// A new controller over the same backing object store: forking is
    /// simply opening an independent controller under a different graph
    /// name (spec §4.6 "fork"; the CRDT model makes every reader a fork by
    /// construction — there is no copy-on-write state to share).
    pub fn fork(&self, new_graph: impl Into<String>) -> Result<Self> {
        Self::open(new_graph, self.store.clone(), self.config.clone())
    }

    /// Clone-then-swap garbage collection (spec §4.6 "Garbage collection").
    /// Compacts tombstones against the clone's own `state.observed_frontier`
    /// — a self-contained quantity maintained by the reducer on every fold
    /// (`reduce.rs`), never a caller-supplied value, since compacting
    /// against a frontier ahead of what this replica has actually observed
    /// could drop a tombstone for a dot the replica hasn't finished
    /// reconciling and resurrect a removed node/edge on a later join.
    /// `explicit` selects the failure mode on staleness: `true` fails
    /// `E_GC_STALE`, `false` (auto-GC) silently marks the cached state
    /// dirty and returns `Ok(false)` without compacting.
    pub fn run_gc(&self, explicit: bool) -> Result<bool> {
        let before = {
            let guard = self.cached.lock();
            let Some(cached) = guard.as_ref() else {
                return Err(GraphError::NoState { graph: self.graph.clone() });
            };
            cached.frontier.clone()
        };

        let mut clone = {
            let guard = self.cached.lock();
            guard.as_ref().expect("checked above").state.clone()
        };
        let frontier = clone.observed_frontier.clone();
        clone.node_alive.compact_tombstones(&frontier);
        clone.edge_alive.compact_tombstones(&frontier);

        let after = self.cached.lock().as_ref().expect("checked above").frontier.clone();
        if after != before {
            if explicit {
                return Err(GraphError::GcStale);
            }
            warn!(graph = %self.graph, "gc stale: writer frontier advanced mid-compaction, marking dirty");
            return Ok(false);
        }

        let mut guard = self.cached.lock();
        if let Some(cached) = guard.as_mut() {
            cached.state = clone;
        }
        info!(graph = %self.graph, "gc compacted tombstones");
        Ok(true)
    }

    /// Runs GC only if the cached state's combined tombstone count exceeds
    /// `config.gc_tombstone_threshold` (spec §4.6 auto-GC trigger). Never
    /// propagates a GC failure — auto-GC failures are logged and ignored.
    pub fn maybe_run_gc(&self) {
        let tombstones = match self.cached.lock().as_ref() {
            Some(c) => c.state.node_alive.tombstone_count() + c.state.edge_alive.tombstone_count(),
            None => return,
        };
        if tombstones < self.config.gc_tombstone_threshold {
            return;
        }
        if let Err(err) = self.run_gc(false) {
            warn!(graph = %self.graph, error = %err, "auto-gc failed, ignoring");
        }
    }
}
