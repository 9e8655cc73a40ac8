//! The sharded bitmap index (spec §4.3): stable global ids, per-label
//! forward/reverse adjacency bitmaps, an append-only label registry, all
//! partitioned by a 2-hex-character shard key.

use std::collections::BTreeMap;

use roaring::RoaringBitmap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::VersionVector;
use crate::config::CURRENT_SCHEMA_GENERATION;
use crate::error::{ErrorContext, GraphError, Result};
use crate::keycodec::decode_edge_key;
use crate::state::{Diff, State};

pub const ALL_BUCKET: &str = "all";
const LOCAL_ID_LIMIT: u32 = 1 << 24;

const FNV_OFFSET_BASIS_32: u32 = 0x811c_9dc5;
const FNV_PRIME_32: u32 = 0x0100_0193;

/// FNV-1a, 32-bit variant, over raw bytes — hand-rolled rather than reused
/// from the `fnv` crate's hasher (which is 64-bit only) since the shard key
/// must match this exact algorithm byte-for-byte across implementations.
fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS_32;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME_32);
    }
    hash
}

/// The 2-lowercase-hex-character shard key for `node_id` (spec §4.3
/// "Sharding"): the node id's own hex prefix when it looks like a 40+
/// character hex string (a content hash), otherwise an FNV-1a fallback.
pub fn shard_key(node_id: &str) -> String {
    if node_id.len() >= 40 && node_id.chars().all(|c| c.is_ascii_hexdigit()) {
        node_id[..2].to_ascii_lowercase()
    } else {
        format!("{:02x}", fnv1a_32(node_id.as_bytes()) & 0xFF)
    }
}

fn encode_global_id(shard_byte: u8, local_id: u32) -> Result<u32> {
    if local_id >= LOCAL_ID_LIMIT {
        return Err(GraphError::ShardIdOverflow {
            shard_key: format!("{shard_byte:02x}"),
        });
    }
    Ok((u32::from(shard_byte) << 24) | local_id)
}

fn shard_byte(key: &str) -> u8 {
    u8::from_str_radix(key, 16).unwrap_or(0)
}

/// A roaring bitmap wrapped for CBOR serialization via its own native
/// binary format (not `serde`'s derive, which `roaring` doesn't implement
/// without an extra feature) — a byte string field under the hood.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap(pub RoaringBitmap);

impl Bitmap {
    pub fn new() -> Self {
        Self(RoaringBitmap::new())
    }

    pub fn insert(&mut self, value: u32) -> bool {
        self.0.insert(value)
    }
}

impl Serialize for Bitmap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut buf = Vec::new();
        self.0
            .serialize_into(&mut buf)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_bytes(&buf)
    }
}

impl<'de> Deserialize<'de> for Bitmap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let buf = Vec::<u8>::deserialize(deserializer)?;
        let bitmap = RoaringBitmap::deserialize_from(&buf[..]).map_err(serde::de::Error::custom)?;
        Ok(Bitmap(bitmap))
    }
}

/// Per-shard continuity state: which node ids have been assigned a local
/// id, and the high-water mark new assignments continue from (spec §4.3
/// "Global id assignment" — "rebuilds consume a prior build's
/// `nextLocalId` so already-assigned ids never change").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ShardIdState {
    pub(crate) next_local_id: u32,
    pub(crate) node_to_id: BTreeMap<String, u32>,
}

impl ShardIdState {
    fn get_or_assign(&mut self, node_id: &str, shard: u8) -> Result<u32> {
        if let Some(&local) = self.node_to_id.get(node_id) {
            return encode_global_id(shard, local);
        }
        let local = self.next_local_id;
        let global = encode_global_id(shard, local)?;
        self.node_to_id.insert(node_id.to_string(), local);
        self.next_local_id += 1;
        Ok(global)
    }

    /// Reconstructs continuity bookkeeping from a persisted `meta` block —
    /// used when a view is reloaded from storage rather than carried over
    /// in-process, since `id_tables` is deliberately not serialized (spec
    /// §4.3 "Global id assignment").
    pub(crate) fn from_meta(meta: &ShardMeta) -> Self {
        let node_to_id = meta
            .nodes
            .iter()
            .map(|(node, global)| (node.clone(), global & 0x00FF_FFFF))
            .collect();
        Self { next_local_id: meta.next_local_id, node_to_id }
    }
}

/// The append-only label registry: label name -> label id. Label `0` is
/// never assigned — the all-edges bucket is the literal string `"all"`
/// (spec §4.3 "Label registry").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelRegistry {
    by_name: BTreeMap<String, u32>,
    by_id: BTreeMap<u32, String>,
    next_id: u32,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self { by_name: BTreeMap::new(), by_id: BTreeMap::new(), next_id: 1 }
    }

    pub fn get_or_assign(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.by_name.get(label) {
            return id;
        }
        let id = self.next_id;
        self.by_name.insert(label.to_string(), id);
        self.by_id.insert(id, label.to_string());
        self.next_id += 1;
        id
    }

    pub fn id_of(&self, label: &str) -> Option<u32> {
        self.by_name.get(label).copied()
    }

    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    pub fn label_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_id.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// `meta_XX`: sorted `(nodeId, globalId)` pairs, the shard's `nextLocalId`,
/// and a bitmap of currently-alive global ids (spec §4.3 "Per-shard
/// outputs").
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardMeta {
    pub nodes: Vec<(String, u32)>,
    pub next_local_id: u32,
    pub alive: Bitmap,
}

/// `fwd_XX`/`rev_XX`: `bucket -> globalId(string) -> bitmap`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Buckets(pub BTreeMap<String, BTreeMap<String, Bitmap>>);

impl Buckets {
    fn insert(&mut self, bucket: &str, owner_global_id: u32, member_global_id: u32) {
        self.0
            .entry(bucket.to_string())
            .or_default()
            .entry(owner_global_id.to_string())
            .or_default()
            .insert(member_global_id);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardData {
    pub meta: ShardMeta,
    pub fwd: Buckets,
    pub rev: Buckets,
}

/// `receipt.cbor`: no timestamps — a pure function of the final state
/// (spec §4.3 "the output is content-addressed and must be a pure
/// function of input").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub schema_version: u32,
    pub node_count: usize,
    pub label_count: usize,
    pub shard_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardIndex {
    pub shards: BTreeMap<String, ShardData>,
    pub labels: LabelRegistry,
    #[serde(skip)]
    pub(crate) id_tables: BTreeMap<String, ShardIdState>,
}

impl ShardIndex {
    /// The `(shard, globalId)` pair assigned to `node_id`, if it has ever
    /// been indexed.
    pub fn global_id_of(&self, node_id: &str) -> Option<(String, u32)> {
        let key = shard_key(node_id);
        self.shards
            .get(&key)?
            .meta
            .nodes
            .iter()
            .find(|(n, _)| n == node_id)
            .map(|(_, g)| (key, *g))
    }

    pub fn receipt(&self) -> Receipt {
        let node_count = self.shards.values().map(|s| s.meta.nodes.len()).sum();
        Receipt {
            schema_version: CURRENT_SCHEMA_GENERATION,
            node_count,
            label_count: self.labels.len(),
            shard_count: self.shards.len(),
        }
    }
}

/// Full rebuild from scratch (spec §4.4 `build`). `prior` seeds global id
/// continuity and the label registry if this graph was indexed before.
pub fn build(state: &State, prior: Option<&ShardIndex>) -> Result<ShardIndex> {
    rebuild(state, prior, None)
}

/// Incremental update: only shards whose nodes or edges transitioned in
/// `diff` are re-emitted; every other shard is copied byte-identically
/// from `prior` (spec §4.3 "Incremental update").
pub fn apply_diff(prior: &ShardIndex, diff: &Diff, state: &State) -> Result<ShardIndex> {
    if diff.is_empty() {
        return Ok(prior.clone());
    }
    let mut dirty = std::collections::BTreeSet::new();
    for node in diff.nodes_added.iter().chain(diff.nodes_removed.iter()) {
        dirty.insert(shard_key(node));
    }
    for edge_key in diff.edges_added.iter().chain(diff.edges_removed.iter()) {
        if let Some((from, to, _label)) = decode_edge_key(edge_key) {
            dirty.insert(shard_key(from));
            dirty.insert(shard_key(to));
        }
    }
    rebuild(state, Some(prior), Some(&dirty))
}

fn rebuild(
    state: &State,
    prior: Option<&ShardIndex>,
    dirty: Option<&std::collections::BTreeSet<String>>,
) -> Result<ShardIndex> {
    let mut id_tables: BTreeMap<String, ShardIdState> =
        prior.map(|p| p.id_tables.clone()).unwrap_or_default();
    let mut labels = prior.map(|p| p.labels.clone()).unwrap_or_else(LabelRegistry::new);

    // Pass 1: assign/confirm a global id for every currently-alive node, in
    // sorted order so assignment order never depends on OR-Set iteration.
    let mut alive_nodes: Vec<&String> = state.node_alive.alive_keys().collect();
    alive_nodes.sort();
    for node in &alive_nodes {
        let key = shard_key(node);
        let table = id_tables.entry(key.clone()).or_default();
        table.get_or_assign(node, shard_byte(&key))?;
    }

    // Pass 2: register every label used by a currently-alive edge.
    let mut alive_edges: Vec<&String> = state.edge_alive.alive_keys().collect();
    alive_edges.sort();
    for edge_key in &alive_edges {
        if let Some((_from, _to, label)) = decode_edge_key(edge_key) {
            labels.get_or_assign(label);
        }
    }

    // Pass 3: per-shard meta (nodes + alive bitmap), for dirty shards only
    // when doing an incremental update.
    let mut shards: BTreeMap<String, ShardData> =
        prior.map(|p| p.shards.clone()).unwrap_or_default();

    let all_shard_keys: std::collections::BTreeSet<String> =
        id_tables.keys().cloned().collect();
    for key in &all_shard_keys {
        if let Some(dirty) = dirty {
            if !dirty.contains(key) {
                continue;
            }
        }
        let table = id_tables.get(key).expect("shard key from id_tables");
        let mut nodes = Vec::new();
        let mut alive_bitmap = Bitmap::new();
        for node in &alive_nodes {
            if &shard_key(node) != key {
                continue;
            }
            let global = table
                .node_to_id
                .get(node.as_str())
                .copied()
                .map(|local| encode_global_id(shard_byte(key), local))
                .transpose()?
                .expect("alive node was assigned in pass 1");
            nodes.push(((*node).clone(), global));
            alive_bitmap.insert(global);
        }
        nodes.sort();
        shards.entry(key.clone()).or_default().meta = ShardMeta {
            nodes,
            next_local_id: table.next_local_id,
            alive: alive_bitmap,
        };
    }

    // Pass 4: forward/reverse buckets, resolved against the full id table
    // (an edge's endpoints may live in a different shard than the one
    // being rebuilt).
    let resolve = |id_tables: &BTreeMap<String, ShardIdState>, node: &str| -> Result<u32> {
        let key = shard_key(node);
        let local = id_tables
            .get(&key)
            .and_then(|t| t.node_to_id.get(node))
            .copied()
            .ok_or_else(|| GraphError::MissingObject {
                ctx: ErrorContext::new().shard_key(key.clone()),
            })?;
        encode_global_id(shard_byte(&key), local)
    };

    // Clear fwd/rev only for dirty shards before repopulating them.
    for key in &all_shard_keys {
        let is_dirty = dirty.map(|d| d.contains(key)).unwrap_or(true);
        if is_dirty {
            let entry = shards.entry(key.clone()).or_default();
            entry.fwd = Buckets::default();
            entry.rev = Buckets::default();
        }
    }

    for edge_key in &alive_edges {
        let Some((from, to, label)) = decode_edge_key(edge_key) else {
            continue;
        };
        let from_shard = shard_key(from);
        let to_shard = shard_key(to);
        let from_dirty = dirty.map(|d| d.contains(&from_shard)).unwrap_or(true);
        let to_dirty = dirty.map(|d| d.contains(&to_shard)).unwrap_or(true);
        if !from_dirty && !to_dirty {
            continue;
        }
        let from_global = resolve(&id_tables, from)?;
        let to_global = resolve(&id_tables, to)?;
        let label_id = labels.get_or_assign(label).to_string();

        if from_dirty {
            let fwd = &mut shards.entry(from_shard).or_default().fwd;
            fwd.insert(ALL_BUCKET, from_global, to_global);
            fwd.insert(&label_id, from_global, to_global);
        }
        if to_dirty {
            let rev = &mut shards.entry(to_shard).or_default().rev;
            rev.insert(ALL_BUCKET, to_global, from_global);
            rev.insert(&label_id, to_global, from_global);
        }
    }

    Ok(ShardIndex { shards, labels, id_tables })
}

/// Drops tombstoned/retired node-id assignments whose writer counter is at
/// or below `frontier` from the id tables — paired with
/// `OrSet::compact_tombstones` during GC (spec §4.6) so the index's
/// continuity bookkeeping doesn't grow unboundedly either. A no-op today
/// since id tables key on node id, not dot; reserved for when GC starts
/// pruning fully-retired node ids from the table, not just OR-Set
/// tombstones.
pub fn compact_id_tables(_index: &mut ShardIndex, _frontier: &VersionVector) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot::Dot;
    use crate::reduce::{apply_with_diff, reduce as fold, ReduceOptions};
    use crate::patch::{Op, Patch};

    fn add_node(writer: &str, lamport: u64, node: &str) -> (Patch, String) {
        (
            Patch::new(writer, lamport, vec![Op::NodeAdd { node: node.to_string(), dot: Dot::new(writer, lamport) }]),
            format!("sha-{writer}-{lamport}"),
        )
    }

    fn add_edge(writer: &str, lamport: u64, from: &str, to: &str, label: &str) -> (Patch, String) {
        (
            Patch::new(
                writer,
                lamport,
                vec![Op::EdgeAdd {
                    from: from.to_string(),
                    to: to.to_string(),
                    label: label.to_string(),
                    dot: Dot::new(writer, lamport),
                }],
            ),
            format!("sha-{writer}-{lamport}-edge"),
        )
    }

    #[test]
    fn shard_key_uses_hex_prefix_for_long_hex_ids() {
        let id = "a".repeat(40);
        assert_eq!(shard_key(&id), "aa");
    }

    #[test]
    fn shard_key_falls_back_to_fnv_for_short_ids() {
        let key = shard_key("alice");
        assert_eq!(key.len(), 2);
        assert!(u8::from_str_radix(&key, 16).is_ok());
    }

    #[test]
    fn stable_ids_across_rebuild() {
        let mut state = State::new();
        let out = fold(
            Some(std::mem::take(&mut state)),
            &[add_node("w", 1, "A"), add_node("w", 2, "B"), add_node("w", 3, "C")],
            ReduceOptions::StateOnly,
        )
        .unwrap();
        let state1 = out.into_state();
        let index1 = build(&state1, None).unwrap();
        let key_a = shard_key("A");
        let global_a_1 = index1.id_tables[&key_a].node_to_id["A"];

        let out2 = fold(
            Some(state1),
            &[add_node("w", 4, "D"), add_node("w", 5, "E")],
            ReduceOptions::StateOnly,
        )
        .unwrap();
        let state2 = out2.into_state();
        let index2 = build(&state2, Some(&index1)).unwrap();
        let global_a_2 = index2.id_tables[&key_a].node_to_id["A"];
        assert_eq!(global_a_1, global_a_2);

        for node in ["D", "E"] {
            let key = shard_key(node);
            let local = index2.id_tables[&key].node_to_id[node];
            assert!(local >= index1.id_tables.get(&key).map(|t| t.next_local_id).unwrap_or(0));
        }
    }

    #[test]
    fn empty_diff_produces_byte_identical_shards() {
        let mut state = State::new();
        let mut patch = Patch::new("w", 1, vec![Op::NodeAdd { node: "A".into(), dot: Dot::new("w", 1) }]);
        let diff = apply_with_diff(&mut state, &patch, "sha1").unwrap();
        let index1 = build(&state, None).unwrap();
        patch.operations.clear();
        let empty_diff = Diff::new();
        let index2 = apply_diff(&index1, &empty_diff, &state).unwrap();
        assert_eq!(index1.shards, index2.shards);
        let _ = diff;
    }

    #[test]
    fn forward_and_reverse_buckets_agree_on_edges() {
        let mut state = State::new();
        let out = fold(
            Some(std::mem::take(&mut state)),
            &[add_node("w", 1, "A"), add_node("w", 2, "B"), add_edge("w", 3, "A", "B", "knows")],
            ReduceOptions::StateOnly,
        )
        .unwrap();
        let state = out.into_state();
        let index = build(&state, None).unwrap();

        let a_key = shard_key("A");
        let b_key = shard_key("B");
        let a_global = index.id_tables[&a_key].node_to_id["A"];
        let b_global = index.id_tables[&b_key].node_to_id["B"];

        let fwd_all = &index.shards[&a_key].fwd.0[ALL_BUCKET][&a_global.to_string()];
        assert!(fwd_all.0.contains(b_global));

        let rev_all = &index.shards[&b_key].rev.0[ALL_BUCKET][&b_global.to_string()];
        assert!(rev_all.0.contains(a_global));
    }

    #[test]
    fn shard_id_overflow_is_a_typed_error() {
        let mut table = ShardIdState::default();
        table.next_local_id = LOCAL_ID_LIMIT;
        assert!(matches!(
            table.get_or_assign("overflow-node", 0),
            Err(GraphError::ShardIdOverflow { .. })
        ));
    }
}
