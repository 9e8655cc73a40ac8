//! The object store port (spec §6) and an in-memory reference
//! implementation grounded on `echo-cas::MemoryTier`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{ErrorContext, GraphError, Result};

/// One tree entry: a relative path and the oid it resolves to.
pub type TreeEntries = BTreeMap<String, String>;

/// Everything the core needs from a content-addressed, commit-graph-shaped
/// object store (spec §6 "Object store port"). Blobs/trees are addressed by
/// an opaque `oid` string; commits additionally have a `sha` and parent
/// links; refs are named pointers updated under compare-and-swap.
pub trait ObjectStore {
    fn write_blob(&self, bytes: &[u8]) -> Result<String>;
    fn read_blob(&self, oid: &str) -> Result<Vec<u8>>;
    fn write_tree(&self, entries: &TreeEntries) -> Result<String>;
    fn read_tree(&self, oid: &str) -> Result<BTreeMap<String, Vec<u8>>>;
    fn read_tree_oids(&self, oid: &str) -> Result<TreeEntries>;
    fn commit_node(&self, message: &[u8], parents: &[String]) -> Result<String>;
    fn get_node_info(&self, sha: &str) -> Result<CommitInfo>;
    fn read_ref(&self, name: &str) -> Result<Option<String>>;
    /// Updates `name` to `new_sha`. `expected_old_sha` is the CAS
    /// precondition: `None` means "must not already exist", `Some(sha)`
    /// means "must currently equal `sha`". Returns `Err` with
    /// `WRITER_REF_ADVANCED`-style context on a failed compare.
    fn update_ref(&self, name: &str, new_sha: &str, expected_old_sha: Option<&str>) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub message: Vec<u8>,
    pub parents: Vec<String>,
}

struct MemoryObjectStoreInner {
    blobs: BTreeMap<String, Vec<u8>>,
    trees: BTreeMap<String, TreeEntries>,
    commits: BTreeMap<String, CommitInfo>,
    refs: BTreeMap<String, String>,
    commit_seq: u64,
}

/// In-memory reference implementation of [`ObjectStore`]: blobs keyed by
/// `blake3` hash, trees as sorted `path -> oid` maps, commits as an
/// append-only arena addressed by a sequence-derived sha, refs as a map
/// with compare-and-swap. Grounded in `echo-cas::MemoryTier`'s
/// hash-keyed, no-background-eviction design — content-addressed, single
/// hash domain.
pub struct MemoryObjectStore {
    inner: Mutex<MemoryObjectStoreInner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryObjectStoreInner {
                blobs: BTreeMap::new(),
                trees: BTreeMap::new(),
                commits: BTreeMap::new(),
                refs: BTreeMap::new(),
                commit_seq: 0,
            }),
        }
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn oid_of(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

impl ObjectStore for MemoryObjectStore {
    fn write_blob(&self, bytes: &[u8]) -> Result<String> {
        let oid = oid_of(bytes);
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.blobs.entry(oid.clone()).or_insert_with(|| bytes.to_vec());
        Ok(oid)
    }

    fn read_blob(&self, oid: &str) -> Result<Vec<u8>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .blobs
            .get(oid)
            .cloned()
            .ok_or_else(|| GraphError::MissingObject {
                ctx: ErrorContext::new().sha(oid.to_string()),
            })
    }

    fn write_tree(&self, entries: &TreeEntries) -> Result<String> {
        let canonical = ciborium_encode_tree(entries)?;
        let oid = oid_of(&canonical);
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.trees.entry(oid.clone()).or_insert_with(|| entries.clone());
        Ok(oid)
    }

    fn read_tree(&self, oid: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        let entries = self.read_tree_oids(oid)?;
        let mut out = BTreeMap::new();
        for (path, entry_oid) in entries {
            out.insert(path, self.read_blob(&entry_oid)?);
        }
        Ok(out)
    }

    fn read_tree_oids(&self, oid: &str) -> Result<TreeEntries> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .trees
            .get(oid)
            .cloned()
            .ok_or_else(|| GraphError::MissingObject {
                ctx: ErrorContext::new().sha(oid.to_string()),
            })
    }

    fn commit_node(&self, message: &[u8], parents: &[String]) -> Result<String> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        inner.commit_seq += 1;
        let sha = oid_of(&[message, inner.commit_seq.to_le_bytes().as_slice()].concat());
        inner.commits.insert(
            sha.clone(),
            CommitInfo {
                sha: sha.clone(),
                message: message.to_vec(),
                parents: parents.to_vec(),
            },
        );
        Ok(sha)
    }

    fn get_node_info(&self, sha: &str) -> Result<CommitInfo> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.commits.get(sha).cloned().ok_or_else(|| GraphError::MissingObject {
            ctx: ErrorContext::new().sha(sha.to_string()),
        })
    }

    fn read_ref(&self, name: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(inner.refs.get(name).cloned())
    }

    fn update_ref(&self, name: &str, new_sha: &str, expected_old_sha: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let current = inner.refs.get(name).cloned();
        match (current.as_deref(), expected_old_sha) {
            (None, None) => {}
            (Some(cur), Some(expected)) if cur == expected => {}
            _ => {
                return Err(GraphError::WriterRefAdvanced {
                    expected: expected_old_sha.unwrap_or("<none>").to_string(),
                })
            }
        }
        inner.refs.insert(name.to_string(), new_sha.to_string());
        Ok(())
    }
}

fn ciborium_encode_tree(entries: &TreeEntries) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(entries, &mut bytes)
        .map_err(|e| GraphError::Codec { message: e.to_string() })?;
    Ok(bytes)
}

/// Shared, clonable handle — controllers and writers hold an `Arc` so
/// multiple sessions can address the same store.
pub type SharedObjectStore = Arc<dyn ObjectStore + Send + Sync>;
