//! The stable, machine-readable error taxonomy from spec §7.
//!
//! Bracketed codes in each `Display` arm follow `echo-cas`'s
//! `CasError::HashMismatch` convention (`"[CAS_HASH_MISMATCH] ..."`) so a
//! log line or CLI error message carries its own machine-parseable code
//! without a separate lookup table.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

/// Structured context attached to an error: whatever subset of these fields
/// is relevant to the failure (spec §7 "Every error carries a structured
/// context").
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ErrorContext {
    pub graph: Option<String>,
    pub writer: Option<String>,
    pub sha: Option<String>,
    pub shard_key: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(mut self, graph: impl Into<String>) -> Self {
        self.graph = Some(graph.into());
        self
    }

    pub fn writer(mut self, writer: impl Into<String>) -> Self {
        self.writer = Some(writer.into());
        self
    }

    pub fn sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    pub fn shard_key(mut self, shard_key: impl Into<String>) -> Self {
        self.shard_key = Some(shard_key.into());
        self
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        let mut field = |f: &mut std::fmt::Formatter<'_>, name: &str, value: &Option<String>| {
            if let Some(v) = value {
                if !first {
                    write!(f, ", ").ok();
                }
                write!(f, "{name}={v}").ok();
                first = false;
            }
        };
        field(f, "graph", &self.graph);
        field(f, "writer", &self.writer);
        field(f, "sha", &self.sha);
        field(f, "shard_key", &self.shard_key);
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("[E_MISSING_OBJECT] object not found ({ctx})")]
    MissingObject { ctx: ErrorContext },

    #[error("[E_REF_NOT_FOUND] ref not found ({ctx})")]
    RefNotFound { ctx: ErrorContext },

    #[error("[E_REF_IO] ref storage error: {message} ({ctx})")]
    RefIo { message: String, ctx: ErrorContext },

    #[error("[E_PATCH_MALFORMED] malformed patch operation: {message} ({ctx})")]
    PatchMalformed { message: String, ctx: ErrorContext },

    #[error("[E_SHARD_ID_OVERFLOW] shard {shard_key} exceeded 2^24 local ids")]
    ShardIdOverflow { shard_key: String },

    #[error("[SHARD_LOAD_ERROR] failed to load shard {shard_key}: {message}")]
    ShardLoadError { shard_key: String, message: String },

    #[error("[SHARD_CORRUPTION_ERROR] shard {shard_key} failed checksum validation")]
    ShardCorruptionError { shard_key: String },

    #[error("[SHARD_VALIDATION_ERROR] shard {shard_key} failed version validation")]
    ShardValidationError { shard_key: String },

    #[error("[STORAGE_ERROR] {message}")]
    StorageError { message: String },

    #[error("[INVALID_START] start node {node} is not alive in this view")]
    InvalidStart { node: String },

    #[error("[NO_PATH] no path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("[ERR_GRAPH_HAS_CYCLES] cycle detected, back edge {from} -> {to}")]
    GraphHasCycles { from: String, to: String },

    #[error("[E_WEIGHT_FN_CONFLICT] provide either an edge weight function or a node weight function, not both")]
    WeightFnConflict,

    #[error("[E_NO_STATE] graph {graph} has no materialized state yet")]
    NoState { graph: String },

    #[error("[E_GC_STALE] writer frontier advanced during garbage collection")]
    GcStale,

    #[error("[WRITER_REF_ADVANCED] writer ref advanced past expected head {expected}")]
    WriterRefAdvanced { expected: String },

    #[error("[EMPTY_PATCH] patch session has no buffered operations")]
    EmptyPatch,

    #[error("[PERSIST_WRITE_FAILED] failed to persist patch: {message}")]
    PersistWriteFailed { message: String },

    #[error("[SESSION_COMMITTED] patch session was already committed")]
    SessionCommitted,

    #[error("[E_SYNC_DIVERGENCE] writer {writer} chains diverged: {message}")]
    SyncDivergence { writer: String, message: String },

    #[error("[E_SCHEMA_INCOMPATIBLE] on-disk schema generation {found} incompatible with {expected}, no migration checkpoint present")]
    SchemaIncompatible { found: u32, expected: u32 },

    #[error("[E_CANCELLED] operation cancelled after visiting {visited} nodes")]
    Cancelled { visited: usize },

    #[error("[E_CODEC] codec error: {message}")]
    Codec { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn storage(message: impl Into<String>) -> Self {
        GraphError::StorageError {
            message: message.into(),
        }
    }

    pub fn patch_malformed(message: impl Into<String>, ctx: ErrorContext) -> Self {
        GraphError::PatchMalformed {
            message: message.into(),
            ctx,
        }
    }
}
