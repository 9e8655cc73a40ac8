//! Caller-supplied knobs the spec leaves implicit (SPEC_FULL §2.3).

/// Strictness of shard-reader error recovery (spec §4.3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShardValidationMode {
    /// Corruption or version mismatch fails the read.
    Strict,
    /// Corruption or version mismatch degrades to an empty shard, logged
    /// once per shard key.
    Lenient,
}

/// Tunables for a [`crate::controller::GraphController`].
#[derive(Clone, Debug)]
pub struct GraphConfig {
    /// Max shards kept resident in the reader's LRU (spec §4.3).
    pub max_cached_shards: usize,
    /// How many visited nodes between cancellation-token polls (spec §4.2,
    /// §5 — "every 1000 visited nodes").
    pub cancellation_poll_interval: usize,
    /// Capacity of the async-provider neighbor LRU (spec §4.2).
    pub neighbor_cache_capacity: usize,
    /// Tombstone count above which auto-GC considers compaction (spec
    /// §4.6).
    pub gc_tombstone_threshold: usize,
    /// Strict vs lenient shard validation (spec §4.3).
    pub shard_validation: ShardValidationMode,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_cached_shards: 64,
            cancellation_poll_interval: 1000,
            neighbor_cache_capacity: 4096,
            gc_tombstone_threshold: 10_000,
            shard_validation: ShardValidationMode::Lenient,
        }
    }
}

/// The on-disk state/checkpoint format generation this build understands
/// (spec SPEC_FULL §3.1).
pub const CURRENT_SCHEMA_GENERATION: u32 = 1;
