//! A version-controlled, replicable property graph engine.
//!
//! A graph's state is a CRDT (observed-remove sets for nodes and edges,
//! last-writer-wins registers for properties) replicated over a
//! content-addressed, git-shaped object store: every patch a writer
//! commits is a blob plus a commit whose parent chain is that writer's
//! own history, referenced by a per-writer ref under compare-and-swap.
//! Any two replicas that have observed the same set of patches converge
//! to the same state regardless of the order they applied them in.
//!
//! ```text
//!            patches (blobs + commits)           materialized view
//!   writer ----------------------------> store ----------------------> reader
//!     |        refs/warp/{graph}/writers/{id}       GraphController
//!     `-- PatchSession ------------------/              |
//!                                                   sharded bitmap index
//!                                                   + property index
//! ```
//!
//! [`controller::GraphController`] is the entry point for reading a graph:
//! it folds a caller-supplied set of writer tips into a [`state::State`]
//! and keeps a [`view::View`] (the bitmap/property indexes the
//! [`traversal`] engine queries) in sync. [`writer::Writer`] is the entry
//! point for writing. Everything below those two modules is plumbing:
//! the CRDT primitives ([`orset`], [`lww`], [`clock`], [`dot`]), the wire
//! format ([`patch`], [`message`], [`keycodec`]), the storage and crypto
//! ports ([`store`], [`codec`], [`crypto`]), and the index itself
//! ([`shard`], [`propindex`], [`reader`]).

pub mod cancel;
pub mod clock;
pub mod codec;
pub mod config;
pub mod controller;
pub mod crypto;
pub mod dot;
pub mod error;
pub mod keycodec;
pub mod lww;
pub mod message;
pub mod neighbor;
pub mod orset;
pub mod patch;
pub mod propindex;
pub mod reader;
pub mod reduce;
pub mod refs;
pub mod shard;
pub mod state;
pub mod store;
pub mod traversal;
pub mod view;
pub mod writer;

pub use config::GraphConfig;
pub use controller::GraphController;
pub use error::{GraphError, Result};
pub use writer::Writer;
