//! Concurrent Hierarchical Navigable Small World index.
//!
//! The graph lives in fixed-stride arenas indexed by 32-bit locations:
//! level-0 adjacency in one atomic word array read lock-free, vectors in an
//! aligned byte arena, upper-level adjacency in per-node blocks guarded by
//! per-node mutexes. Inserters, updaters, and searchers run concurrently
//! under the locking discipline described in [`graph`].

/// Graph storage, layout, locks, deletion marks, resize, integrity checks.
pub mod graph;
/// Insertion, updates, replace-deleted, mutual connection, pruning.
pub mod insert;
/// Greedy descent, beam searches, and the query entry point.
pub mod search;
/// Binary snapshot save/load.
pub mod snapshot;

pub use graph::HnswIndex;
