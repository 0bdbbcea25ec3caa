//! # smallworld
//!
//! Embeddable in-memory approximate nearest neighbor index.
//!
//! The core is a concurrent Hierarchical Navigable Small World (HNSW) graph:
//! many inserters and many searchers make progress simultaneously under
//! per-node locking, while the base-layer adjacency is read lock-free. An
//! exact brute-force engine shares the same interface for small collections
//! and ground-truth checks. Both are reached through [`UnifiedIndex`], which
//! also materializes [`SearchContext`] request objects pre-filled with the
//! index's metric, dimension, and data-type metadata.
//!
//! Vectors are dense rows of u8, f16, or f32 scalars, addressed by
//! caller-chosen opaque u64 labels. Supported metrics are squared L2 and
//! inner product (reported as `1 - dot` so that smaller is closer for both);
//! cosine callers pre-normalize and use inner product. Deletion is lazy:
//! deleted nodes stay in the graph as routing waypoints but never appear in
//! results, and their slots can be reclaimed by later inserts when
//! replacement is enabled. The whole structure round-trips through a binary
//! snapshot.

/// 64-byte-aligned query buffer and the fixed-stride vector arena.
pub mod arena;
/// Exact brute-force engine: flat record array with a top-k scan.
pub mod bruteforce;
/// Search-time predicate trait and the OR-composite over predicate lists.
pub mod condition;
/// Index configuration: core settings, HNSW parameters, write options.
pub mod config;
/// Search request/response object created by the facade.
pub mod context;
/// Distance spaces: L2 and inner product over u8/f16/f32 rows.
pub mod distance;
/// Crate-wide error type.
pub mod error;
/// Concurrent HNSW engine: graph storage, insertion, search, snapshots.
pub mod hnsw;
/// Engine trait and the unified facade over both engines.
pub mod index;
pub(crate) mod pod;
/// Pooled visited-flag arrays for graph walks.
pub mod visited;

/// Caller-chosen opaque identifier for a vector.
pub type LabelType = u64;
/// Engine-assigned slot index, stable for a node's lifetime.
pub type LocationType = u32;
/// Distances are single precision regardless of the stored data type.
pub type DistanceType = f32;

pub use bruteforce::BruteForceIndex;
pub use condition::{CompositeCondition, SearchCondition};
pub use config::{
    CoreConfig, DataType, HnswParams, IndexConfig, IndexKind, MetricType, WriteConfig,
};
pub use context::{SearchContext, SearchResult};
pub use distance::DistanceSpace;
pub use error::{IndexError, Result};
pub use hnsw::HnswIndex;
pub use index::{UnifiedIndex, VectorEngine};
