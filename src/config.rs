//! Index configuration.
//!
//! [`CoreConfig`] carries the settings both engines share (metric, data
//! type, dimension, capacity); [`HnswParams`] the graph-specific tuning
//! knobs. [`IndexConfig`] bundles the two with builder-style `with_*`
//! methods. Tuning defaults live here as documented constants.

use serde::{Deserialize, Serialize};

/// Default number of outgoing links per HNSW node on upper layers.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64.
pub const DEFAULT_M: usize = 16;

/// Default candidate list size during HNSW construction.
///
/// Higher values produce a better graph but slow down insertion.
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate list size during search, used when a context does not
/// set `search_list_size`. The effective width is always at least `top_k`.
pub const DEFAULT_EF_SEARCH: usize = 10;

/// Default seed for the level generator. The update-probability generator
/// is seeded with this value plus one.
pub const DEFAULT_RANDOM_SEED: u64 = 100;

/// Vector rows and query buffers are aligned to this many bytes, the widest
/// SIMD register the kernels are written for.
pub const VECTOR_ALIGNMENT: usize = 64;

/// Scalar type of the stored vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Unsigned 8-bit components.
    Uint8,
    /// IEEE 754 half-precision components.
    Float16,
    /// Single-precision components.
    Float32,
}

impl DataType {
    /// Byte size of one scalar.
    pub const fn size(self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Float16 => 2,
            DataType::Float32 => 4,
        }
    }

    pub(crate) const fn code(self) -> u32 {
        match self {
            DataType::Uint8 => 1,
            DataType::Float16 => 2,
            DataType::Float32 => 3,
        }
    }

    pub(crate) const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(DataType::Uint8),
            2 => Some(DataType::Float16),
            3 => Some(DataType::Float32),
            _ => None,
        }
    }
}

/// Distance function for similarity computation.
///
/// All metrics report a value where lower is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricType {
    /// Sum of squared component differences.
    L2,
    /// `1 - dot(a, b)`, so that smaller-is-closer composes with L2.
    InnerProduct,
    /// Reserved. Construction refuses it; pre-normalize and use
    /// [`MetricType::InnerProduct`] instead.
    Cosine,
}

impl MetricType {
    pub(crate) const fn code(self) -> u32 {
        match self {
            MetricType::L2 => 1,
            MetricType::InnerProduct => 2,
            MetricType::Cosine => 3,
        }
    }

    pub(crate) const fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(MetricType::L2),
            2 => Some(MetricType::InnerProduct),
            3 => Some(MetricType::Cosine),
            _ => None,
        }
    }
}

/// Which engine the facade builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// The layered proximity graph.
    Hnsw,
    /// The exact linear-scan engine.
    BruteForce,
}

impl IndexKind {
    pub(crate) const fn code(self) -> u32 {
        match self {
            IndexKind::Hnsw => 1,
            IndexKind::BruteForce => 2,
        }
    }
}

/// Settings shared by both engines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoreConfig {
    pub index: IndexKind,
    pub data_type: DataType,
    pub metric: MetricType,
    /// Number of scalars per vector.
    pub dimension: u32,
    /// Advisory fan-out width for callers running an external worker pool.
    /// The engines do not schedule work themselves.
    pub worker_num: u32,
    /// Capacity in vectors. Inserting past it fails unless a deleted slot
    /// can be reused.
    pub max_elements: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            index: IndexKind::Hnsw,
            data_type: DataType::Float32,
            metric: MetricType::L2,
            dimension: 0,
            worker_num: 0,
            max_elements: 0,
        }
    }
}

/// HNSW graph tuning parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HnswParams {
    /// Target outgoing degree on upper levels. Level 0 is capped at `2 * m`.
    pub m: usize,
    /// Beam width during construction. Floored at `m` by the engine.
    pub ef_construction: usize,
    /// Seed for level assignment and update-probability draws.
    pub random_seed: u64,
    /// Allow inserts to reclaim lazily-deleted slots. Disables
    /// `unmark_delete`.
    pub allow_replace_deleted: bool,
    /// Chance that an update re-selects a given one-hop neighbor's
    /// adjacency. 1.0 repairs every neighbor.
    pub update_neighbor_probability: f32,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            random_seed: DEFAULT_RANDOM_SEED,
            allow_replace_deleted: false,
            update_neighbor_probability: 1.0,
        }
    }
}

/// Full index configuration handed to [`crate::UnifiedIndex::initialize`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    pub core: CoreConfig,
    pub hnsw: HnswParams,
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: IndexKind) -> Self {
        self.core.index = index;
        self
    }

    pub fn with_metric(mut self, metric: MetricType) -> Self {
        self.core.metric = metric;
        self
    }

    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.core.data_type = data_type;
        self
    }

    pub fn with_dimension(mut self, dimension: u32) -> Self {
        self.core.dimension = dimension;
        self
    }

    pub fn with_worker_num(mut self, worker_num: u32) -> Self {
        self.core.worker_num = worker_num;
        self
    }

    pub fn with_max_elements(mut self, max_elements: u32) -> Self {
        self.core.max_elements = max_elements;
        self
    }

    pub fn with_hnsw(mut self, hnsw: HnswParams) -> Self {
        self.hnsw = hnsw;
        self
    }
}

/// Per-write options for `add_vector`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Reclaim a lazily-deleted slot for this insert. Requires
    /// [`HnswParams::allow_replace_deleted`].
    pub replace_deleted: bool,
}
