//! Unified facade over the two engines.
//!
//! [`VectorEngine`] is the capability set both engines expose;
//! [`UnifiedIndex`] owns one behind it, validates the configuration at
//! initialization, and materializes [`SearchContext`]s pre-filled with the
//! index's metric, dimension, and data-type metadata.

use crate::bruteforce::BruteForceIndex;
use crate::config::{CoreConfig, IndexConfig, IndexKind, WriteConfig};
use crate::context::SearchContext;
use crate::error::{IndexError, Result};
use crate::hnsw::HnswIndex;
use crate::LabelType;
use std::path::Path;

/// Operations an index engine provides.
pub trait VectorEngine: Send + Sync {
    /// Insert or update one vector.
    fn add_vector(&self, data: &[u8], label: LabelType, write_conf: WriteConfig) -> Result<()>;

    /// Copy the vector stored under `label` into `out`.
    fn get_vector(&self, label: LabelType, out: &mut [u8]) -> Result<()>;

    /// Answer a search request, populating the context's results.
    fn search(&self, context: &mut SearchContext) -> Result<()>;

    /// Hide `label` from result sets.
    fn lazy_delete(&self, label: LabelType) -> Result<()>;

    /// Write a snapshot to `path`, recording `snapshot_id`.
    fn save(&self, snapshot_id: u64, path: &Path) -> Result<()>;

    /// The id recorded by the last save (or carried by the loaded file).
    fn snapshot_id(&self) -> u64;

    fn core_config(&self) -> CoreConfig;

    fn index_config(&self) -> IndexConfig;

    /// Live slots, deleted nodes included.
    fn element_count(&self) -> usize;

    /// Nodes currently carrying the deletion mark.
    fn deleted_count(&self) -> usize;
}

impl VectorEngine for HnswIndex {
    fn add_vector(&self, data: &[u8], label: LabelType, write_conf: WriteConfig) -> Result<()> {
        self.add_point(data, label, write_conf)
    }

    fn get_vector(&self, label: LabelType, out: &mut [u8]) -> Result<()> {
        self.get_vector(label, out)
    }

    fn search(&self, context: &mut SearchContext) -> Result<()> {
        self.search(context)
    }

    fn lazy_delete(&self, label: LabelType) -> Result<()> {
        self.mark_delete(label)
    }

    fn save(&self, snapshot_id: u64, path: &Path) -> Result<()> {
        self.save(snapshot_id, path)
    }

    fn snapshot_id(&self) -> u64 {
        self.snapshot_id()
    }

    fn core_config(&self) -> CoreConfig {
        self.core_config()
    }

    fn index_config(&self) -> IndexConfig {
        self.index_config()
    }

    fn element_count(&self) -> usize {
        self.element_count()
    }

    fn deleted_count(&self) -> usize {
        self.deleted_count()
    }
}

/// Facade that builds and fronts the configured engine.
#[derive(Default)]
pub struct UnifiedIndex {
    engine: Option<Box<dyn VectorEngine>>,
}

impl UnifiedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.engine.is_some()
    }

    fn engine(&self) -> Result<&dyn VectorEngine> {
        self.engine
            .as_deref()
            .ok_or_else(|| IndexError::InvalidArgument("index is not initialized".into()))
    }

    /// Build the configured engine. A second call on an initialized facade
    /// is a no-op.
    pub fn initialize(&mut self, config: &IndexConfig) -> Result<()> {
        if self.engine.is_some() {
            return Ok(());
        }
        let engine: Box<dyn VectorEngine> = match config.core.index {
            IndexKind::Hnsw => Box::new(HnswIndex::new(config.core, config.hnsw)?),
            IndexKind::BruteForce => Box::new(BruteForceIndex::new(config.core, config.hnsw)?),
        };
        tracing::debug!(
            kind = ?config.core.index,
            dimension = config.core.dimension,
            max_elements = config.core.max_elements,
            "initialized index"
        );
        self.engine = Some(engine);
        Ok(())
    }

    /// Load a snapshot into a fresh facade.
    pub fn load(&mut self, path: &Path, config: &IndexConfig) -> Result<()> {
        if self.engine.is_some() {
            return Err(IndexError::AlreadyExists(
                "index is already initialized and cannot load".into(),
            ));
        }
        let engine: Box<dyn VectorEngine> = match config.core.index {
            IndexKind::Hnsw => Box::new(HnswIndex::load(path, config)?),
            IndexKind::BruteForce => Box::new(BruteForceIndex::load(path, config)?),
        };
        self.engine = Some(engine);
        Ok(())
    }

    /// Insert or update one vector of `dimension * scalar size` bytes.
    pub fn add_vector(&self, data: &[u8], label: LabelType) -> Result<()> {
        self.engine()?.add_vector(data, label, WriteConfig::default())
    }

    /// [`UnifiedIndex::add_vector`] with explicit write options.
    pub fn add_vector_with(&self, data: &[u8], label: LabelType, write_conf: WriteConfig) -> Result<()> {
        self.engine()?.add_vector(data, label, write_conf)
    }

    /// Insert `labels.len()` contiguous vectors. The first failure
    /// short-circuits.
    pub fn add_vectors(
        &self,
        data: &[u8],
        labels: &[LabelType],
        write_conf: WriteConfig,
    ) -> Result<()> {
        let engine = self.engine()?;
        let size = engine.core_config().dimension as usize
            * engine.core_config().data_type.size();
        if data.len() != size * labels.len() {
            return Err(IndexError::InvalidArgument(format!(
                "expected {} bytes for {} vectors, got {}",
                size * labels.len(),
                labels.len(),
                data.len()
            )));
        }
        for (i, &label) in labels.iter().enumerate() {
            engine.add_vector(&data[i * size..(i + 1) * size], label, write_conf)?;
        }
        Ok(())
    }

    pub fn get_vector(&self, label: LabelType, out: &mut [u8]) -> Result<()> {
        self.engine()?.get_vector(label, out)
    }

    /// Fetch `labels.len()` vectors into one contiguous buffer. The first
    /// failure short-circuits.
    pub fn get_vectors(&self, labels: &[LabelType], out: &mut [u8]) -> Result<()> {
        let engine = self.engine()?;
        let size = engine.core_config().dimension as usize
            * engine.core_config().data_type.size();
        if out.len() != size * labels.len() {
            return Err(IndexError::InvalidArgument(format!(
                "expected {} bytes for {} vectors, got {}",
                size * labels.len(),
                labels.len(),
                out.len()
            )));
        }
        for (i, &label) in labels.iter().enumerate() {
            engine.get_vector(label, &mut out[i * size..(i + 1) * size])?;
        }
        Ok(())
    }

    /// A context pre-filled with this index's metadata.
    pub fn create_search_context(&self) -> Result<SearchContext> {
        let core = self.engine()?.core_config();
        Ok(SearchContext::new(
            core.metric,
            core.index,
            core.data_type,
            core.dimension,
            core.worker_num,
        ))
    }

    pub fn search(&self, context: &mut SearchContext) -> Result<()> {
        self.engine()?.search(context)
    }

    /// Hide `label` from result sets; the node stays in the graph.
    pub fn lazy_delete(&self, label: LabelType) -> Result<()> {
        self.engine()?.lazy_delete(label)
    }

    pub fn save(&self, snapshot_id: u64, path: &Path) -> Result<()> {
        self.engine()?.save(snapshot_id, path)
    }

    pub fn snapshot_id(&self) -> u64 {
        self.engine.as_deref().map_or(0, |e| e.snapshot_id())
    }

    pub fn core_config(&self) -> Result<CoreConfig> {
        Ok(self.engine()?.core_config())
    }

    pub fn index_config(&self) -> Result<IndexConfig> {
        Ok(self.engine()?.index_config())
    }

    pub fn element_count(&self) -> usize {
        self.engine.as_deref().map_or(0, |e| e.element_count())
    }

    pub fn deleted_count(&self) -> usize {
        self.engine.as_deref().map_or(0, |e| e.deleted_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, MetricType};

    fn config(kind: IndexKind) -> IndexConfig {
        IndexConfig::new()
            .with_index(kind)
            .with_metric(MetricType::L2)
            .with_data_type(DataType::Float32)
            .with_dimension(4)
            .with_max_elements(16)
    }

    fn vec_bytes(v: [f32; 4]) -> Vec<u8> {
        bytemuck::cast_slice(&v).to_vec()
    }

    #[test]
    fn test_uninitialized_calls_fail() {
        let index = UnifiedIndex::new();
        assert!(!index.is_initialized());
        assert!(matches!(
            index.add_vector(&[0u8; 16], 1),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(index.create_search_context().is_err());
        assert_eq!(index.element_count(), 0);
        assert_eq!(index.snapshot_id(), 0);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut index = UnifiedIndex::new();
        index.initialize(&config(IndexKind::Hnsw)).unwrap();
        assert!(index.is_initialized());
        // Second call leaves the engine in place.
        index.initialize(&config(IndexKind::BruteForce)).unwrap();
        assert_eq!(index.core_config().unwrap().index, IndexKind::Hnsw);
    }

    #[test]
    fn test_both_engines_share_the_surface() {
        for kind in [IndexKind::Hnsw, IndexKind::BruteForce] {
            let mut index = UnifiedIndex::new();
            index.initialize(&config(kind)).unwrap();
            index.add_vector(&vec_bytes([1.0, 0.0, 0.0, 0.0]), 1).unwrap();
            index.add_vector(&vec_bytes([0.0, 1.0, 0.0, 0.0]), 2).unwrap();

            let mut ctx = index.create_search_context().unwrap();
            assert_eq!(ctx.dimension(), 4);
            assert_eq!(ctx.data_size(), 16);
            ctx.with_query(&vec_bytes([1.0, 0.1, 0.0, 0.0])).with_top_k(1);
            index.search(&mut ctx).unwrap();
            assert_eq!(ctx.results.len(), 1);
            assert_eq!(ctx.results[0].label, 1);
        }
    }

    #[test]
    fn test_add_vectors_batch_validates_length() {
        let mut index = UnifiedIndex::new();
        index.initialize(&config(IndexKind::Hnsw)).unwrap();
        let data = [vec_bytes([0.0; 4]), vec_bytes([1.0; 4])].concat();
        index
            .add_vectors(&data, &[10, 11], WriteConfig::default())
            .unwrap();
        assert_eq!(index.element_count(), 2);
        assert!(matches!(
            index.add_vectors(&data[..16], &[12, 13], WriteConfig::default()),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_vectors_batch() {
        let mut index = UnifiedIndex::new();
        index.initialize(&config(IndexKind::Hnsw)).unwrap();
        index.add_vector(&vec_bytes([1.0, 2.0, 3.0, 4.0]), 5).unwrap();
        index.add_vector(&vec_bytes([5.0, 6.0, 7.0, 8.0]), 6).unwrap();
        let mut out = vec![0u8; 32];
        index.get_vectors(&[5, 6], &mut out).unwrap();
        assert_eq!(&out[..16], vec_bytes([1.0, 2.0, 3.0, 4.0]).as_slice());
        assert_eq!(&out[16..], vec_bytes([5.0, 6.0, 7.0, 8.0]).as_slice());
        // A miss short-circuits.
        assert!(matches!(
            index.get_vectors(&[5, 99], &mut out),
            Err(IndexError::NotFound(99))
        ));
    }

    #[test]
    fn test_load_into_initialized_facade_fails() {
        let mut index = UnifiedIndex::new();
        index.initialize(&config(IndexKind::Hnsw)).unwrap();
        let err = index
            .load(Path::new("/nonexistent"), &config(IndexKind::Hnsw))
            .unwrap_err();
        assert!(matches!(err, IndexError::AlreadyExists(_)));
    }
}
