//! Exact brute-force engine.
//!
//! Records live in one fixed-stride arena as `[vector | label]`, backed by a
//! label→slot map. Insertion overwrites on label collision and appends
//! otherwise; deletion is eager and swaps the tail record into the freed
//! slot. Search is a linear scan maintaining a top-k max-heap, so results
//! are exact. Shares the [`crate::VectorEngine`] interface with the HNSW
//! engine.

use crate::arena::VectorArena;
use crate::config::{CoreConfig, HnswParams, IndexConfig, WriteConfig};
use crate::context::{SearchContext, SearchResult};
use crate::distance::DistanceSpace;
use crate::error::{IndexError, Result};
use crate::pod;
use crate::{DistanceType, LabelType, LocationType};
use ordered_float::OrderedFloat;
use parking_lot::RwLock;
use std::collections::{BinaryHeap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Max-heap entry: worst candidate on top.
#[derive(PartialEq, Eq)]
struct ScanEntry {
    distance: OrderedFloat<DistanceType>,
    label: LabelType,
    location: LocationType,
}

impl Ord for ScanEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance.cmp(&other.distance)
    }
}

impl PartialOrd for ScanEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Mutable state: the record arena, the live count, and the label map.
#[derive(Debug)]
struct Store {
    arena: VectorArena,
    count: u32,
    lookup: HashMap<LabelType, LocationType>,
}

/// Exact nearest-neighbor engine over a flat record array.
#[derive(Debug)]
pub struct BruteForceIndex {
    space: DistanceSpace,
    core: CoreConfig,
    params: HnswParams,
    snapshot_id: AtomicU64,
    store: RwLock<Store>,
}

impl BruteForceIndex {
    /// Allocate an empty engine for `config.core.max_elements` records.
    pub fn new(core: CoreConfig, params: HnswParams) -> Result<Self> {
        let space = DistanceSpace::new(core.metric, core.data_type, core.dimension)?;
        if core.max_elements == 0 {
            return Err(IndexError::InvalidArgument(
                "max_elements must not be 0".into(),
            ));
        }
        let record_bytes = space.data_size() + std::mem::size_of::<LabelType>();
        let arena = VectorArena::new(core.max_elements as usize, record_bytes)?;
        Ok(Self {
            space,
            core,
            params,
            snapshot_id: AtomicU64::new(0),
            store: RwLock::new(Store {
                arena,
                count: 0,
                lookup: HashMap::new(),
            }),
        })
    }

    pub fn space(&self) -> &DistanceSpace {
        &self.space
    }

    /// Insert `data` under `label`, overwriting the existing record if the
    /// label is already present.
    pub fn add(&self, data: &[u8], label: LabelType) -> Result<()> {
        if data.len() != self.space.data_size() {
            return Err(IndexError::InvalidArgument(format!(
                "vector must be {} bytes, got {}",
                self.space.data_size(),
                data.len()
            )));
        }
        let mut store = self.store.write();
        let existing = store.lookup.get(&label).copied();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                if store.count >= self.core.max_elements {
                    return Err(IndexError::ResourceExhausted(format!(
                        "element count {} is at the configured limit {}",
                        store.count, self.core.max_elements
                    )));
                }
                let slot = store.count;
                store.lookup.insert(label, slot);
                store.count += 1;
                slot
            }
        };
        let mut record = Vec::with_capacity(store.arena.row_bytes());
        record.extend_from_slice(data);
        record.extend_from_slice(&label.to_le_bytes());
        // Single writer per row: the store write lock is held.
        unsafe {
            store.arena.write_row(slot, &record);
        }
        Ok(())
    }

    /// Remove `label` by swapping the tail record into its slot.
    pub fn remove(&self, label: LabelType) -> Result<()> {
        let mut store = self.store.write();
        let slot = store
            .lookup
            .remove(&label)
            .ok_or(IndexError::NotFound(label))?;
        let tail = store.count - 1;
        if slot != tail {
            unsafe {
                store.arena.copy_row_within(slot, tail);
            }
            let moved = record_label(&store.arena, slot, self.space.data_size());
            store.lookup.insert(moved, slot);
        }
        store.count = tail;
        Ok(())
    }

    /// Copy the vector stored under `label` into `out`.
    pub fn get(&self, label: LabelType, out: &mut [u8]) -> Result<()> {
        if out.len() != self.space.data_size() {
            return Err(IndexError::InvalidArgument(format!(
                "output buffer must be {} bytes, got {}",
                self.space.data_size(),
                out.len()
            )));
        }
        let store = self.store.read();
        let slot = *store.lookup.get(&label).ok_or(IndexError::NotFound(label))?;
        out.copy_from_slice(&store.arena.row(slot)[..self.space.data_size()]);
        Ok(())
    }

    /// Linear top-k scan honoring the context's condition and flags.
    pub fn run_search(&self, context: &mut SearchContext) -> Result<()> {
        context.schedule_time = Some(Instant::now());
        context.results.clear();
        context.raw_vectors.clear();

        let store = self.store.read();
        let count = store.count;
        if count == 0 || context.top_k == 0 {
            context.end_time = Some(Instant::now());
            return Ok(());
        }
        let query = context.query_bytes();
        if query.len() != self.space.data_size() {
            return Err(IndexError::InvalidArgument(format!(
                "query must be {} bytes, got {}",
                self.space.data_size(),
                query.len()
            )));
        }

        let k = context.top_k.min(count) as usize;
        let data_size = self.space.data_size();
        let mut heap: BinaryHeap<ScanEntry> = BinaryHeap::with_capacity(k + 1);

        // Seed from the first k non-excluded records.
        for slot in 0..k as u32 {
            let row = store.arena.row(slot);
            let dist = self.space.dist(query, &row[..data_size]);
            let label = record_label(&store.arena, slot, data_size);
            if !context.is_exclude(label) {
                heap.push(ScanEntry {
                    distance: OrderedFloat(dist),
                    label,
                    location: slot,
                });
            }
        }
        let mut worst = heap
            .peek()
            .map_or(DistanceType::MAX, |entry| entry.distance.0);

        for slot in k as u32..count {
            let row = store.arena.row(slot);
            let dist = self.space.dist(query, &row[..data_size]);
            if heap.len() < k || dist <= worst {
                let label = record_label(&store.arena, slot, data_size);
                if !context.is_exclude(label) {
                    heap.push(ScanEntry {
                        distance: OrderedFloat(dist),
                        label,
                        location: slot,
                    });
                }
                if heap.len() > k {
                    heap.pop();
                }
                if heap.len() == k {
                    worst = heap.peek().expect("heap is full").distance.0;
                }
            }
        }

        emit_results(context, heap);
        if context.with_raw_vector {
            let results = std::mem::take(&mut context.results);
            for hit in &results {
                let slot = *store
                    .lookup
                    .get(&hit.label)
                    .ok_or(IndexError::NotFound(hit.label))?;
                context
                    .raw_vectors
                    .push(store.arena.row(slot)[..data_size].to_vec());
            }
            context.results = results;
        }
        context.end_time = Some(Instant::now());
        Ok(())
    }

    /// Write a snapshot: header fields, then `count` packed records.
    pub fn save(&self, snapshot_id: u64, path: &Path) -> Result<()> {
        let store = self.store.read();
        self.snapshot_id.store(snapshot_id, Ordering::Release);

        let data_size = self.space.data_size();
        let record_bytes = data_size + std::mem::size_of::<LabelType>();
        let mut w = BufWriter::new(File::create(path)?);
        pod::write_u32(&mut w, self.core.metric.code())?;
        pod::write_u32(&mut w, self.core.data_type.code())?;
        pod::write_u32(&mut w, self.core.dimension)?;
        pod::write_u32(&mut w, self.core.worker_num)?;
        pod::write_u32(&mut w, self.core.max_elements)?;
        pod::write_u64(&mut w, snapshot_id)?;
        pod::write_u64(&mut w, record_bytes as u64)?;
        pod::write_u64(&mut w, store.count as u64)?;
        for slot in 0..store.count {
            w.write_all(store.arena.row(slot))?;
        }
        w.flush()?;
        tracing::info!(
            count = store.count,
            bytes = store.count as usize * record_bytes,
            "saved brute-force snapshot"
        );
        Ok(())
    }

    /// Load a snapshot written by [`BruteForceIndex::save`].
    pub fn load(path: &Path, config: &IndexConfig) -> Result<Self> {
        let file = File::open(path)?;
        let total = file.metadata()?.len();
        let mut r = BufReader::new(file);

        let metric = crate::config::MetricType::from_code(pod::read_u32(&mut r)?)
            .ok_or_else(|| IndexError::Internal("snapshot has an unknown metric".into()))?;
        let data_type = crate::config::DataType::from_code(pod::read_u32(&mut r)?)
            .ok_or_else(|| IndexError::Internal("snapshot has an unknown data type".into()))?;
        let dimension = pod::read_u32(&mut r)?;
        let worker_num = pod::read_u32(&mut r)?;
        let file_max_elements = pod::read_u32(&mut r)?;
        let snapshot_id = pod::read_u64(&mut r)?;
        let record_bytes = pod::read_u64(&mut r)? as usize;
        let count = pod::read_u64(&mut r)? as u32;

        let space = DistanceSpace::new(metric, data_type, dimension)?;
        if record_bytes != space.data_size() + std::mem::size_of::<LabelType>() {
            return Err(IndexError::Internal(
                "snapshot record size does not match its dimension".into(),
            ));
        }
        let header_bytes: u64 = 5 * 4 + 3 * 8;
        if total != header_bytes + count as u64 * record_bytes as u64 {
            return Err(IndexError::Internal(
                "snapshot appears to be corrupted or truncated".into(),
            ));
        }

        let mut max_elements = config.core.max_elements;
        if max_elements < count {
            max_elements = file_max_elements.max(count);
        }
        let core = CoreConfig {
            index: crate::config::IndexKind::BruteForce,
            data_type,
            metric,
            dimension,
            worker_num,
            max_elements,
        };
        let engine = Self::new(core, config.hnsw)?;
        {
            let mut store = engine.store.write();
            let mut record = vec![0u8; record_bytes];
            for slot in 0..count {
                r.read_exact(&mut record)?;
                // Exclusive: the engine is not shared yet.
                unsafe {
                    store.arena.write_row(slot, &record);
                }
                let label = LabelType::from_le_bytes(
                    record[space.data_size()..].try_into().expect("label tail"),
                );
                store.lookup.insert(label, slot);
            }
            store.count = count;
        }
        engine.snapshot_id.store(snapshot_id, Ordering::Release);
        tracing::info!(count, snapshot_id, "loaded brute-force snapshot");
        Ok(engine)
    }

    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id.load(Ordering::Acquire)
    }

    pub fn core_config(&self) -> CoreConfig {
        self.core
    }

    pub fn hnsw_params(&self) -> HnswParams {
        self.params
    }

    pub fn element_count(&self) -> usize {
        self.store.read().count as usize
    }

    /// A context pre-filled with this engine's metadata, for callers using
    /// the engine without the facade.
    pub fn create_search_context(&self) -> SearchContext {
        SearchContext::new(
            self.core.metric,
            self.core.index,
            self.core.data_type,
            self.core.dimension,
            self.core.worker_num,
        )
    }
}

fn record_label(arena: &VectorArena, slot: LocationType, data_size: usize) -> LabelType {
    LabelType::from_le_bytes(arena.row(slot)[data_size..].try_into().expect("label tail"))
}

/// Drain the heap into `context.results` ordered ascending by distance, or
/// descending when the context asks for reversed output.
fn emit_results(context: &mut SearchContext, mut heap: BinaryHeap<ScanEntry>) {
    let with_location = context.with_location;
    let mut results = Vec::with_capacity(heap.len());
    while let Some(entry) = heap.pop() {
        results.push(SearchResult {
            distance: entry.distance.0,
            label: entry.label,
            location: if with_location { entry.location } else { 0 },
        });
    }
    if !context.reverse_result {
        results.reverse();
    }
    context.results = results;
}

impl crate::index::VectorEngine for BruteForceIndex {
    fn add_vector(&self, data: &[u8], label: LabelType, _write_conf: WriteConfig) -> Result<()> {
        self.add(data, label)
    }

    fn get_vector(&self, label: LabelType, out: &mut [u8]) -> Result<()> {
        self.get(label, out)
    }

    fn search(&self, context: &mut SearchContext) -> Result<()> {
        self.run_search(context)
    }

    fn lazy_delete(&self, label: LabelType) -> Result<()> {
        self.remove(label)
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
        IndexConfig {
            core: self.core,
            hnsw: self.params,
        }
    }

    fn element_count(&self) -> usize {
        self.element_count()
    }

    fn deleted_count(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, IndexKind, MetricType};
    use crate::context::SearchContext;
    use std::sync::Arc;

    fn engine(max_elements: u32) -> BruteForceIndex {
        let core = CoreConfig {
            index: IndexKind::BruteForce,
            data_type: DataType::Float32,
            metric: MetricType::L2,
            dimension: 4,
            worker_num: 0,
            max_elements,
        };
        BruteForceIndex::new(core, HnswParams::default()).unwrap()
    }

    fn vec_bytes(v: [f32; 4]) -> Vec<u8> {
        bytemuck::cast_slice(&v).to_vec()
    }

    fn context(engine: &BruteForceIndex) -> SearchContext {
        let core = engine.core_config();
        SearchContext::new(core.metric, core.index, core.data_type, core.dimension, 0)
    }

    #[test]
    fn test_add_and_get() {
        let idx = engine(8);
        idx.add(&vec_bytes([1.0, 2.0, 3.0, 4.0]), 7).unwrap();
        let mut out = [0u8; 16];
        idx.get(7, &mut out).unwrap();
        assert_eq!(out, vec_bytes([1.0, 2.0, 3.0, 4.0])[..]);
        assert_eq!(idx.element_count(), 1);
    }

    #[test]
    fn test_add_overwrites_on_collision() {
        let idx = engine(2);
        idx.add(&vec_bytes([1.0, 0.0, 0.0, 0.0]), 7).unwrap();
        idx.add(&vec_bytes([9.0, 0.0, 0.0, 0.0]), 7).unwrap();
        assert_eq!(idx.element_count(), 1);
        let mut out = [0u8; 16];
        idx.get(7, &mut out).unwrap();
        assert_eq!(out, vec_bytes([9.0, 0.0, 0.0, 0.0])[..]);
    }

    #[test]
    fn test_capacity_exhausted() {
        let idx = engine(1);
        idx.add(&vec_bytes([1.0, 0.0, 0.0, 0.0]), 1).unwrap();
        let err = idx.add(&vec_bytes([2.0, 0.0, 0.0, 0.0]), 2).unwrap_err();
        assert!(matches!(err, IndexError::ResourceExhausted(_)));
    }

    #[test]
    fn test_remove_swaps_tail() {
        let idx = engine(4);
        idx.add(&vec_bytes([1.0, 0.0, 0.0, 0.0]), 10).unwrap();
        idx.add(&vec_bytes([2.0, 0.0, 0.0, 0.0]), 11).unwrap();
        idx.add(&vec_bytes([3.0, 0.0, 0.0, 0.0]), 12).unwrap();
        idx.remove(10).unwrap();
        assert_eq!(idx.element_count(), 2);
        // The moved tail record must still resolve.
        let mut out = [0u8; 16];
        idx.get(12, &mut out).unwrap();
        assert_eq!(out, vec_bytes([3.0, 0.0, 0.0, 0.0])[..]);
        assert!(matches!(idx.get(10, &mut out), Err(IndexError::NotFound(10))));
        assert!(matches!(idx.remove(10), Err(IndexError::NotFound(10))));
    }

    #[test]
    fn test_search_exact_order() {
        let idx = engine(8);
        idx.add(&vec_bytes([0.0, 0.0, 0.0, 0.0]), 0).unwrap();
        idx.add(&vec_bytes([1.0, 0.0, 0.0, 0.0]), 1).unwrap();
        idx.add(&vec_bytes([2.0, 0.0, 0.0, 0.0]), 2).unwrap();
        idx.add(&vec_bytes([3.0, 0.0, 0.0, 0.0]), 3).unwrap();

        let mut ctx = context(&idx);
        ctx.with_query(&vec_bytes([0.9, 0.0, 0.0, 0.0])).with_top_k(2);
        idx.run_search(&mut ctx).unwrap();
        let labels: Vec<_> = ctx.results.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![1, 0]);
        assert!(ctx.results[0].distance <= ctx.results[1].distance);
        assert!(ctx.schedule_time.is_some() && ctx.end_time.is_some());
    }

    #[test]
    fn test_search_reverse_result() {
        let idx = engine(8);
        for i in 0..4u64 {
            idx.add(&vec_bytes([i as f32, 0.0, 0.0, 0.0]), i).unwrap();
        }
        let mut ctx = context(&idx);
        ctx.with_query(&vec_bytes([0.0; 4]))
            .with_top_k(3)
            .with_reverse_result(true);
        idx.run_search(&mut ctx).unwrap();
        let labels: Vec<_> = ctx.results.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![2, 1, 0]);
    }

    #[test]
    fn test_search_with_condition() {
        struct Odd;
        impl crate::condition::SearchCondition for Odd {
            fn is_exclude(&self, label: LabelType) -> bool {
                label % 2 == 1
            }
        }
        let idx = engine(8);
        for i in 0..8u64 {
            idx.add(&vec_bytes([i as f32, 0.0, 0.0, 0.0]), i).unwrap();
        }
        let mut ctx = context(&idx);
        ctx.with_query(&vec_bytes([0.0; 4]))
            .with_top_k(4)
            .with_condition(Arc::new(Odd));
        idx.run_search(&mut ctx).unwrap();
        assert!(ctx.results.iter().all(|r| r.label % 2 == 0));
        assert_eq!(ctx.results.len(), 4);
    }

    #[test]
    fn test_search_with_location_and_raw_vector() {
        let idx = engine(4);
        idx.add(&vec_bytes([5.0, 6.0, 7.0, 8.0]), 42).unwrap();
        let mut ctx = context(&idx);
        ctx.with_query(&vec_bytes([5.0, 6.0, 7.0, 8.0]))
            .with_top_k(1)
            .with_location(true)
            .with_raw_vector(true);
        idx.run_search(&mut ctx).unwrap();
        assert_eq!(ctx.results.len(), 1);
        assert_eq!(ctx.results[0].location, 0);
        assert_eq!(ctx.raw_vectors.len(), 1);
        assert_eq!(ctx.raw_vectors[0], vec_bytes([5.0, 6.0, 7.0, 8.0]));
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let idx = engine(4);
        let mut ctx = context(&idx);
        ctx.with_query(&vec_bytes([0.0; 4])).with_top_k(3);
        idx.run_search(&mut ctx).unwrap();
        assert!(ctx.results.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bf.idx");
        let idx = engine(8);
        for i in 0..5u64 {
            idx.add(&vec_bytes([i as f32, 1.0, 2.0, 3.0]), 100 + i).unwrap();
        }
        idx.save(9, &path).unwrap();
        assert_eq!(idx.snapshot_id(), 9);

        let loaded = BruteForceIndex::load(
            &path,
            &IndexConfig::new().with_max_elements(8),
        )
        .unwrap();
        assert_eq!(loaded.snapshot_id(), 9);
        assert_eq!(loaded.element_count(), 5);
        // The rebuilt label map keeps updates working after load.
        let mut out = [0u8; 16];
        loaded.get(103, &mut out).unwrap();
        assert_eq!(out, vec_bytes([3.0, 1.0, 2.0, 3.0])[..]);
        loaded.remove(103).unwrap();
        assert_eq!(loaded.element_count(), 4);
    }

    #[test]
    fn test_truncated_snapshot_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bf.idx");
        let idx = engine(4);
        idx.add(&vec_bytes([1.0, 2.0, 3.0, 4.0]), 1).unwrap();
        idx.save(1, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
        let err = BruteForceIndex::load(&path, &IndexConfig::new()).unwrap_err();
        assert!(matches!(err, IndexError::Internal(_) | IndexError::Io(_)));
    }
}
