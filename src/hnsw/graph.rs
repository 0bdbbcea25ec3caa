//! HNSW graph storage and layout.
//!
//! Every node is addressed by a 32-bit location. Storage is a set of
//! parallel fixed-stride arenas:
//!
//! - `level0_links`: `1 + max_m0` atomic words per node. The first word
//!   packs the link count (low 16 bits) with the deletion mark (top byte);
//!   the rest are neighbor locations. This array is read lock-free.
//! - `vectors`: one aligned row of `data_size` bytes per node.
//! - `labels`, `element_levels`: one atomic word per node.
//! - `upper_links`: for each node of positive level, a set-once block of
//!   `level * (1 + max_m)` words holding the level-1..=level adjacency
//!   lists back to back. Upper-level lists are read and written under the
//!   owning node's mutex.
//!
//! Locking discipline: the label-op mutex (hashed by the low label bits)
//! serializes competing operations on one label; the lookup mutex guards
//! the label map; per-node mutexes guard adjacency updates; the global
//! mutex is held only while publishing a new entry point. Level-0 list
//! writers store neighbor slots first and then update the count word with a
//! release CAS, so lock-free readers observe only trailing growth or a
//! consistent replacement. The deletion bit is flipped with `fetch_or` /
//! `fetch_and`, which the count CAS preserves.

use crate::arena::VectorArena;
use crate::config::{CoreConfig, HnswParams, IndexConfig, DEFAULT_EF_SEARCH};
use crate::distance::DistanceSpace;
use crate::error::{IndexError, Result};
use crate::visited::VisitedPool;
use crate::{DistanceType, LabelType, LocationType};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

/// Deletion mark in the top byte of a level-0 header word. The link count
/// occupies the low 16 bits, so both coexist in the first word.
pub(crate) const DELETE_MARK: u32 = 1 << 24;

/// Number of label-op mutexes; the lock index is the label's low bits.
pub(crate) const MAX_LABEL_OPERATION_LOCKS: usize = 65_536;

/// Sentinel for "no entry point yet".
pub(crate) const NO_ENTRY_POINT: u32 = u32::MAX;

#[inline]
pub(crate) fn link_count(header: u32) -> usize {
    (header & 0xFFFF) as usize
}

/// A borrowed adjacency list: the count observed at read time plus the slot
/// words behind it.
#[derive(Clone, Copy)]
pub(crate) struct LinkList<'a> {
    slots: &'a [AtomicU32],
    len: usize,
}

impl<'a> LinkList<'a> {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> LinkListIter<'a> {
        LinkListIter {
            slots: self.slots,
            idx: 0,
            end: self.len,
        }
    }
}

pub(crate) struct LinkListIter<'a> {
    slots: &'a [AtomicU32],
    idx: usize,
    end: usize,
}

impl Iterator for LinkListIter<'_> {
    type Item = LocationType;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.end {
            return None;
        }
        let loc = self.slots[self.idx].load(Ordering::Relaxed);
        self.idx += 1;
        Some(loc)
    }
}

/// The concurrent HNSW engine.
pub struct HnswIndex {
    pub(crate) space: DistanceSpace,
    core: CoreConfig,
    params: HnswParams,

    max_elements: usize,
    pub(crate) m: usize,
    pub(crate) max_m: usize,
    pub(crate) max_m0: usize,
    pub(crate) ef_construction: usize,
    /// Level-assignment slope, `1 / ln(m)`.
    pub(crate) mult: f64,

    /// Default query beam width when a context does not set one.
    ef: AtomicUsize,
    snapshot_id: AtomicU64,

    cur_count: AtomicU32,
    num_deleted: AtomicUsize,
    /// Highest level among live nodes; -1 while empty.
    max_level: AtomicI32,
    entry_point: AtomicU32,

    level0_links: Vec<AtomicU32>,
    pub(crate) vectors: VectorArena,
    labels: Vec<AtomicU64>,
    element_levels: Vec<AtomicI32>,
    upper_links: Vec<OnceLock<Box<[AtomicU32]>>>,

    /// Held only while publishing a new entry point.
    pub(crate) global: Mutex<()>,
    pub(crate) node_locks: Vec<Mutex<()>>,
    label_op_locks: Vec<Mutex<()>>,
    pub(crate) label_lookup: Mutex<HashMap<LabelType, LocationType>>,
    pub(crate) deleted_elements: Mutex<HashSet<LocationType>>,
    pub(crate) visited_pool: VisitedPool,

    pub(crate) level_rng: Mutex<StdRng>,
    pub(crate) update_rng: Mutex<StdRng>,

    pub(crate) metric_hops: AtomicU64,
    pub(crate) metric_distance_computations: AtomicU64,
}

impl HnswIndex {
    /// Allocate an empty graph for `core.max_elements` nodes.
    pub fn new(core: CoreConfig, params: HnswParams) -> Result<Self> {
        let space = DistanceSpace::new(core.metric, core.data_type, core.dimension)?;
        if core.max_elements == 0 {
            return Err(IndexError::InvalidArgument(
                "max_elements must not be 0".into(),
            ));
        }
        if core.max_elements == NO_ENTRY_POINT {
            return Err(IndexError::InvalidArgument(
                "max_elements exceeds the internal location range".into(),
            ));
        }
        if params.m < 2 {
            return Err(IndexError::InvalidArgument("M must be at least 2".into()));
        }
        let mut params = params;
        if params.m > 10_000 {
            tracing::warn!(m = params.m, "M exceeds 10000; capping");
            params.m = 10_000;
        }
        params.ef_construction = params.ef_construction.max(params.m);

        let max_elements = core.max_elements as usize;
        let m = params.m;
        let max_m = m;
        let max_m0 = m * 2;

        let level0_words = max_elements
            .checked_mul(1 + max_m0)
            .ok_or_else(|| IndexError::ResourceExhausted("level-0 arena size overflow".into()))?;
        let mut level0_links: Vec<AtomicU32> = Vec::new();
        level0_links
            .try_reserve_exact(level0_words)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate level-0 links".into()))?;
        level0_links.resize_with(level0_words, || AtomicU32::new(0));

        let vectors = VectorArena::new(max_elements, space.data_size())?;

        let mut labels = Vec::new();
        labels
            .try_reserve_exact(max_elements)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate label table".into()))?;
        labels.resize_with(max_elements, || AtomicU64::new(0));

        let mut element_levels = Vec::new();
        element_levels
            .try_reserve_exact(max_elements)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate level table".into()))?;
        element_levels.resize_with(max_elements, || AtomicI32::new(0));

        let mut upper_links = Vec::new();
        upper_links
            .try_reserve_exact(max_elements)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate link table".into()))?;
        upper_links.resize_with(max_elements, OnceLock::new);

        let mut node_locks = Vec::with_capacity(max_elements);
        node_locks.resize_with(max_elements, || Mutex::new(()));
        let mut label_op_locks = Vec::with_capacity(MAX_LABEL_OPERATION_LOCKS);
        label_op_locks.resize_with(MAX_LABEL_OPERATION_LOCKS, || Mutex::new(()));

        Ok(Self {
            space,
            core,
            max_elements,
            m,
            max_m,
            max_m0,
            ef_construction: params.ef_construction,
            mult: 1.0 / (m as f64).ln(),
            ef: AtomicUsize::new(DEFAULT_EF_SEARCH),
            snapshot_id: AtomicU64::new(0),
            cur_count: AtomicU32::new(0),
            num_deleted: AtomicUsize::new(0),
            max_level: AtomicI32::new(-1),
            entry_point: AtomicU32::new(NO_ENTRY_POINT),
            level0_links,
            vectors,
            labels,
            element_levels,
            upper_links,
            global: Mutex::new(()),
            node_locks,
            label_op_locks,
            label_lookup: Mutex::new(HashMap::new()),
            deleted_elements: Mutex::new(HashSet::new()),
            visited_pool: VisitedPool::new(1, max_elements),
            level_rng: Mutex::new(StdRng::seed_from_u64(params.random_seed)),
            update_rng: Mutex::new(StdRng::seed_from_u64(params.random_seed.wrapping_add(1))),
            metric_hops: AtomicU64::new(0),
            metric_distance_computations: AtomicU64::new(0),
            params,
        })
    }

    pub fn space(&self) -> &DistanceSpace {
        &self.space
    }

    pub fn core_config(&self) -> CoreConfig {
        self.core
    }

    pub fn index_config(&self) -> IndexConfig {
        IndexConfig {
            core: self.core,
            hnsw: self.params,
        }
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn element_count(&self) -> usize {
        self.cur_count.load(Ordering::Acquire) as usize
    }

    pub fn deleted_count(&self) -> usize {
        self.num_deleted.load(Ordering::Acquire)
    }

    pub fn allow_replace_deleted(&self) -> bool {
        self.params.allow_replace_deleted
    }

    pub(crate) fn update_neighbor_probability(&self) -> f32 {
        self.params.update_neighbor_probability
    }

    /// Override the default query beam width.
    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef, Ordering::Release);
    }

    pub(crate) fn default_ef(&self) -> usize {
        self.ef.load(Ordering::Acquire)
    }

    pub fn snapshot_id(&self) -> u64 {
        self.snapshot_id.load(Ordering::Acquire)
    }

    pub(crate) fn set_snapshot_id(&self, id: u64) {
        self.snapshot_id.store(id, Ordering::Release);
    }

    /// (location, level) of the current entry point, if any.
    ///
    /// The publisher stores the location before the level; reading the
    /// level first therefore never yields a level the returned node does
    /// not carry.
    pub(crate) fn entry_point(&self) -> Option<(LocationType, i32)> {
        let level = self.max_level.load(Ordering::Acquire);
        let loc = self.entry_point.load(Ordering::Acquire);
        if loc == NO_ENTRY_POINT {
            None
        } else {
            Some((loc, level))
        }
    }

    /// Publish a new entry point. Caller holds the global mutex.
    pub(crate) fn publish_entry_point(&self, loc: LocationType, level: i32) {
        self.entry_point.store(loc, Ordering::Release);
        self.max_level.store(level, Ordering::Release);
    }

    pub(crate) fn set_element_count(&self, count: u32) {
        self.cur_count.store(count, Ordering::Release);
    }

    pub(crate) fn element_level(&self, loc: LocationType) -> i32 {
        self.element_levels[loc as usize].load(Ordering::Acquire)
    }

    pub(crate) fn set_element_level(&self, loc: LocationType, level: i32) {
        self.element_levels[loc as usize].store(level, Ordering::Release);
    }

    pub(crate) fn label(&self, loc: LocationType) -> LabelType {
        self.labels[loc as usize].load(Ordering::Acquire)
    }

    pub(crate) fn set_label(&self, loc: LocationType, label: LabelType) {
        self.labels[loc as usize].store(label, Ordering::Release);
    }

    pub(crate) fn label_op_lock(&self, label: LabelType) -> &Mutex<()> {
        &self.label_op_locks[label as usize & (MAX_LABEL_OPERATION_LOCKS - 1)]
    }

    /// Vector row bytes for `loc`.
    #[inline]
    pub(crate) fn vector(&self, loc: LocationType) -> &[u8] {
        self.vectors.row(loc)
    }

    /// Overwrite the vector of `loc`. Callers are the fresh-insert path
    /// (node unpublished) and the update paths (label-op lock held), which
    /// satisfies the arena's single-writer contract.
    pub(crate) fn write_vector(&self, loc: LocationType, data: &[u8]) {
        unsafe {
            self.vectors.write_row(loc, data);
        }
    }

    #[inline]
    pub(crate) fn dist_to_query(&self, query: &[u8], loc: LocationType) -> DistanceType {
        self.space.dist(query, self.vector(loc))
    }

    #[inline]
    pub(crate) fn dist_between(&self, a: LocationType, b: LocationType) -> DistanceType {
        self.space.dist(self.vector(a), self.vector(b))
    }

    /// The `1 + max_m0` header-and-slot words of `loc`'s level-0 record.
    #[inline]
    pub(crate) fn level0_block(&self, loc: LocationType) -> &[AtomicU32] {
        let words = 1 + self.max_m0;
        let start = loc as usize * words;
        &self.level0_links[start..start + words]
    }

    /// The `1 + max_m` words of `loc`'s list at `level` (level > 0).
    pub(crate) fn upper_block(&self, loc: LocationType, level: usize) -> Result<&[AtomicU32]> {
        debug_assert!(level > 0);
        let block = self.upper_links[loc as usize].get().ok_or_else(|| {
            IndexError::Internal(format!("node {loc} has no upper-level links"))
        })?;
        let words = 1 + self.max_m;
        let start = (level - 1) * words;
        let end = start + words;
        if end > block.len() {
            return Err(IndexError::Internal(format!(
                "node {loc} has no links on level {level}"
            )));
        }
        Ok(&block[start..end])
    }

    pub(crate) fn block_at_level(&self, loc: LocationType, level: usize) -> Result<&[AtomicU32]> {
        if level == 0 {
            Ok(self.level0_block(loc))
        } else {
            self.upper_block(loc, level)
        }
    }

    /// Snapshot view of `loc`'s adjacency at `level`.
    pub(crate) fn linklist_at_level(
        &self,
        loc: LocationType,
        level: usize,
    ) -> Result<LinkList<'_>> {
        let block = self.block_at_level(loc, level)?;
        let header = block[0].load(Ordering::Acquire);
        let count = link_count(header);
        let cap = if level == 0 { self.max_m0 } else { self.max_m };
        if count > cap {
            return Err(IndexError::Internal(format!(
                "neighbor list of node {loc} on level {level} exceeds its cap"
            )));
        }
        Ok(LinkList {
            slots: &block[1..],
            len: count,
        })
    }

    /// Rewrite the count field of a header word, preserving the deletion
    /// byte a concurrent `mark_delete` may flip underneath us.
    pub(crate) fn set_link_count(&self, header: &AtomicU32, count: usize) -> Result<()> {
        if count > u16::MAX as usize {
            return Err(IndexError::Internal("neighbor count overflows 16 bits".into()));
        }
        let mut old = header.load(Ordering::Relaxed);
        loop {
            let new = (old & !0xFFFF) | count as u32;
            match header.compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed) {
                Ok(_) => return Ok(()),
                Err(actual) => old = actual,
            }
        }
    }

    /// Install a zeroed upper-level block of `level * (1 + max_m)` words.
    pub(crate) fn allocate_upper_block(&self, loc: LocationType, level: usize) -> Result<()> {
        let words = level
            .checked_mul(1 + self.max_m)
            .ok_or_else(|| IndexError::ResourceExhausted("upper-level block size overflow".into()))?;
        let mut block: Vec<AtomicU32> = Vec::new();
        block
            .try_reserve_exact(words)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate upper-level links".into()))?;
        block.resize_with(words, || AtomicU32::new(0));
        self.upper_links[loc as usize]
            .set(block.into_boxed_slice())
            .map_err(|_| IndexError::Internal(format!("node {loc} already has upper links")))
    }

    pub(crate) fn has_upper_block(&self, loc: LocationType) -> bool {
        self.upper_links[loc as usize].get().is_some()
    }

    #[inline]
    pub(crate) fn is_marked_deleted(&self, loc: LocationType) -> bool {
        let header = self.level0_block(loc)[0].load(Ordering::Acquire);
        header & DELETE_MARK != 0
    }

    pub(crate) fn mark_deleted_internal(&self, loc: LocationType, label: LabelType) -> Result<()> {
        if loc as usize >= self.element_count() {
            return Err(IndexError::OutOfRange(format!(
                "location {loc} is outside the live range"
            )));
        }
        let header = self.level0_block(loc)[0].fetch_or(DELETE_MARK, Ordering::AcqRel);
        if header & DELETE_MARK != 0 {
            return Err(IndexError::NotFound(label));
        }
        self.num_deleted.fetch_add(1, Ordering::AcqRel);
        if self.params.allow_replace_deleted {
            self.deleted_elements.lock().insert(loc);
        }
        Ok(())
    }

    pub(crate) fn unmark_deleted_internal(&self, loc: LocationType, label: LabelType) -> Result<()> {
        if loc as usize >= self.element_count() {
            return Err(IndexError::OutOfRange(format!(
                "location {loc} is outside the live range"
            )));
        }
        let header = self.level0_block(loc)[0].fetch_and(!DELETE_MARK, Ordering::AcqRel);
        if header & DELETE_MARK == 0 {
            return Err(IndexError::NotFound(label));
        }
        self.num_deleted.fetch_sub(1, Ordering::AcqRel);
        if self.params.allow_replace_deleted {
            self.deleted_elements.lock().remove(&loc);
        }
        Ok(())
    }

    /// Set the deletion mark on `label`'s node. The node stays traversable
    /// but is excluded from result sets.
    pub fn mark_delete(&self, label: LabelType) -> Result<()> {
        let _label_guard = self.label_op_lock(label).lock();
        let loc = {
            let lookup = self.label_lookup.lock();
            *lookup.get(&label).ok_or(IndexError::NotFound(label))?
        };
        self.mark_deleted_internal(loc, label)
    }

    /// Clear the deletion mark on `label`'s node.
    ///
    /// Refused when replace-deleted is enabled: a reclaimed slot and an
    /// unmark racing on the same location cannot both win.
    pub fn unmark_delete(&self, label: LabelType) -> Result<()> {
        if self.params.allow_replace_deleted {
            return Err(IndexError::InvalidArgument(
                "unmark_delete is unavailable while replace-deleted is enabled".into(),
            ));
        }
        let _label_guard = self.label_op_lock(label).lock();
        let loc = {
            let lookup = self.label_lookup.lock();
            *lookup.get(&label).ok_or(IndexError::NotFound(label))?
        };
        self.unmark_deleted_internal(loc, label)
    }

    /// Copy the vector stored under `label` into `out`. Deleted labels
    /// report not-found.
    pub fn get_vector(&self, label: LabelType, out: &mut [u8]) -> Result<()> {
        if out.len() != self.space.data_size() {
            return Err(IndexError::InvalidArgument(format!(
                "output buffer must be {} bytes, got {}",
                self.space.data_size(),
                out.len()
            )));
        }
        let _label_guard = self.label_op_lock(label).lock();
        let loc = {
            let lookup = self.label_lookup.lock();
            *lookup.get(&label).ok_or(IndexError::NotFound(label))?
        };
        if self.is_marked_deleted(loc) {
            return Err(IndexError::NotFound(label));
        }
        out.copy_from_slice(self.vector(loc));
        Ok(())
    }

    /// Draw a level from the exponential distribution with mean
    /// `1 / ln(m)`.
    pub(crate) fn random_level(&self) -> i32 {
        let mut r: f64 = self.level_rng.lock().gen();
        if r == 0.0 {
            r = f64::MIN_POSITIVE;
        }
        (-r.ln() * self.mult) as i32
    }

    /// Copy of `loc`'s adjacency at `level`, taken under its node lock.
    pub(crate) fn connections_with_lock(
        &self,
        loc: LocationType,
        level: usize,
    ) -> Result<Vec<LocationType>> {
        let _guard = self.node_locks[loc as usize].lock();
        Ok(self.linklist_at_level(loc, level)?.iter().collect())
    }

    /// Grow the index to hold `new_max` nodes.
    ///
    /// Exclusive: reallocates the arenas, lock array, and visited pool.
    pub fn resize(&mut self, new_max: u32) -> Result<()> {
        let cur = self.element_count();
        if (new_max as usize) < cur {
            return Err(IndexError::InvalidArgument(format!(
                "cannot resize to {new_max}: {cur} elements are live"
            )));
        }
        if new_max == NO_ENTRY_POINT {
            return Err(IndexError::InvalidArgument(
                "max_elements exceeds the internal location range".into(),
            ));
        }
        let new_max = new_max as usize;

        let words = 1 + self.max_m0;
        let mut level0_links: Vec<AtomicU32> = Vec::new();
        level0_links
            .try_reserve_exact(new_max * words)
            .map_err(|_| IndexError::ResourceExhausted("failed to reallocate level-0 links".into()))?;
        level0_links.resize_with(new_max * words, || AtomicU32::new(0));
        for (dst, src) in level0_links.iter().zip(self.level0_links.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.level0_links = level0_links;

        let vectors = VectorArena::new(new_max, self.space.data_size())?;
        for loc in 0..cur as u32 {
            // Exclusive access through &mut self.
            unsafe {
                vectors.write_row(loc, self.vectors.row(loc));
            }
        }
        self.vectors = vectors;

        self.labels.resize_with(new_max, || AtomicU64::new(0));
        self.element_levels.resize_with(new_max, || AtomicI32::new(0));
        self.upper_links.resize_with(new_max, OnceLock::new);
        self.node_locks.resize_with(new_max, || Mutex::new(()));
        self.visited_pool = VisitedPool::new(1, new_max);
        self.max_elements = new_max;
        self.core.max_elements = new_max as u32;
        Ok(())
    }

    /// Validate the structural invariants: list counts within caps, no
    /// self-loops, edges only between nodes that carry the level, unique
    /// neighbors, and deletion bookkeeping consistent with the marks.
    pub fn check_integrity(&self) -> Result<()> {
        let count = self.element_count() as u32;
        let mut marked = 0usize;
        for loc in 0..count {
            let level = self.element_level(loc);
            if level < 0 {
                return Err(IndexError::Internal(format!("node {loc} has a negative level")));
            }
            for l in 0..=level as usize {
                let list = self.linklist_at_level(loc, l)?;
                let cap = if l == 0 { self.max_m0 } else { self.max_m };
                if list.len() > cap {
                    return Err(IndexError::Internal(format!(
                        "node {loc} has {} neighbors on level {l}, cap {cap}",
                        list.len()
                    )));
                }
                let mut seen = HashSet::with_capacity(list.len());
                for neighbor in list.iter() {
                    if neighbor == loc {
                        return Err(IndexError::Internal(format!(
                            "node {loc} links to itself on level {l}"
                        )));
                    }
                    if neighbor >= count {
                        return Err(IndexError::Internal(format!(
                            "node {loc} links to unallocated node {neighbor}"
                        )));
                    }
                    if (self.element_level(neighbor) as usize) < l {
                        return Err(IndexError::Internal(format!(
                            "node {loc} links to {neighbor} on level {l}, which {neighbor} does not carry"
                        )));
                    }
                    if !seen.insert(neighbor) {
                        return Err(IndexError::Internal(format!(
                            "node {loc} links to {neighbor} twice on level {l}"
                        )));
                    }
                }
            }
            if self.is_marked_deleted(loc) {
                marked += 1;
            }
        }
        if marked != self.deleted_count() {
            return Err(IndexError::Internal(format!(
                "{marked} nodes carry the deletion mark but num_deleted is {}",
                self.deleted_count()
            )));
        }
        if self.params.allow_replace_deleted {
            let set = self.deleted_elements.lock();
            if set.len() != marked {
                return Err(IndexError::Internal(format!(
                    "deleted set holds {} locations but {marked} nodes are marked",
                    set.len()
                )));
            }
            for &loc in set.iter() {
                if !self.is_marked_deleted(loc) {
                    return Err(IndexError::Internal(format!(
                        "deleted set holds unmarked location {loc}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Recount deletion marks and refill the reusable-slot set. Used after
    /// a snapshot load, before the index is shared.
    pub(crate) fn rebuild_deletion_bookkeeping(&self) {
        let mut marked = 0usize;
        let mut set = self.deleted_elements.lock();
        set.clear();
        for loc in 0..self.element_count() as u32 {
            if self.is_marked_deleted(loc) {
                marked += 1;
                if self.params.allow_replace_deleted {
                    set.insert(loc);
                }
            }
        }
        drop(set);
        self.num_deleted.store(marked, Ordering::Release);
    }

    /// A context pre-filled with this engine's metadata, for callers using
    /// the engine without the facade.
    pub fn create_search_context(&self) -> crate::context::SearchContext {
        crate::context::SearchContext::new(
            self.core.metric,
            self.core.index,
            self.core.data_type,
            self.core.dimension,
            self.core.worker_num,
        )
    }

    /// Search-effort counters: (hops, distance computations).
    pub fn search_metrics(&self) -> (u64, u64) {
        (
            self.metric_hops.load(Ordering::Relaxed),
            self.metric_distance_computations.load(Ordering::Relaxed),
        )
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("max_elements", &self.max_elements)
            .field("element_count", &self.element_count())
            .field("deleted_count", &self.deleted_count())
            .field("m", &self.m)
            .field("ef_construction", &self.ef_construction)
            .field("max_level", &self.max_level.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DataType, IndexKind, MetricType};

    fn test_core(dimension: u32, max_elements: u32) -> CoreConfig {
        CoreConfig {
            index: IndexKind::Hnsw,
            data_type: DataType::Float32,
            metric: MetricType::L2,
            dimension,
            worker_num: 0,
            max_elements,
        }
    }

    fn index() -> HnswIndex {
        HnswIndex::new(test_core(4, 32), HnswParams::default()).unwrap()
    }

    #[test]
    fn test_new_empty() {
        let idx = index();
        assert_eq!(idx.element_count(), 0);
        assert_eq!(idx.deleted_count(), 0);
        assert!(idx.entry_point().is_none());
        assert_eq!(idx.max_m0, 32);
        assert_eq!(idx.ef_construction, 200);
    }

    #[test]
    fn test_ef_construction_floored_at_m() {
        let idx = HnswIndex::new(
            test_core(4, 8),
            HnswParams {
                m: 48,
                ef_construction: 10,
                ..HnswParams::default()
            },
        )
        .unwrap();
        assert_eq!(idx.ef_construction, 48);
    }

    #[test]
    fn test_invalid_params_refused() {
        assert!(HnswIndex::new(test_core(0, 8), HnswParams::default()).is_err());
        assert!(HnswIndex::new(test_core(4, 0), HnswParams::default()).is_err());
        assert!(HnswIndex::new(
            test_core(4, 8),
            HnswParams {
                m: 1,
                ..HnswParams::default()
            }
        )
        .is_err());
    }

    #[test]
    fn test_header_packs_count_and_delete_mark() {
        let idx = index();
        idx.set_element_count(1);
        let header = &idx.level0_block(0)[0];
        idx.set_link_count(header, 5).unwrap();
        assert_eq!(link_count(header.load(Ordering::Relaxed)), 5);
        assert!(!idx.is_marked_deleted(0));

        idx.mark_deleted_internal(0, 99).unwrap();
        assert!(idx.is_marked_deleted(0));
        // The count survives the mark and vice versa.
        assert_eq!(link_count(header.load(Ordering::Relaxed)), 5);
        idx.set_link_count(header, 7).unwrap();
        assert!(idx.is_marked_deleted(0));
        assert_eq!(link_count(header.load(Ordering::Relaxed)), 7);

        idx.unmark_deleted_internal(0, 99).unwrap();
        assert!(!idx.is_marked_deleted(0));
        assert_eq!(link_count(header.load(Ordering::Relaxed)), 7);
    }

    #[test]
    fn test_double_mark_is_not_found() {
        let idx = index();
        idx.set_element_count(1);
        idx.mark_deleted_internal(0, 5).unwrap();
        assert!(matches!(
            idx.mark_deleted_internal(0, 5),
            Err(IndexError::NotFound(5))
        ));
        assert_eq!(idx.deleted_count(), 1);
    }

    #[test]
    fn test_mark_outside_live_range() {
        let idx = index();
        assert!(matches!(
            idx.mark_deleted_internal(0, 1),
            Err(IndexError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_random_level_distribution() {
        let idx = index();
        let mut counts = [0usize; 2];
        for _ in 0..2000 {
            let level = idx.random_level();
            assert!(level >= 0);
            counts[(level > 0) as usize] += 1;
        }
        // With m=16 roughly 1/16 of draws land above level 0.
        assert!(counts[1] > 0);
        assert!(counts[0] > counts[1] * 8);
    }

    #[test]
    fn test_upper_block_geometry() {
        let idx = index();
        idx.allocate_upper_block(3, 2).unwrap();
        assert!(idx.has_upper_block(3));
        let block = idx.upper_block(3, 1).unwrap();
        assert_eq!(block.len(), 1 + idx.max_m);
        assert!(idx.upper_block(3, 2).is_ok());
        assert!(idx.upper_block(3, 3).is_err());
        assert!(idx.upper_block(4, 1).is_err());
        // Double allocation is a contract bug.
        assert!(idx.allocate_upper_block(3, 1).is_err());
    }

    #[test]
    fn test_unmark_refused_with_replace_deleted() {
        let idx = HnswIndex::new(
            test_core(4, 8),
            HnswParams {
                allow_replace_deleted: true,
                ..HnswParams::default()
            },
        )
        .unwrap();
        assert!(matches!(
            idx.unmark_delete(1),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resize_rejects_shrink_below_live() {
        let mut idx = index();
        idx.set_element_count(10);
        assert!(matches!(idx.resize(5), Err(IndexError::InvalidArgument(_))));
        idx.set_element_count(2);
        idx.resize(64).unwrap();
        assert_eq!(idx.max_elements(), 64);
    }
}
